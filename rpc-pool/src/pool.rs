use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::Arc,
    time::Duration,
};

use anyhow::anyhow;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use timelock_storage::KvStore;
use timelock_types::{
    endpoint::{METADATA_TTL, MIN_SAFE_RANGE},
    EndpointMetadata, RpcPoolOptions,
};
use tokio::{
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{build_provider, prober::probe_endpoint, PoolError, RpcProvider};

/// Outer budget for one maintenance pass over all endpoints.
const MAINTENANCE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Base delay of the `execute_forever` backoff.
const FOREVER_BACKOFF_BASE: Duration = Duration::from_secs(30);

/// Cap of the `execute_forever` backoff.
const FOREVER_BACKOFF_CAP: Duration = Duration::from_secs(5 * 60);

pub(crate) async fn write_metadata(
    kv: &dyn KvStore,
    meta: &EndpointMetadata,
) -> anyhow::Result<()> {
    let key = EndpointMetadata::kv_key(meta.chain_id, &meta.url);
    kv.set_with_ttl(&key, serde_json::to_vec(meta)?, METADATA_TTL)
        .await
}

pub(crate) async fn read_metadata(
    kv: &dyn KvStore,
    chain_id: u64,
    url: &Url,
) -> anyhow::Result<Option<EndpointMetadata>> {
    match kv.get(&EndpointMetadata::kv_key(chain_id, url)).await? {
        // Metadata that no longer deserializes is treated as expired.
        Some(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
        None => Ok(None),
    }
}

/// A checked-out endpoint client handed to pool operations.
#[derive(Clone)]
pub struct PoolClient {
    pub url: Url,
    pub provider: RpcProvider,
    /// Largest `getLogs` span the endpoint is known to accept.
    pub max_safe_range: u64,
}

/// Returns the endpoint to the rotation tail when dropped, on success,
/// failure, and panic paths alike.
struct PushBackGuard {
    chain_id: u64,
    url: Url,
    kv: Arc<dyn KvStore>,
    checked_out: Arc<Mutex<HashSet<Url>>>,
}

impl Drop for PushBackGuard {
    fn drop(&mut self) {
        let kv = self.kv.clone();
        let url = self.url.clone();
        let key = EndpointMetadata::rotation_key(self.chain_id);
        let checked_out = self.checked_out.clone();
        tokio::spawn(async move {
            if let Err(err) = kv
                .push_back(&key, vec![url.to_string().into_bytes()])
                .await
            {
                // Lost until the next maintenance pass restores it.
                tracing::warn!(%url, %err, "failed to return endpoint to rotation");
            }
            checked_out.lock().remove(&url);
        });
    }
}

struct Checkout {
    client: PoolClient,
    _guard: PushBackGuard,
}

#[derive(Default)]
struct MaintenanceTask(Mutex<Option<JoinHandle<()>>>);

impl Drop for MaintenanceTask {
    fn drop(&mut self) {
        if let Some(task) = self.0.get_mut().take() {
            task.abort();
        }
    }
}

/// Per-chain collection of prober-validated endpoints with FIFO rotation.
///
/// The rotation queue and endpoint metadata live in the k/v store; the client
/// cache is process-local and guarded by a single read-write lock.
#[derive(Clone)]
pub struct EndpointPool {
    chain_id: u64,
    urls: Arc<Vec<Url>>,
    options: RpcPoolOptions,
    kv: Arc<dyn KvStore>,
    clients: Arc<RwLock<HashMap<Url, RpcProvider>>>,
    checked_out: Arc<Mutex<HashSet<Url>>>,
    maintenance: Arc<MaintenanceTask>,
}

impl EndpointPool {
    pub fn new(
        chain_id: u64,
        urls: Vec<Url>,
        options: RpcPoolOptions,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            chain_id,
            urls: Arc::new(urls),
            options,
            kv,
            clients: Default::default(),
            checked_out: Default::default(),
            maintenance: Default::default(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Probe all endpoints, seed the rotation queue, and start maintenance.
    ///
    /// Every URL enters the rotation regardless of probe outcome, so a chain
    /// whose endpoints all failed the first probe still recovers through the
    /// switch budget once they come back.
    pub async fn start(&self) -> Result<(), PoolError> {
        if self.urls.is_empty() {
            return Err(PoolError::NoEndpoints(self.chain_id));
        }
        self.probe_all().await?;

        let key = EndpointMetadata::rotation_key(self.chain_id);
        self.kv.delete(&key).await?;
        self.kv
            .push_back(
                &key,
                self.urls
                    .iter()
                    .map(|url| url.to_string().into_bytes())
                    .collect(),
            )
            .await?;

        let pool = self.clone();
        let task = tokio::spawn(async move { pool.maintenance_loop().await });
        *self.maintenance.0.lock() = Some(task);
        Ok(())
    }

    /// Cancel maintenance and drop all cached clients.
    pub async fn stop(&self) {
        if let Some(task) = self.maintenance.0.lock().take() {
            task.abort();
        }
        self.clients.write().clear();
    }

    /// Run `op` with per-endpoint retry and a bounded endpoint switch budget.
    ///
    /// Each endpoint gets `max_retry_count` attempts under linear backoff;
    /// when they are exhausted the endpoint is marked unhealthy and the next
    /// one is acquired, up to `max_rpc_switch_count` endpoints. The endpoint
    /// returns to the rotation tail in every case.
    pub async fn execute_with_retry<T, F, Fut>(&self, op: F) -> Result<T, PoolError>
    where
        F: Fn(PoolClient) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let switches = self.options.max_rpc_switch_count;
        let mut last_error = None;
        for switch in 0..switches {
            let checkout = self.acquire().await?;
            let client = checkout.client.clone();
            match self.try_endpoint(&op, &client).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(
                        chain_id = self.chain_id,
                        url = %client.url,
                        switch,
                        %err,
                        "endpoint exhausted its retries, rotating"
                    );
                    last_error = Some(err);
                },
            }
        }
        Err(PoolError::SwitchBudgetExhausted {
            switches,
            source: last_error.unwrap_or_else(|| anyhow!("endpoint switch budget is zero")),
        })
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), but wraps the
    /// switch-bounded call in an outer backoff (30 s × attempt, capped at
    /// 5 min) and loops until `op` succeeds or `cancel` fires.
    pub async fn execute_forever<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Option<T>
    where
        F: Fn(PoolClient) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        for attempt in 1u32.. {
            if cancel.is_cancelled() {
                return None;
            }
            match self.execute_with_retry(&op).await {
                Ok(value) => return Some(value),
                Err(err) => {
                    let delay = (FOREVER_BACKOFF_BASE * attempt).min(FOREVER_BACKOFF_CAP);
                    tracing::warn!(
                        chain_id = self.chain_id,
                        attempt,
                        ?delay,
                        %err,
                        "pool call failed, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = sleep(delay) => {},
                    }
                },
            }
        }
        None
    }

    /// Pop the next usable endpoint from the rotation.
    ///
    /// Quarantined endpoints (error count over the threshold) are pushed
    /// straight back to the tail. Fails after one full pass over the queue.
    async fn acquire(&self) -> Result<Checkout, PoolError> {
        let key = EndpointMetadata::rotation_key(self.chain_id);
        let attempts = self.kv.list_len(&key).await? as usize;
        for _ in 0..attempts {
            let Some(raw) = self.kv.pop_front(&key, 1).await?.into_iter().next() else {
                break;
            };
            let Some(url) = String::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse::<Url>().ok())
            else {
                // Garbage rotation entries are dropped, not recycled.
                continue;
            };

            let meta = read_metadata(&*self.kv, self.chain_id, &url).await?;
            if meta.as_ref().is_some_and(|m| !m.usable()) {
                self.kv
                    .push_back(&key, vec![url.to_string().into_bytes()])
                    .await?;
                continue;
            }

            self.checked_out.lock().insert(url.clone());
            let guard = PushBackGuard {
                chain_id: self.chain_id,
                url: url.clone(),
                kv: self.kv.clone(),
                checked_out: self.checked_out.clone(),
            };
            let max_safe_range = meta.map_or(MIN_SAFE_RANGE, |m| m.max_safe_range);
            return Ok(Checkout {
                client: PoolClient {
                    provider: self.client(&url),
                    url,
                    max_safe_range,
                },
                _guard: guard,
            });
        }
        Err(PoolError::NoUsableEndpoint {
            chain_id: self.chain_id,
            attempts,
        })
    }

    async fn try_endpoint<T, F, Fut>(&self, op: &F, client: &PoolClient) -> anyhow::Result<T>
    where
        F: Fn(PoolClient) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let retries = self.options.max_retry_count.max(1);
        let mut last_error = None;
        for attempt in 1..=retries {
            match op(client.clone()).await {
                Ok(value) => {
                    self.mark_success(&client.url).await;
                    return Ok(value);
                },
                Err(err) => {
                    self.mark_failure(&client.url, &err).await;
                    tracing::debug!(
                        chain_id = self.chain_id,
                        url = %client.url,
                        attempt,
                        %err,
                        "endpoint attempt failed"
                    );
                    last_error = Some(err);
                    if attempt < retries {
                        sleep(Duration::from_secs(attempt as u64)).await;
                    }
                },
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("no attempt made")))
    }

    fn client(&self, url: &Url) -> RpcProvider {
        if let Some(client) = self.clients.read().get(url) {
            return client.clone();
        }
        self.clients
            .write()
            .entry(url.clone())
            .or_insert_with(|| build_provider(url))
            .clone()
    }

    async fn mark_success(&self, url: &Url) {
        let mut meta = match read_metadata(&*self.kv, self.chain_id, url).await {
            Ok(meta) => meta.unwrap_or_else(|| EndpointMetadata::new(self.chain_id, url.clone())),
            Err(err) => {
                tracing::warn!(%url, %err, "failed to read endpoint metadata");
                return;
            },
        };
        meta.record_success();
        if let Err(err) = write_metadata(&*self.kv, &meta).await {
            tracing::warn!(%url, %err, "failed to write endpoint metadata");
        }
    }

    async fn mark_failure(&self, url: &Url, error: &anyhow::Error) {
        let mut meta = match read_metadata(&*self.kv, self.chain_id, url).await {
            Ok(meta) => meta.unwrap_or_else(|| EndpointMetadata::new(self.chain_id, url.clone())),
            Err(err) => {
                tracing::warn!(%url, %err, "failed to read endpoint metadata");
                return;
            },
        };
        meta.record_failure(error);
        if let Err(err) = write_metadata(&*self.kv, &meta).await {
            tracing::warn!(%url, %err, "failed to write endpoint metadata");
        }
    }

    async fn probe_all(&self) -> anyhow::Result<()> {
        let results = join_all(
            self.urls
                .iter()
                .map(|url| probe_endpoint(self.chain_id, url)),
        )
        .await;
        for meta in &results {
            write_metadata(&*self.kv, meta).await?;
        }
        let healthy = results.iter().filter(|m| m.healthy).count();
        tracing::info!(
            chain_id = self.chain_id,
            healthy,
            total = results.len(),
            "probed endpoints"
        );
        Ok(())
    }

    async fn maintenance_loop(&self) {
        loop {
            sleep(self.options.health_check_interval).await;
            match timeout(MAINTENANCE_TIMEOUT, self.run_maintenance()).await {
                Ok(Ok(())) => {},
                Ok(Err(err)) => {
                    tracing::warn!(chain_id = self.chain_id, %err, "maintenance pass failed");
                },
                Err(_) => {
                    tracing::warn!(chain_id = self.chain_id, "maintenance pass timed out");
                },
            }
        }
    }

    async fn run_maintenance(&self) -> anyhow::Result<()> {
        self.probe_all().await?;

        // Restore rotation entries lost to a crash between pop and
        // push-back. Endpoints currently checked out are skipped so they
        // don't end up in the queue twice.
        let key = EndpointMetadata::rotation_key(self.chain_id);
        let present: HashSet<String> = self
            .kv
            .list_all(&key)
            .await?
            .into_iter()
            .filter_map(|raw| String::from_utf8(raw).ok())
            .collect();
        let checked_out = self.checked_out.lock().clone();
        let missing: Vec<Vec<u8>> = self
            .urls
            .iter()
            .filter(|url| !present.contains(url.as_str()) && !checked_out.contains(url))
            .map(|url| url.to_string().into_bytes())
            .collect();
        if !missing.is_empty() {
            tracing::info!(
                chain_id = self.chain_id,
                restored = missing.len(),
                "restoring lost rotation entries"
            );
            self.kv.push_back(&key, missing).await?;
        }
        Ok(())
    }
}
