use std::{collections::HashMap, future::Future, sync::Arc};

use futures::{stream, StreamExt};
use parking_lot::RwLock;
use timelock_storage::KvStore;
use timelock_types::{ChainMetadata, RpcPoolOptions};
use tokio_util::sync::CancellationToken;

use crate::{pool::PoolClient, EndpointPool, PoolError};

/// How many pools are initialised concurrently on start-up.
const STARTUP_CONCURRENCY: usize = 5;

/// Process-wide owner of one [`EndpointPool`] per enabled chain.
pub struct PoolSupervisor {
    options: RpcPoolOptions,
    kv: Arc<dyn KvStore>,
    pools: RwLock<HashMap<u64, EndpointPool>>,
}

impl PoolSupervisor {
    pub fn new(options: RpcPoolOptions, kv: Arc<dyn KvStore>) -> Self {
        Self {
            options,
            kv,
            pools: Default::default(),
        }
    }

    /// Build and start one pool per chain, at most [`STARTUP_CONCURRENCY`] at
    /// a time. A chain without configured endpoints aborts start-up.
    pub async fn start(&self, chains: &[ChainMetadata]) -> Result<(), PoolError> {
        let started: Vec<(u64, EndpointPool)> = stream::iter(chains)
            .map(|chain| {
                let pool = EndpointPool::new(
                    chain.chain_id,
                    chain.official_rpcs.clone(),
                    self.options.clone(),
                    self.kv.clone(),
                );
                async move {
                    pool.start().await?;
                    Ok::<_, PoolError>((pool.chain_id(), pool))
                }
            })
            .buffer_unordered(STARTUP_CONCURRENCY)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;

        let mut pools = self.pools.write();
        for (chain_id, pool) in started {
            pools.insert(chain_id, pool);
        }
        tracing::info!(chains = pools.len(), "endpoint pools started");
        Ok(())
    }

    /// Register an externally constructed pool, mainly for tests.
    pub fn insert_pool(&self, pool: EndpointPool) {
        self.pools.write().insert(pool.chain_id(), pool);
    }

    pub fn pool(&self, chain_id: u64) -> Result<EndpointPool, PoolError> {
        self.pools
            .read()
            .get(&chain_id)
            .cloned()
            .ok_or(PoolError::NoPool(chain_id))
    }

    /// Routed [`EndpointPool::execute_with_retry`].
    pub async fn execute_with_retry<T, F, Fut>(&self, chain_id: u64, op: F) -> Result<T, PoolError>
    where
        F: Fn(PoolClient) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.pool(chain_id)?.execute_with_retry(op).await
    }

    /// Routed [`EndpointPool::execute_forever`].
    pub async fn execute_forever<T, F, Fut>(
        &self,
        chain_id: u64,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<Option<T>, PoolError>
    where
        F: Fn(PoolClient) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        Ok(self.pool(chain_id)?.execute_forever(cancel, op).await)
    }

    pub async fn stop(&self) {
        let pools: Vec<_> = self.pools.write().drain().map(|(_, pool)| pool).collect();
        for pool in pools {
            pool.stop().await;
        }
        tracing::info!("endpoint pools stopped");
    }
}

#[cfg(test)]
mod test {
    use timelock_storage::MemoryKv;

    use super::*;

    #[tokio::test]
    async fn test_unknown_chain_is_a_distinguished_error() {
        let supervisor = PoolSupervisor::new(RpcPoolOptions::default(), Arc::new(MemoryKv::new()));
        assert!(matches!(
            supervisor.pool(42).err(),
            Some(PoolError::NoPool(42))
        ));

        let err = supervisor
            .execute_with_retry(7, |_client| async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no pool for chain 7");
    }

    #[tokio::test]
    async fn test_startup_rejects_chain_without_endpoints() {
        let supervisor = PoolSupervisor::new(RpcPoolOptions::default(), Arc::new(MemoryKv::new()));
        let chain = ChainMetadata {
            chain_id: 99,
            name: "Emptynet".into(),
            native_symbol: "ETH".into(),
            native_decimals: 18,
            block_explorer_urls: vec![],
            official_rpcs: vec![],
            is_testnet: true,
        };
        match supervisor.start(std::slice::from_ref(&chain)).await {
            Err(PoolError::NoEndpoints(99)) => {},
            other => panic!("unexpected: {other:?}"),
        }
    }
}
