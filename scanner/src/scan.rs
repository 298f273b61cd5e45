use std::{sync::Arc, time::Duration};

use alloy::{providers::Provider, rpc::types::Filter};
use anyhow::Context;
use chrono::Utc;
use timelock_rpc_pool::PoolSupervisor;
use timelock_storage::{LogQueue, Persistence};
use timelock_types::{RawLogRecord, ScanProgress, ScanStatus, ScannerOptions};
use tokio_util::sync::CancellationToken;

use crate::{decoder, projector::FlowProjector};

/// Outer budget for one producer round, including all retries and switches.
const PRODUCER_ROUND_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Back-off after a fatal producer round.
const PRODUCER_ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Consumer wake interval while the queue is empty.
const CONSUMER_IDLE_WAIT: Duration = Duration::from_secs(1);

/// Back-off after the consumer fails to reach the queue at all.
const CONSUMER_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// The next block range to scan, or `None` when there is nothing safe to
/// fetch yet.
///
/// The range never extends past `head - confirmations`, never spans more
/// than the endpoint's `max_safe_range`, and is additionally capped by
/// `near_cap` once the cursor is within `threshold` blocks of the head.
fn next_range(
    last_scanned: u64,
    head: u64,
    confirmations: u64,
    max_safe_range: u64,
    near_cap: u64,
    threshold: u64,
) -> Option<(u64, u64)> {
    let from = last_scanned + 1;
    if from > head {
        return None;
    }
    let safe_head = head.saturating_sub(confirmations);
    let lag = head - last_scanned;
    let span = if lag > threshold {
        max_safe_range
    } else {
        max_safe_range.min(near_cap)
    };
    let to = (from + span.max(1) - 1).min(safe_head);
    (to >= from).then_some((from, to))
}

enum Round {
    Scanned { head: u64, to: u64, enqueued: usize },
    UpToDate { head: u64 },
}

/// Producer/consumer pair for one chain.
///
/// The producer advances the durable cursor and fills the log queue; the
/// consumer drains the queue through the decoder into the projector. Both
/// share one cancellation token, and stopping persists a final `paused`
/// status.
pub struct ChainScanner {
    chain_id: u64,
    supervisor: Arc<PoolSupervisor>,
    store: Arc<dyn Persistence>,
    queue: LogQueue,
    projector: Arc<FlowProjector>,
    options: ScannerOptions,
    cancel: CancellationToken,
}

impl ChainScanner {
    pub fn new(
        chain_id: u64,
        supervisor: Arc<PoolSupervisor>,
        store: Arc<dyn Persistence>,
        queue: LogQueue,
        projector: Arc<FlowProjector>,
        options: ScannerOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            chain_id,
            supervisor,
            store,
            queue,
            projector,
            options,
            cancel,
        }
    }

    /// Run both loops until cancellation, then persist the `paused` status.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.ensure_progress().await?;
        tokio::join!(self.producer_loop(), self.consumer_loop());

        if let Some(mut progress) = self.store.scan_progress(self.chain_id).await? {
            progress.status = ScanStatus::Paused;
            progress.updated_at = Utc::now();
            self.store.upsert_scan_progress(&progress).await?;
        }
        tracing::info!(chain_id = self.chain_id, "scanner stopped");
        Ok(())
    }

    /// Initialise the cursor at the current head for a chain scanned for the
    /// first time.
    async fn ensure_progress(&self) -> anyhow::Result<()> {
        if self.store.scan_progress(self.chain_id).await?.is_some() {
            return Ok(());
        }
        let head = self
            .supervisor
            .execute_forever(self.chain_id, &self.cancel, |client| async move {
                Ok(client.provider.get_block_number().await?)
            })
            .await?;
        let Some(head) = head else {
            // Cancelled before the chain ever answered.
            return Ok(());
        };
        tracing::info!(chain_id = self.chain_id, head, "initialising scan cursor");
        self.store
            .upsert_scan_progress(&ScanProgress::new(self.chain_id, head.saturating_sub(1)))
            .await
    }

    async fn producer_loop(&self) {
        while !self.cancel.is_cancelled() {
            match self.produce_round().await {
                Ok(lag) => {
                    let interval = if lag > self.options.near_latest_threshold {
                        self.options.near_latest_wait_time
                    } else {
                        self.options.scan_interval_slow
                    };
                    self.idle(interval).await;
                },
                Err(err) => {
                    tracing::error!(chain_id = self.chain_id, err = %format!("{err:#}"), "scan round failed");
                    self.set_error_status(&err).await;
                    self.idle(PRODUCER_ERROR_BACKOFF).await;
                },
            }
        }
    }

    /// One producer round: fetch the head, scan at most one range, enqueue
    /// its logs, and persist the cursor. Returns the remaining lag.
    async fn produce_round(&self) -> anyhow::Result<u64> {
        let progress = self
            .store
            .scan_progress(self.chain_id)
            .await?
            .context("scan progress row missing")?;

        let chain_id = self.chain_id;
        let last_scanned = progress.last_scanned_block;
        let confirmations = self.options.scan_confirmations;
        let near_cap = self.options.scan_batch_size_slow;
        let threshold = self.options.near_latest_threshold;
        let queue = self.queue.clone();
        let store = self.store.clone();

        let round = tokio::time::timeout(
            PRODUCER_ROUND_TIMEOUT,
            self.supervisor.execute_with_retry(chain_id, move |client| {
                let queue = queue.clone();
                let store = store.clone();
                async move {
                    let head = client.provider.get_block_number().await?;
                    let Some((from, to)) = next_range(
                        last_scanned,
                        head,
                        confirmations,
                        client.max_safe_range,
                        near_cap,
                        threshold,
                    ) else {
                        // Nothing safe to scan; still record the head and
                        // flip paused/error back to running.
                        store
                            .upsert_scan_progress(&ScanProgress {
                                chain_id,
                                last_scanned_block: last_scanned,
                                latest_network_block: head,
                                status: ScanStatus::Running,
                                error: None,
                                updated_at: Utc::now(),
                            })
                            .await?;
                        return Ok(Round::UpToDate { head });
                    };

                    let filter = Filter::new().from_block(from).to_block(to);
                    let logs = client.provider.get_logs(&filter).await?;
                    let records: Vec<RawLogRecord> = logs
                        .iter()
                        .filter_map(|log| RawLogRecord::from_rpc(chain_id, log))
                        .collect();
                    queue.push(chain_id, &records).await?;
                    store
                        .upsert_scan_progress(&ScanProgress {
                            chain_id,
                            last_scanned_block: to,
                            latest_network_block: head,
                            status: ScanStatus::Running,
                            error: None,
                            updated_at: Utc::now(),
                        })
                        .await?;
                    Ok(Round::Scanned {
                        head,
                        to,
                        enqueued: records.len(),
                    })
                }
            }),
        )
        .await
        .context("producer round timed out")??;

        match round {
            Round::Scanned { head, to, enqueued } => {
                tracing::debug!(
                    chain_id = self.chain_id,
                    to,
                    head,
                    enqueued,
                    "scanned block range"
                );
                Ok(head.saturating_sub(to))
            },
            Round::UpToDate { head } => {
                tracing::trace!(chain_id = self.chain_id, head, "nothing to scan");
                Ok(head.saturating_sub(progress.last_scanned_block))
            },
        }
    }

    async fn set_error_status(&self, error: &anyhow::Error) {
        let progress = match self.store.scan_progress(self.chain_id).await {
            Ok(Some(progress)) => progress,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(chain_id = self.chain_id, %err, "failed to load progress");
                return;
            },
        };
        let update = ScanProgress {
            status: ScanStatus::Error,
            error: Some(format!("{error:#}")),
            updated_at: Utc::now(),
            ..progress
        };
        if let Err(err) = self.store.upsert_scan_progress(&update).await {
            tracing::warn!(chain_id = self.chain_id, %err, "failed to persist error status");
        }
    }

    async fn consumer_loop(&self) {
        while !self.cancel.is_cancelled() {
            match self.consume_batch().await {
                Ok(0) => self.idle(CONSUMER_IDLE_WAIT).await,
                Ok(_) => {},
                Err(err) => {
                    tracing::error!(chain_id = self.chain_id, err = %format!("{err:#}"), "consumer pass failed");
                    self.idle(CONSUMER_ERROR_BACKOFF).await;
                },
            }
        }
    }

    /// Drain one batch from the durable queue. A record failing to decode or
    /// project is logged and dropped; it has already left the queue.
    async fn consume_batch(&self) -> anyhow::Result<usize> {
        let records = self
            .queue
            .pop(self.chain_id, self.options.log_queue_batch_size)
            .await?;
        for record in &records {
            if let Err(err) = self.process_record(record).await {
                tracing::warn!(
                    chain_id = self.chain_id,
                    tx = %record.tx_hash,
                    log_index = record.log_index,
                    err = %format!("{err:#}"),
                    "dropping log record"
                );
                let _ = self
                    .store
                    .append_error(
                        "scanner.consumer",
                        &format!(
                            "chain {}: tx {:#x} log {}: {err:#}",
                            self.chain_id, record.tx_hash, record.log_index
                        ),
                    )
                    .await;
            }
        }
        Ok(records.len())
    }

    async fn process_record(&self, record: &RawLogRecord) -> anyhow::Result<()> {
        let kind = match decoder::decode_payload(record) {
            Ok(Some(kind)) => kind,
            Ok(None) => {
                tracing::trace!(
                    chain_id = self.chain_id,
                    tx = %record.tx_hash,
                    "not a timelock event, skipping"
                );
                return Ok(());
            },
            Err(err) => {
                tracing::debug!(
                    chain_id = self.chain_id,
                    tx = %record.tx_hash,
                    %err,
                    "recognised topic with undecodable body, skipping"
                );
                return Ok(());
            },
        };

        let record = record.clone();
        let event = self
            .supervisor
            .execute_with_retry(self.chain_id, move |client| {
                let record = record.clone();
                let kind = kind.clone();
                async move { decoder::resolve_event(&record, kind, &client.provider).await }
            })
            .await?;
        let Some(event) = event else {
            return Ok(());
        };
        self.projector.apply(&event).await
    }

    async fn idle(&self, duration: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {},
            _ = tokio::time::sleep(duration) => {},
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_near_head_throttle() {
        // latest = 1_000_000, last = 999_998, confirmations = 3: the safe
        // head is behind the cursor, so nothing is scanned.
        assert_eq!(next_range(999_998, 1_000_000, 3, 2_000, 100, 100), None);

        // Once the head advances to 1_000_010 the next round covers
        // [999_999, 1_000_007].
        assert_eq!(
            next_range(999_998, 1_000_010, 3, 2_000, 100, 100),
            Some((999_999, 1_000_007)),
        );
    }

    #[test]
    fn test_span_respects_endpoint_capability() {
        // An endpoint probed at 500 never sees a wider request, even far
        // behind the head.
        let (from, to) = next_range(10_000, 100_000, 3, 500, 100, 100).unwrap();
        assert_eq!((from, to), (10_001, 10_500));
        assert!(to - from + 1 <= 500);

        // Capability 100 keeps the span at 100.
        let (from, to) = next_range(10_000, 100_000, 3, 100, 100, 100).unwrap();
        assert_eq!(to - from + 1, 100);
    }

    #[test]
    fn test_near_head_uses_slow_batch_cap() {
        // Within the threshold the span shrinks to the slow cap.
        let (from, to) = next_range(99_950, 100_000, 3, 50_000, 20, 100).unwrap();
        assert_eq!(from, 99_951);
        assert_eq!(to, 99_970);

        // Far behind, the full capability is used.
        let (from, to) = next_range(0, 100_000, 3, 50_000, 20, 100).unwrap();
        assert_eq!((from, to), (1, 50_000));
    }

    #[test]
    fn test_cursor_past_head_is_a_noop() {
        assert_eq!(next_range(100, 100, 3, 2_000, 100, 100), None);
        assert_eq!(next_range(100, 50, 3, 2_000, 100, 100), None);
    }
}
