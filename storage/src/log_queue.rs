use std::sync::Arc;

use timelock_types::RawLogRecord;

use crate::kv::KvStore;

/// Per-chain append-only queue of raw log records, durable in the k/v store.
///
/// Serialization happens here; the store only sees opaque blobs.
#[derive(Clone)]
pub struct LogQueue {
    kv: Arc<dyn KvStore>,
}

impl LogQueue {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn key(chain_id: u64) -> String {
        format!("chain:{chain_id}:logs")
    }

    /// Append a batch to the tail in a single round trip.
    pub async fn push(&self, chain_id: u64, records: &[RawLogRecord]) -> anyhow::Result<()> {
        let blobs = records
            .iter()
            .map(serde_json::to_vec)
            .collect::<Result<Vec<_>, _>>()?;
        self.kv.push_back(&Self::key(chain_id), blobs).await
    }

    /// Remove and return up to `max` records from the head. Records that no
    /// longer deserialize are dropped with a warning; they have already left
    /// the queue.
    pub async fn pop(&self, chain_id: u64, max: usize) -> anyhow::Result<Vec<RawLogRecord>> {
        let blobs = self.kv.pop_front(&Self::key(chain_id), max).await?;
        let mut records = Vec::with_capacity(blobs.len());
        for blob in blobs {
            match serde_json::from_slice(&blob) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(chain_id, %err, "dropping undecodable log queue record");
                },
            }
        }
        Ok(records)
    }

    pub async fn len(&self, chain_id: u64) -> anyhow::Result<u64> {
        self.kv.list_len(&Self::key(chain_id)).await
    }

    /// Read up to `max` records from the head without consuming them.
    pub async fn peek(&self, chain_id: u64, max: usize) -> anyhow::Result<Vec<RawLogRecord>> {
        let blobs = self.kv.peek_front(&Self::key(chain_id), max).await?;
        Ok(blobs
            .iter()
            .filter_map(|blob| serde_json::from_slice(blob).ok())
            .collect())
    }
}

#[cfg(test)]
mod test {
    use alloy::primitives::{Address, Bytes, B256};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::kv::MemoryKv;

    fn record(block: u64, log_index: u64) -> RawLogRecord {
        RawLogRecord {
            chain_id: 1,
            block_number: block,
            block_hash: Some(B256::repeat_byte(1)),
            tx_hash: B256::repeat_byte(2),
            log_index,
            contract_address: Address::ZERO,
            topics: vec![B256::repeat_byte(3)],
            data: Bytes::from(vec![0xaa]),
            block_timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_push_pop_round_trip() {
        let queue = LogQueue::new(Arc::new(MemoryKv::new()));
        let records = vec![record(10, 0), record(10, 1), record(11, 0)];
        queue.push(1, &records).await.unwrap();
        assert_eq!(queue.len(1).await.unwrap(), 3);

        // Records come back in block order, a bounded batch at a time.
        assert_eq!(queue.peek(1, 1).await.unwrap(), vec![record(10, 0)]);
        assert_eq!(queue.pop(1, 2).await.unwrap(), vec![
            record(10, 0),
            record(10, 1)
        ]);
        assert_eq!(queue.pop(1, 2).await.unwrap(), vec![record(11, 0)]);
        assert_eq!(queue.len(1).await.unwrap(), 0);

        // Queues are per chain.
        queue.push(5, &records[..1]).await.unwrap();
        assert_eq!(queue.len(1).await.unwrap(), 0);
        assert_eq!(queue.len(5).await.unwrap(), 1);
    }
}
