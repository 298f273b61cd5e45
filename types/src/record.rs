use alloy::{
    primitives::{Address, Bytes, B256},
    rpc::types::Log,
};
use serde::{Deserialize, Serialize};

/// A raw log as fetched from an endpoint, serialized into the durable queue.
///
/// `block_timestamp` may be unknown at enqueue time; the decoder resolves it
/// from the block header when absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogRecord {
    pub chain_id: u64,
    pub block_number: u64,
    pub block_hash: Option<B256>,
    pub tx_hash: B256,
    pub log_index: u64,
    pub contract_address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_timestamp: Option<u64>,
}

impl RawLogRecord {
    /// Convert an RPC log. Returns `None` for pending logs that are missing
    /// their inclusion coordinates.
    pub fn from_rpc(chain_id: u64, log: &Log) -> Option<Self> {
        Some(Self {
            chain_id,
            block_number: log.block_number?,
            block_hash: log.block_hash,
            tx_hash: log.transaction_hash?,
            log_index: log.log_index?,
            contract_address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
            block_timestamp: log.block_timestamp,
        })
    }

    pub fn topic0(&self) -> Option<B256> {
        self.topics.first().copied()
    }
}
