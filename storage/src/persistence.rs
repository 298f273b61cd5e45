//! Relational persistence for the monitor.
//!
//! The trait below is the scanner's and dispatcher's only view of the
//! relational store. The `sql` module implements it on Postgres; `memory`
//! is a faithful in-process stand-in used by tests and development runs.

use alloy::primitives::Address;
use async_trait::async_trait;
use timelock_types::{
    ChainMetadata, ContractRole, DeliveryKey, DeliveryRecord, Flow, FlowKey, NotificationConfig,
    ScanProgress, TimelockEvent, TimelockStandard,
};

pub mod memory;
pub mod sql;

#[async_trait]
pub trait Persistence: Send + Sync + 'static {
    /// Chains the monitor should run on, optionally excluding testnets.
    async fn active_chains(&self, include_testnets: bool) -> anyhow::Result<Vec<ChainMetadata>>;

    /// Display metadata for one chain.
    async fn chain_metadata(&self, chain_id: u64) -> anyhow::Result<Option<ChainMetadata>>;

    /// Operator-facing remark attached to a timelock contract.
    async fn timelock_remark(
        &self,
        standard: TimelockStandard,
        chain_id: u64,
        contract_address: Address,
    ) -> anyhow::Result<Option<String>>;

    async fn scan_progress(&self, chain_id: u64) -> anyhow::Result<Option<ScanProgress>>;

    async fn upsert_scan_progress(&self, progress: &ScanProgress) -> anyhow::Result<()>;

    /// Record a decoded event in the per-standard transaction table.
    /// Idempotent on transaction hash.
    async fn record_event(&self, event: &TimelockEvent) -> anyhow::Result<()>;

    async fn flow(&self, key: &FlowKey) -> anyhow::Result<Option<Flow>>;

    async fn upsert_flow(&self, flow: &Flow) -> anyhow::Result<()>;

    /// Waiting flows whose eta has passed at `now` (unix seconds).
    async fn waiting_flows_due(&self, now: u64, limit: usize) -> anyhow::Result<Vec<Flow>>;

    /// Ready Compound flows past their grace period at `now` (unix seconds).
    async fn ready_flows_expired(&self, now: u64, limit: usize) -> anyhow::Result<Vec<Flow>>;

    /// Mark `user_address` as related to a timelock contract. Existing rows
    /// are re-activated.
    async fn upsert_relation(
        &self,
        standard: TimelockStandard,
        chain_id: u64,
        contract_address: Address,
        user_address: &str,
        role: ContractRole,
    ) -> anyhow::Result<()>;

    /// Active user addresses related to a timelock contract.
    async fn subscribers(
        &self,
        standard: TimelockStandard,
        chain_id: u64,
        contract_address: Address,
    ) -> anyhow::Result<Vec<String>>;

    /// A user's active notification configs across all channels.
    async fn active_configs(&self, user_address: &str) -> anyhow::Result<Vec<NotificationConfig>>;

    /// Whether a successful delivery already exists for this idempotency key.
    async fn delivery_succeeded(&self, key: &DeliveryKey) -> anyhow::Result<bool>;

    /// Append a delivery attempt. At most one row exists per idempotency key;
    /// a later attempt for the same key overwrites a failed row but a
    /// successful row is never downgraded.
    async fn append_delivery(&self, record: &DeliveryRecord) -> anyhow::Result<()>;

    /// Append an opaque error log row.
    async fn append_error(&self, scope: &str, message: &str) -> anyhow::Result<()>;
}
