use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use parking_lot::Mutex;
use timelock_types::{
    ChainMetadata, ContractRole, DeliveryKey, DeliveryRecord, DeliveryStatus, Flow, FlowKey,
    NotificationConfig, ScanProgress, TimelockEvent, TimelockStandard,
};

use super::Persistence;

/// In-process persistence with the same observable semantics as the SQL
/// implementation, including the delivery-log uniqueness gate.
#[derive(Clone, Default)]
pub struct MemoryPersistence {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    chains: BTreeMap<u64, ChainMetadata>,
    remarks: HashMap<(TimelockStandard, u64, Address), String>,
    progress: HashMap<u64, ScanProgress>,
    events: HashMap<(TimelockStandard, B256), TimelockEvent>,
    flows: BTreeMap<String, Flow>,
    relations: HashMap<(TimelockStandard, u64, Address), BTreeMap<String, HashSet<ContractRole>>>,
    configs: HashMap<String, Vec<NotificationConfig>>,
    deliveries: HashMap<DeliveryKey, DeliveryRecord>,
    errors: Vec<(String, String)>,
}

fn flow_key(key: &FlowKey) -> String {
    format!(
        "{}:{}:{:#x}:{:#x}",
        key.standard, key.chain_id, key.contract_address, key.flow_id
    )
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_chain(&self, chain: ChainMetadata) {
        self.inner.lock().chains.insert(chain.chain_id, chain);
    }

    pub fn insert_remark(
        &self,
        standard: TimelockStandard,
        chain_id: u64,
        contract_address: Address,
        remark: impl Into<String>,
    ) {
        self.inner
            .lock()
            .remarks
            .insert((standard, chain_id, contract_address), remark.into());
    }

    pub fn insert_config(&self, config: NotificationConfig) {
        self.inner
            .lock()
            .configs
            .entry(config.user_address.clone())
            .or_default()
            .push(config);
    }

    /// All delivery rows, for assertions.
    pub fn deliveries(&self) -> Vec<DeliveryRecord> {
        self.inner.lock().deliveries.values().cloned().collect()
    }

    /// All recorded events, for assertions.
    pub fn events(&self) -> Vec<TimelockEvent> {
        self.inner.lock().events.values().cloned().collect()
    }

    /// All error rows, for assertions.
    pub fn errors(&self) -> Vec<(String, String)> {
        self.inner.lock().errors.clone()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn active_chains(&self, include_testnets: bool) -> anyhow::Result<Vec<ChainMetadata>> {
        Ok(self
            .inner
            .lock()
            .chains
            .values()
            .filter(|c| include_testnets || !c.is_testnet)
            .cloned()
            .collect())
    }

    async fn chain_metadata(&self, chain_id: u64) -> anyhow::Result<Option<ChainMetadata>> {
        Ok(self.inner.lock().chains.get(&chain_id).cloned())
    }

    async fn timelock_remark(
        &self,
        standard: TimelockStandard,
        chain_id: u64,
        contract_address: Address,
    ) -> anyhow::Result<Option<String>> {
        Ok(self
            .inner
            .lock()
            .remarks
            .get(&(standard, chain_id, contract_address))
            .cloned())
    }

    async fn scan_progress(&self, chain_id: u64) -> anyhow::Result<Option<ScanProgress>> {
        Ok(self.inner.lock().progress.get(&chain_id).cloned())
    }

    async fn upsert_scan_progress(&self, progress: &ScanProgress) -> anyhow::Result<()> {
        self.inner
            .lock()
            .progress
            .insert(progress.chain_id, progress.clone());
        Ok(())
    }

    async fn record_event(&self, event: &TimelockEvent) -> anyhow::Result<()> {
        self.inner
            .lock()
            .events
            .entry((event.standard(), event.tx_hash))
            .or_insert_with(|| event.clone());
        Ok(())
    }

    async fn flow(&self, key: &FlowKey) -> anyhow::Result<Option<Flow>> {
        Ok(self.inner.lock().flows.get(&flow_key(key)).cloned())
    }

    async fn upsert_flow(&self, flow: &Flow) -> anyhow::Result<()> {
        self.inner
            .lock()
            .flows
            .insert(flow_key(&flow.key), flow.clone());
        Ok(())
    }

    async fn waiting_flows_due(&self, now: u64, limit: usize) -> anyhow::Result<Vec<Flow>> {
        Ok(self
            .inner
            .lock()
            .flows
            .values()
            .filter(|f| f.ready_due(now))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ready_flows_expired(&self, now: u64, limit: usize) -> anyhow::Result<Vec<Flow>> {
        Ok(self
            .inner
            .lock()
            .flows
            .values()
            .filter(|f| f.expired_due(now))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert_relation(
        &self,
        standard: TimelockStandard,
        chain_id: u64,
        contract_address: Address,
        user_address: &str,
        role: ContractRole,
    ) -> anyhow::Result<()> {
        self.inner
            .lock()
            .relations
            .entry((standard, chain_id, contract_address))
            .or_default()
            .entry(user_address.to_string())
            .or_default()
            .insert(role);
        Ok(())
    }

    async fn subscribers(
        &self,
        standard: TimelockStandard,
        chain_id: u64,
        contract_address: Address,
    ) -> anyhow::Result<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .relations
            .get(&(standard, chain_id, contract_address))
            .map_or_else(Vec::new, |users| users.keys().cloned().collect()))
    }

    async fn active_configs(&self, user_address: &str) -> anyhow::Result<Vec<NotificationConfig>> {
        Ok(self
            .inner
            .lock()
            .configs
            .get(user_address)
            .map_or_else(Vec::new, |configs| {
                configs.iter().filter(|c| c.is_active).cloned().collect()
            }))
    }

    async fn delivery_succeeded(&self, key: &DeliveryKey) -> anyhow::Result<bool> {
        Ok(self
            .inner
            .lock()
            .deliveries
            .get(key)
            .is_some_and(|row| row.status == DeliveryStatus::Success))
    }

    async fn append_delivery(&self, record: &DeliveryRecord) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        match inner.deliveries.get(&record.key) {
            // Never downgrade a successful row.
            Some(existing) if existing.status == DeliveryStatus::Success => {},
            _ => {
                inner.deliveries.insert(record.key.clone(), record.clone());
            },
        }
        Ok(())
    }

    async fn append_error(&self, scope: &str, message: &str) -> anyhow::Result<()> {
        self.inner
            .lock()
            .errors
            .push((scope.to_string(), message.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use timelock_types::{Channel, FlowStatus};

    use super::*;

    fn delivery(status: DeliveryStatus) -> DeliveryRecord {
        DeliveryRecord {
            key: DeliveryKey {
                channel: Channel::Telegram,
                user_address: "0xuser".into(),
                config_id: 1,
                flow_id: B256::repeat_byte(0xaa),
                status_to: FlowStatus::Executed,
            },
            status,
            error: None,
            sent_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_delivery_uniqueness_gate() {
        let store = MemoryPersistence::new();
        let key = delivery(DeliveryStatus::Failed).key;

        assert!(!store.delivery_succeeded(&key).await.unwrap());

        // A failed attempt records a row but does not trip the gate.
        store
            .append_delivery(&delivery(DeliveryStatus::Failed))
            .await
            .unwrap();
        assert!(!store.delivery_succeeded(&key).await.unwrap());

        // A retry may overwrite the failed row.
        store
            .append_delivery(&delivery(DeliveryStatus::Success))
            .await
            .unwrap();
        assert!(store.delivery_succeeded(&key).await.unwrap());
        assert_eq!(store.deliveries().len(), 1);

        // A successful row is never replaced.
        store
            .append_delivery(&delivery(DeliveryStatus::Failed))
            .await
            .unwrap();
        assert!(store.delivery_succeeded(&key).await.unwrap());
        assert_eq!(store.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn test_relation_dedup() {
        let store = MemoryPersistence::new();
        let contract = Address::repeat_byte(0xc0);
        for role in [ContractRole::Proposer, ContractRole::Executor] {
            store
                .upsert_relation(TimelockStandard::Compound, 1, contract, "0xalice", role)
                .await
                .unwrap();
        }
        store
            .upsert_relation(
                TimelockStandard::Compound,
                1,
                contract,
                "0xbob",
                ContractRole::Proposer,
            )
            .await
            .unwrap();

        let mut subs = store
            .subscribers(TimelockStandard::Compound, 1, contract)
            .await
            .unwrap();
        subs.sort();
        assert_eq!(subs, vec!["0xalice".to_string(), "0xbob".to_string()]);

        // Relations are scoped to the (standard, chain, contract) triple.
        assert!(store
            .subscribers(TimelockStandard::OpenZeppelin, 1, contract)
            .await
            .unwrap()
            .is_empty());
    }
}
