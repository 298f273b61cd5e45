use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use timelock_storage::Persistence;
use timelock_types::{
    DeliveryKey, DeliveryRecord, DeliveryStatus, FlowTransition, TransitionConsumer,
};

use crate::{channels::ChannelSender, render};

/// Fan-out of a single flow transition to every subscriber's channels.
///
/// Deliveries are gated by the notification log's uniqueness key; the
/// dispatcher never retries a failed send, it only records the attempt.
pub struct Dispatcher {
    store: Arc<dyn Persistence>,
    sender: Arc<dyn ChannelSender>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Persistence>, sender: Arc<dyn ChannelSender>) -> Self {
        Self { store, sender }
    }

    pub async fn dispatch(&self, transition: &FlowTransition) -> anyhow::Result<()> {
        let key = &transition.key;
        let subscribers = self
            .store
            .subscribers(key.standard, key.chain_id, key.contract_address)
            .await?;
        if subscribers.is_empty() {
            return Ok(());
        }

        let chain = self.store.chain_metadata(key.chain_id).await?;
        let remark = self
            .store
            .timelock_remark(key.standard, key.chain_id, key.contract_address)
            .await?;
        let Some(flow) = self.store.flow(key).await? else {
            // The projection is gone; there is nothing to describe.
            return Ok(());
        };

        let text = render::render_message(&flow, transition, chain.as_ref(), remark.as_deref());

        for user in &subscribers {
            let configs = match self.store.active_configs(user).await {
                Ok(configs) => configs,
                Err(err) => {
                    tracing::warn!(%user, %err, "failed to load notification configs");
                    continue;
                },
            };
            for config in configs {
                let delivery_key = DeliveryKey {
                    channel: config.channel,
                    user_address: user.clone(),
                    config_id: config.id,
                    flow_id: key.flow_id,
                    status_to: transition.to,
                };
                match self.store.delivery_succeeded(&delivery_key).await {
                    Ok(true) => {
                        tracing::debug!(
                            %user,
                            config = config.id,
                            flow = %key.flow_id,
                            status_to = transition.to.as_str(),
                            "already delivered, skipping"
                        );
                        continue;
                    },
                    Ok(false) => {},
                    Err(err) => {
                        tracing::warn!(%user, config = config.id, %err, "idempotency check failed");
                        continue;
                    },
                }

                let result = self.sender.send(&config, &text).await;
                let record = DeliveryRecord {
                    key: delivery_key,
                    status: if result.is_ok() {
                        DeliveryStatus::Success
                    } else {
                        DeliveryStatus::Failed
                    },
                    error: result.as_ref().err().map(|err| format!("{err:#}")),
                    sent_at: Utc::now(),
                };
                if let Err(err) = &result {
                    tracing::warn!(
                        %user,
                        config = config.id,
                        channel = config.channel.as_str(),
                        err = %format!("{err:#}"),
                        "notification delivery failed"
                    );
                }
                if let Err(err) = self.store.append_delivery(&record).await {
                    tracing::warn!(%user, config = config.id, %err, "failed to record delivery");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TransitionConsumer for Dispatcher {
    async fn handle_transition(&self, transition: &FlowTransition) -> anyhow::Result<()> {
        self.dispatch(transition).await
    }
}

#[cfg(test)]
mod test {
    use alloy::primitives::{address, Address, B256};
    use anyhow::anyhow;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use timelock_storage::persistence::memory::MemoryPersistence;
    use timelock_types::{
        Channel, ContractRole, Flow, FlowKey, FlowStatus, NotificationConfig, TimelockStandard,
    };

    use super::*;

    /// Records sends instead of doing HTTP; fails for channels listed in
    /// `failing`.
    #[derive(Clone, Default)]
    struct RecordingSender {
        sent: Arc<Mutex<Vec<(i64, String)>>>,
        failing: Arc<Mutex<Vec<Channel>>>,
    }

    #[async_trait]
    impl ChannelSender for RecordingSender {
        async fn send(&self, config: &NotificationConfig, text: &str) -> anyhow::Result<()> {
            if self.failing.lock().contains(&config.channel) {
                return Err(anyhow!("503 from {}", config.channel));
            }
            self.sent.lock().push((config.id, text.to_string()));
            Ok(())
        }
    }

    const USER: &str = "0x0000000000000000000000000000000000000a11";

    fn config(id: i64, channel: Channel) -> NotificationConfig {
        NotificationConfig {
            id,
            user_address: USER.into(),
            channel,
            name: format!("cfg-{id}"),
            bot_token: Some("token".into()),
            chat_id: Some("chat".into()),
            webhook_url: Some("https://hooks.example/x".into()),
            secret: None,
            is_active: true,
        }
    }

    async fn fixture() -> (Dispatcher, Arc<MemoryPersistence>, RecordingSender, FlowTransition)
    {
        let store = Arc::new(MemoryPersistence::new());
        let sender = RecordingSender::default();
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(sender.clone()));

        let contract = address!("00000000000000000000000000000000000000c0");
        let key = FlowKey {
            standard: TimelockStandard::Compound,
            chain_id: 1,
            contract_address: contract,
            flow_id: B256::repeat_byte(0xab),
        };
        let mut flow = Flow::new(key.clone());
        flow.status = FlowStatus::Executed;
        flow.initiator = Some(Address::ZERO);
        store.upsert_flow(&flow).await.unwrap();
        store
            .upsert_relation(
                TimelockStandard::Compound,
                1,
                contract,
                USER,
                ContractRole::Proposer,
            )
            .await
            .unwrap();

        let transition = FlowTransition {
            key,
            from: FlowStatus::Ready,
            to: FlowStatus::Executed,
            tx_hash: Some(B256::repeat_byte(0x42)),
            initiator: Some(Address::ZERO),
        };
        (dispatcher, store, sender, transition)
    }

    #[tokio::test]
    async fn test_replay_does_not_resend() {
        let (dispatcher, store, sender, transition) = fixture().await;
        store.insert_config(config(1, Channel::Telegram));

        dispatcher.dispatch(&transition).await.unwrap();
        assert_eq!(sender.sent.lock().len(), 1);
        let deliveries = store.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].status, DeliveryStatus::Success);

        // Operator replay of the same tuple: the sender is not called and no
        // new row appears.
        dispatcher.dispatch(&transition).await.unwrap();
        assert_eq!(sender.sent.lock().len(), 1);
        assert_eq!(store.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_recorded_and_retried_on_replay() {
        let (dispatcher, store, sender, transition) = fixture().await;
        store.insert_config(config(1, Channel::Slack));
        sender.failing.lock().push(Channel::Slack);

        dispatcher.dispatch(&transition).await.unwrap();
        let deliveries = store.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].status, DeliveryStatus::Failed);
        assert!(deliveries[0].error.as_deref().unwrap().contains("503"));

        // A failed row does not trip the gate, so a replay tries again and
        // the row flips to success.
        sender.failing.lock().clear();
        dispatcher.dispatch(&transition).await.unwrap();
        assert_eq!(sender.sent.lock().len(), 1);
        let deliveries = store.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].status, DeliveryStatus::Success);
    }

    #[tokio::test]
    async fn test_fan_out_across_channels_and_states() {
        let (dispatcher, store, sender, transition) = fixture().await;
        store.insert_config(config(1, Channel::Telegram));
        store.insert_config(config(2, Channel::Discord));

        dispatcher.dispatch(&transition).await.unwrap();
        assert_eq!(sender.sent.lock().len(), 2);
        assert_eq!(store.deliveries().len(), 2);

        // A different target state is a different idempotency key.
        let cancelled = FlowTransition {
            to: FlowStatus::Cancelled,
            ..transition.clone()
        };
        dispatcher.dispatch(&cancelled).await.unwrap();
        assert_eq!(store.deliveries().len(), 4);
    }

    #[tokio::test]
    async fn test_missing_flow_aborts_silently() {
        let (dispatcher, store, sender, transition) = fixture().await;
        store.insert_config(config(1, Channel::Telegram));

        let unknown = FlowTransition {
            key: FlowKey {
                flow_id: B256::repeat_byte(0xff),
                ..transition.key.clone()
            },
            ..transition.clone()
        };
        dispatcher.dispatch(&unknown).await.unwrap();
        assert!(sender.sent.lock().is_empty());
        assert!(store.deliveries().is_empty());
    }

    #[tokio::test]
    async fn test_no_subscribers_means_no_work() {
        let store = Arc::new(MemoryPersistence::new());
        let sender = RecordingSender::default();
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(sender.clone()));
        let transition = FlowTransition {
            key: FlowKey {
                standard: TimelockStandard::OpenZeppelin,
                chain_id: 10,
                contract_address: Address::ZERO,
                flow_id: B256::ZERO,
            },
            from: FlowStatus::Waiting,
            to: FlowStatus::Ready,
            tx_hash: None,
            initiator: None,
        };
        dispatcher.dispatch(&transition).await.unwrap();
        assert!(sender.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_message_rendered_once_with_chain_context() {
        let (dispatcher, store, sender, transition) = fixture().await;
        store.insert_chain(timelock_types::ChainMetadata {
            chain_id: 1,
            name: "Ethereum".into(),
            native_symbol: "ETH".into(),
            native_decimals: 18,
            block_explorer_urls: vec!["https://etherscan.io".into()],
            official_rpcs: vec![],
            is_testnet: false,
        });
        store.insert_remark(
            TimelockStandard::Compound,
            1,
            transition.key.contract_address,
            "Treasury",
        );
        store.insert_config(config(1, Channel::Telegram));
        store.insert_config(config(2, Channel::Slack));

        dispatcher.dispatch(&transition).await.unwrap();
        let sent = sender.sent.lock().clone();
        assert_eq!(sent.len(), 2);
        // Every channel carries the same rendered text.
        assert_eq!(sent[0].1, sent[1].1);
        assert!(sent[0].1.contains("Network: Ethereum"));
        assert!(sent[0].1.contains("Remark: Treasury"));
    }
}
