use std::sync::Arc;

use chrono::{DateTime, Utc};
use timelock_storage::Persistence;
use timelock_types::{
    Flow, FlowKey, FlowStatus, FlowTransition, ScannerOptions, TimelockEvent, TimelockEventKind,
    TransitionConsumer,
};
use tokio_util::sync::CancellationToken;

fn block_time(unix: u64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(unix as i64, 0)
}

/// Folds decoded timelock events into flow records and reports every
/// observed state change to the transition consumer.
///
/// Terminal states are absorbing: an event hitting a terminal flow still
/// lands in the transaction tables but changes nothing else.
pub struct FlowProjector {
    store: Arc<dyn Persistence>,
    consumer: Arc<dyn TransitionConsumer>,
}

impl FlowProjector {
    pub fn new(store: Arc<dyn Persistence>, consumer: Arc<dyn TransitionConsumer>) -> Self {
        Self { store, consumer }
    }

    /// Apply one decoded event: record the raw transaction, update the flow
    /// by read-modify-write, maintain contract relations, and hand any state
    /// change to the consumer.
    pub async fn apply(&self, event: &TimelockEvent) -> anyhow::Result<()> {
        self.store.record_event(event).await?;

        let key = FlowKey {
            standard: event.standard(),
            chain_id: event.chain_id,
            contract_address: event.contract_address,
            flow_id: event.flow_id(),
        };
        let existing = self.store.flow(&key).await?;
        let from = existing
            .as_ref()
            .map(|flow| flow.status)
            .unwrap_or(FlowStatus::Waiting);
        let mut flow = existing.unwrap_or_else(|| Flow::new(key.clone()));

        self.store
            .upsert_relation(
                key.standard,
                key.chain_id,
                key.contract_address,
                &format!("{:#x}", event.initiator),
                event.kind.sender_role(),
            )
            .await?;

        if flow.status.is_terminal() {
            tracing::debug!(
                ?key,
                status = flow.status.as_str(),
                event = event.kind.name(),
                "event for terminal flow, nothing to update"
            );
            return Ok(());
        }

        let at = block_time(event.block_timestamp);
        match &event.kind {
            TimelockEventKind::CompoundQueue(call) => {
                flow.initiator = Some(event.initiator);
                flow.target = Some(call.target);
                flow.value = call.value;
                flow.function_signature =
                    (!call.signature.is_empty()).then(|| call.signature.clone());
                flow.call_data = call.data.clone();
                flow.eta = Some(call.eta);
                flow.status = FlowStatus::Waiting;
                flow.proposed_at = at;
                flow.queued_at = at;
            },
            TimelockEventKind::OzCallScheduled(call) => {
                flow.initiator = Some(event.initiator);
                flow.target = Some(call.target);
                flow.value = call.value;
                flow.call_data = call.data.clone();
                flow.eta = Some(event.block_timestamp + call.delay);
                flow.status = FlowStatus::Waiting;
                flow.proposed_at = at;
                flow.queued_at = at;
            },
            TimelockEventKind::CompoundExecute(_) | TimelockEventKind::OzCallExecuted { .. } => {
                flow.status = FlowStatus::Executed;
                flow.executed_at = at;
            },
            TimelockEventKind::CompoundCancel(_) | TimelockEventKind::OzCancelled { .. } => {
                flow.status = FlowStatus::Cancelled;
                flow.cancelled_at = at;
            },
        }

        let to = flow.status;
        self.store.upsert_flow(&flow).await?;

        if from != to {
            self.emit(FlowTransition {
                key,
                from,
                to,
                tx_hash: Some(event.tx_hash),
                initiator: Some(event.initiator),
            })
            .await;
        }
        Ok(())
    }

    /// One pass of the periodic refresher: promote waiting flows whose eta
    /// has arrived, and expire ready Compound flows past their grace period.
    /// `now` is unix seconds. Returns how many flows changed state.
    pub async fn refresh_once(&self, now: u64, batch: usize) -> anyhow::Result<usize> {
        let mut changed = 0;

        for mut flow in self.store.waiting_flows_due(now, batch).await? {
            let from = flow.status;
            flow.status = FlowStatus::Ready;
            self.store.upsert_flow(&flow).await?;
            self.emit(FlowTransition {
                key: flow.key.clone(),
                from,
                to: FlowStatus::Ready,
                tx_hash: None,
                initiator: flow.initiator,
            })
            .await;
            changed += 1;
        }

        for mut flow in self.store.ready_flows_expired(now, batch).await? {
            let from = flow.status;
            flow.status = FlowStatus::Expired;
            self.store.upsert_flow(&flow).await?;
            self.emit(FlowTransition {
                key: flow.key.clone(),
                from,
                to: FlowStatus::Expired,
                tx_hash: None,
                initiator: flow.initiator,
            })
            .await;
            changed += 1;
        }

        Ok(changed)
    }

    /// Periodic refresher loop, cancelled through `cancel`.
    pub async fn run_refresher(&self, options: ScannerOptions, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(options.flow_refresh_interval) => {},
            }
            let now = Utc::now().timestamp().max(0) as u64;
            match self.refresh_once(now, options.flow_refresh_batch_size).await {
                Ok(0) => {},
                Ok(changed) => tracing::info!(changed, "refreshed flow statuses"),
                Err(err) => {
                    tracing::warn!(%err, "flow refresh pass failed");
                    let _ = self
                        .store
                        .append_error("projector.refresher", &format!("{err:#}"))
                        .await;
                },
            }
        }
    }

    async fn emit(&self, transition: FlowTransition) {
        tracing::info!(
            chain_id = transition.key.chain_id,
            flow = %transition.key.flow_id,
            from = transition.from.as_str(),
            to = transition.to.as_str(),
            "flow transition"
        );
        if let Err(err) = self.consumer.handle_transition(&transition).await {
            // Notification failures never bounce back into scanning.
            tracing::warn!(%err, "transition consumer failed");
            let _ = self
                .store
                .append_error("projector.consumer", &format!("{err:#}"))
                .await;
        }
    }
}
