use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::TimelockStandard;

/// How long a Compound timelock call stays executable past its eta.
pub const COMPOUND_GRACE_PERIOD: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Lifecycle of a timelock flow. `Executed`, `Cancelled` and `Expired` are
/// absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Waiting,
    Ready,
    Executed,
    Cancelled,
    Expired,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Ready => "ready",
            Self::Executed => "executed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Cancelled | Self::Expired)
    }
}

#[derive(Clone, Debug, Error)]
#[error("unknown flow status {0:?}")]
pub struct ParseFlowStatusError(String);

impl std::str::FromStr for FlowStatus {
    type Err = ParseFlowStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "ready" => Ok(Self::Ready),
            "executed" => Ok(Self::Executed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(ParseFlowStatusError(other.to_string())),
        }
    }
}

/// Composite key of a flow projection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub standard: TimelockStandard,
    pub chain_id: u64,
    pub contract_address: Address,
    pub flow_id: B256,
}

/// Long-lived projection of a single administrative action, folded from the
/// timelock events that mention its flow id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub key: FlowKey,
    pub initiator: Option<Address>,
    pub target: Option<Address>,
    pub value: U256,
    pub function_signature: Option<String>,
    pub call_data: Bytes,
    /// Earliest execution time, unix seconds.
    pub eta: Option<u64>,
    pub status: FlowStatus,
    pub proposed_at: Option<DateTime<Utc>>,
    pub queued_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Flow {
    pub fn new(key: FlowKey) -> Self {
        Self {
            key,
            initiator: None,
            target: None,
            value: U256::ZERO,
            function_signature: None,
            call_data: Bytes::new(),
            eta: None,
            status: FlowStatus::Waiting,
            proposed_at: None,
            queued_at: None,
            executed_at: None,
            cancelled_at: None,
        }
    }

    /// Whether the refresher should promote this flow to `Ready` at `now`
    /// (unix seconds).
    pub fn ready_due(&self, now: u64) -> bool {
        self.status == FlowStatus::Waiting && self.eta.is_some_and(|eta| now >= eta)
    }

    /// Whether the refresher should expire this flow at `now` (unix seconds).
    /// Only Compound defines a grace period; OpenZeppelin operations stay
    /// executable indefinitely.
    pub fn expired_due(&self, now: u64) -> bool {
        self.key.standard == TimelockStandard::Compound
            && self.status == FlowStatus::Ready
            && self
                .eta
                .is_some_and(|eta| now >= eta + COMPOUND_GRACE_PERIOD.as_secs())
    }
}

/// A single observed flow state change, handed synchronously to the
/// notification layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowTransition {
    pub key: FlowKey,
    pub from: FlowStatus,
    pub to: FlowStatus,
    /// The transaction that triggered the transition, absent for
    /// time-triggered promotions.
    pub tx_hash: Option<B256>,
    pub initiator: Option<Address>,
}

/// Sink for flow state changes.
#[async_trait]
pub trait TransitionConsumer: Send + Sync {
    async fn handle_transition(&self, transition: &FlowTransition) -> anyhow::Result<()>;
}

/// Consumer that swallows transitions, for contexts that run without
/// notifications.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTransitionConsumer;

#[async_trait]
impl TransitionConsumer for NullTransitionConsumer {
    async fn handle_transition(&self, _transition: &FlowTransition) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn flow(standard: TimelockStandard, status: FlowStatus, eta: u64) -> Flow {
        Flow {
            status,
            eta: Some(eta),
            ..Flow::new(FlowKey {
                standard,
                chain_id: 1,
                contract_address: Address::ZERO,
                flow_id: B256::repeat_byte(0xab),
            })
        }
    }

    #[test]
    fn test_ready_promotion_is_time_triggered() {
        let eta = 1_700_000_000;
        let waiting = flow(TimelockStandard::Compound, FlowStatus::Waiting, eta);
        assert!(!waiting.ready_due(eta - 1));
        assert!(waiting.ready_due(eta));
        assert!(waiting.ready_due(eta + 1));

        // Only `Waiting` flows are promoted.
        let executed = flow(TimelockStandard::Compound, FlowStatus::Executed, eta);
        assert!(!executed.ready_due(eta + 1));
    }

    #[test]
    fn test_expiry_is_compound_only_and_needs_grace() {
        let eta = 1_700_000_000;
        let grace = COMPOUND_GRACE_PERIOD.as_secs();

        let compound = flow(TimelockStandard::Compound, FlowStatus::Ready, eta);
        assert!(!compound.expired_due(eta + grace - 1));
        assert!(compound.expired_due(eta + grace));

        let oz = flow(TimelockStandard::OpenZeppelin, FlowStatus::Ready, eta);
        assert!(!oz.expired_due(eta + grace + 1));

        // Waiting flows never expire directly.
        let waiting = flow(TimelockStandard::Compound, FlowStatus::Waiting, eta);
        assert!(!waiting.expired_due(eta + grace + 1));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!FlowStatus::Waiting.is_terminal());
        assert!(!FlowStatus::Ready.is_terminal());
        assert!(FlowStatus::Executed.is_terminal());
        assert!(FlowStatus::Cancelled.is_terminal());
        assert!(FlowStatus::Expired.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            FlowStatus::Waiting,
            FlowStatus::Ready,
            FlowStatus::Executed,
            FlowStatus::Cancelled,
            FlowStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<FlowStatus>().unwrap(), status);
        }
    }
}
