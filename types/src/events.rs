use alloy::{
    primitives::{keccak256, Address, Bytes, B256, U256},
    sol,
    sol_types::SolValue,
};
use serde::{Deserialize, Serialize};

use crate::{chain::TimelockStandard, notify::ContractRole};

sol! {
    /// Events emitted by a Compound-style Timelock.
    #[derive(Debug, PartialEq, Eq)]
    contract CompoundTimelock {
        event QueueTransaction(bytes32 indexed txHash, address indexed target, uint256 value, string signature, bytes data, uint256 eta);
        event ExecuteTransaction(bytes32 indexed txHash, address indexed target, uint256 value, string signature, bytes data, uint256 eta);
        event CancelTransaction(bytes32 indexed txHash, address indexed target, uint256 value, string signature, bytes data, uint256 eta);
    }
}

sol! {
    /// Events emitted by an OpenZeppelin TimelockController.
    #[derive(Debug, PartialEq, Eq)]
    contract OpenZeppelinTimelock {
        event CallScheduled(bytes32 indexed id, uint256 indexed index, address target, uint256 value, bytes data, bytes32 predecessor, uint256 delay);
        event CallExecuted(bytes32 indexed id, uint256 indexed index, address target, uint256 value, bytes data);
        event Cancelled(bytes32 indexed id);
    }
}

/// Deterministic identifier of a Compound timelock flow.
///
/// Matches the hash the Timelock contract computes over the queued call, so
/// queue/execute/cancel events for the same call resolve to the same flow.
pub fn compound_flow_id(
    target: Address,
    value: U256,
    signature: &str,
    data: &Bytes,
    eta: U256,
) -> B256 {
    let encoded = (target, value, signature.to_string(), data.clone(), eta).abi_encode_params();
    keccak256(encoded)
}

/// Payload common to the three Compound events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundCall {
    /// The `txHash` topic, which equals [`compound_flow_id`] of the payload.
    pub id: B256,
    pub target: Address,
    pub value: U256,
    pub signature: String,
    pub data: Bytes,
    /// Earliest execution time, unix seconds.
    pub eta: u64,
}

/// Payload of an OpenZeppelin `CallScheduled` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledCall {
    pub id: B256,
    pub index: u64,
    pub target: Address,
    pub value: U256,
    pub data: Bytes,
    pub predecessor: B256,
    /// Minimum delay before execution, seconds.
    pub delay: u64,
}

/// The recognised timelock event taxonomy, tagged by first-topic hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelockEventKind {
    CompoundQueue(CompoundCall),
    CompoundExecute(CompoundCall),
    CompoundCancel(CompoundCall),
    OzCallScheduled(ScheduledCall),
    OzCallExecuted {
        id: B256,
        index: u64,
        target: Address,
        value: U256,
        data: Bytes,
    },
    OzCancelled {
        id: B256,
    },
}

impl TimelockEventKind {
    pub fn standard(&self) -> TimelockStandard {
        match self {
            Self::CompoundQueue(_) | Self::CompoundExecute(_) | Self::CompoundCancel(_) => {
                TimelockStandard::Compound
            },
            _ => TimelockStandard::OpenZeppelin,
        }
    }

    /// Canonical event name, as stored in the transaction tables.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CompoundQueue(_) => "QueueTransaction",
            Self::CompoundExecute(_) => "ExecuteTransaction",
            Self::CompoundCancel(_) => "CancelTransaction",
            Self::OzCallScheduled(_) => "CallScheduled",
            Self::OzCallExecuted { .. } => "CallExecuted",
            Self::OzCancelled { .. } => "Cancelled",
        }
    }

    /// Identifier of the flow this event belongs to.
    ///
    /// For Compound this is recomputed from the payload rather than read back
    /// from the topic, which keeps decoding total even for malformed topics.
    pub fn flow_id(&self) -> B256 {
        match self {
            Self::CompoundQueue(call) | Self::CompoundExecute(call) | Self::CompoundCancel(call) => {
                compound_flow_id(
                    call.target,
                    call.value,
                    &call.signature,
                    &call.data,
                    U256::from(call.eta),
                )
            },
            Self::OzCallScheduled(call) => call.id,
            Self::OzCallExecuted { id, .. } | Self::OzCancelled { id } => *id,
        }
    }

    /// The subscription role the transaction sender earned by emitting this
    /// event.
    pub fn sender_role(&self) -> ContractRole {
        match self {
            Self::CompoundQueue(_) | Self::OzCallScheduled(_) => ContractRole::Proposer,
            Self::CompoundExecute(_) | Self::OzCallExecuted { .. } => ContractRole::Executor,
            Self::CompoundCancel(_) | Self::OzCancelled { .. } => ContractRole::Canceller,
        }
    }
}

/// A decoded timelock event together with its on-chain provenance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelockEvent {
    pub chain_id: u64,
    pub contract_address: Address,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    /// Timestamp of the containing block, unix seconds.
    pub block_timestamp: u64,
    /// Sender of the transaction that emitted the event.
    pub initiator: Address,
    pub kind: TimelockEventKind,
}

impl TimelockEvent {
    pub fn standard(&self) -> TimelockStandard {
        self.kind.standard()
    }

    pub fn flow_id(&self) -> B256 {
        self.kind.flow_id()
    }
}

#[cfg(test)]
mod test {
    use alloy::{primitives::address, sol_types::SolEvent};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_topic_hashes_match_canonical_signatures() {
        for (canonical, topic) in [
            (
                "QueueTransaction(bytes32,address,uint256,string,bytes,uint256)",
                CompoundTimelock::QueueTransaction::SIGNATURE_HASH,
            ),
            (
                "ExecuteTransaction(bytes32,address,uint256,string,bytes,uint256)",
                CompoundTimelock::ExecuteTransaction::SIGNATURE_HASH,
            ),
            (
                "CancelTransaction(bytes32,address,uint256,string,bytes,uint256)",
                CompoundTimelock::CancelTransaction::SIGNATURE_HASH,
            ),
            (
                "CallScheduled(bytes32,uint256,address,uint256,bytes,bytes32,uint256)",
                OpenZeppelinTimelock::CallScheduled::SIGNATURE_HASH,
            ),
            (
                "CallExecuted(bytes32,uint256,address,uint256,bytes)",
                OpenZeppelinTimelock::CallExecuted::SIGNATURE_HASH,
            ),
            ("Cancelled(bytes32)", OpenZeppelinTimelock::Cancelled::SIGNATURE_HASH),
        ] {
            assert_eq!(keccak256(canonical.as_bytes()), topic, "{canonical}");
        }
    }

    #[test]
    fn test_compound_flow_id_layout() {
        // abi.encode(target, value, "", 0x, eta) laid out by hand: five head
        // words (the two dynamic fields as offsets) plus one empty-length
        // word for each tail.
        let target = address!("00000000000000000000000000000000000000aa");
        let value = U256::from(7u64);
        let eta = U256::from(1_700_000_000u64);

        let mut expected = Vec::new();
        expected.extend_from_slice(&B256::left_padding_from(target.as_slice()).0);
        expected.extend_from_slice(&value.to_be_bytes::<32>());
        expected.extend_from_slice(&U256::from(0xa0u64).to_be_bytes::<32>());
        expected.extend_from_slice(&U256::from(0xc0u64).to_be_bytes::<32>());
        expected.extend_from_slice(&eta.to_be_bytes::<32>());
        expected.extend_from_slice(&[0u8; 32]);
        expected.extend_from_slice(&[0u8; 32]);

        assert_eq!(
            compound_flow_id(target, value, "", &Bytes::new(), eta),
            keccak256(&expected),
        );
    }

    #[test]
    fn test_flow_id_stable_across_event_kinds() {
        let call = CompoundCall {
            id: B256::ZERO,
            target: address!("00000000000000000000000000000000000000bb"),
            value: U256::ZERO,
            signature: "transfer(address,uint256)".into(),
            data: Bytes::from(vec![0x12, 0x34]),
            eta: 1_700_086_400,
        };
        let queued = TimelockEventKind::CompoundQueue(call.clone());
        let executed = TimelockEventKind::CompoundExecute(call.clone());
        let cancelled = TimelockEventKind::CompoundCancel(call);
        assert_eq!(queued.flow_id(), executed.flow_id());
        assert_eq!(queued.flow_id(), cancelled.flow_id());
    }

    #[test]
    fn test_sender_roles() {
        let scheduled = TimelockEventKind::OzCallScheduled(ScheduledCall {
            id: B256::repeat_byte(0xde),
            index: 0,
            target: Address::ZERO,
            value: U256::ZERO,
            data: Bytes::new(),
            predecessor: B256::ZERO,
            delay: 3600,
        });
        assert_eq!(scheduled.sender_role(), ContractRole::Proposer);
        assert_eq!(
            TimelockEventKind::OzCancelled { id: B256::ZERO }.sender_role(),
            ContractRole::Canceller,
        );
    }
}
