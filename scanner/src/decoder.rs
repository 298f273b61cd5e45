//! Recognition and decoding of timelock events from raw logs.
//!
//! Decoding splits into a pure payload step, which only looks at the log, and
//! a resolution step that confirms the transaction succeeded and attributes
//! the sender via its receipt.

use alloy::{
    eips::BlockId,
    primitives::Log,
    providers::Provider,
    sol_types::SolEvent,
};
use anyhow::Context;
use timelock_types::{
    events::{CompoundTimelock, OpenZeppelinTimelock},
    CompoundCall, RawLogRecord, ScheduledCall, TimelockEvent, TimelockEventKind,
};

/// Match the first topic against the known event dictionaries and extract the
/// typed payload.
///
/// `Ok(None)` means the log is not a recognised timelock event; `Err` means
/// it matched a topic but its body does not decode, which callers treat as a
/// semantic skip too.
pub fn decode_payload(
    record: &RawLogRecord,
) -> Result<Option<TimelockEventKind>, alloy::sol_types::Error> {
    let Some(topic0) = record.topic0() else {
        return Ok(None);
    };
    let log = Log::new(
        record.contract_address,
        record.topics.clone(),
        record.data.clone(),
    )
    .ok_or_else(|| alloy::sol_types::Error::custom("too many topics"))?;

    let kind = match topic0 {
        t if t == CompoundTimelock::QueueTransaction::SIGNATURE_HASH => {
            let ev = CompoundTimelock::QueueTransaction::decode_log(&log, true)?.data;
            TimelockEventKind::CompoundQueue(CompoundCall {
                id: ev.txHash,
                target: ev.target,
                value: ev.value,
                signature: ev.signature,
                data: ev.data,
                eta: ev.eta.saturating_to(),
            })
        },
        t if t == CompoundTimelock::ExecuteTransaction::SIGNATURE_HASH => {
            let ev = CompoundTimelock::ExecuteTransaction::decode_log(&log, true)?.data;
            TimelockEventKind::CompoundExecute(CompoundCall {
                id: ev.txHash,
                target: ev.target,
                value: ev.value,
                signature: ev.signature,
                data: ev.data,
                eta: ev.eta.saturating_to(),
            })
        },
        t if t == CompoundTimelock::CancelTransaction::SIGNATURE_HASH => {
            let ev = CompoundTimelock::CancelTransaction::decode_log(&log, true)?.data;
            TimelockEventKind::CompoundCancel(CompoundCall {
                id: ev.txHash,
                target: ev.target,
                value: ev.value,
                signature: ev.signature,
                data: ev.data,
                eta: ev.eta.saturating_to(),
            })
        },
        t if t == OpenZeppelinTimelock::CallScheduled::SIGNATURE_HASH => {
            let ev = OpenZeppelinTimelock::CallScheduled::decode_log(&log, true)?.data;
            TimelockEventKind::OzCallScheduled(ScheduledCall {
                id: ev.id,
                index: ev.index.saturating_to(),
                target: ev.target,
                value: ev.value,
                data: ev.data,
                predecessor: ev.predecessor,
                delay: ev.delay.saturating_to(),
            })
        },
        t if t == OpenZeppelinTimelock::CallExecuted::SIGNATURE_HASH => {
            let ev = OpenZeppelinTimelock::CallExecuted::decode_log(&log, true)?.data;
            TimelockEventKind::OzCallExecuted {
                id: ev.id,
                index: ev.index.saturating_to(),
                target: ev.target,
                value: ev.value,
                data: ev.data,
            }
        },
        t if t == OpenZeppelinTimelock::Cancelled::SIGNATURE_HASH => {
            let ev = OpenZeppelinTimelock::Cancelled::decode_log(&log, true)?.data;
            TimelockEventKind::OzCancelled { id: ev.id }
        },
        _ => return Ok(None),
    };
    Ok(Some(kind))
}

/// Confirm the emitting transaction succeeded and build the full event.
///
/// `Ok(None)` means the record should be skipped: the receipt is gone or the
/// transaction reverted. RPC failures are returned so the caller's pool
/// retry can take over.
pub async fn resolve_event<P: Provider>(
    record: &RawLogRecord,
    kind: TimelockEventKind,
    provider: &P,
) -> anyhow::Result<Option<TimelockEvent>> {
    let Some(receipt) = provider
        .get_transaction_receipt(record.tx_hash)
        .await
        .context("failed to fetch transaction receipt")?
    else {
        tracing::debug!(tx = %record.tx_hash, "no receipt for log, skipping");
        return Ok(None);
    };
    if !receipt.status() {
        tracing::debug!(tx = %record.tx_hash, "transaction reverted, skipping");
        return Ok(None);
    }

    let block_timestamp = match record.block_timestamp {
        Some(ts) => ts,
        None => {
            let block = provider
                .get_block(BlockId::number(record.block_number))
                .await
                .context("failed to fetch block for timestamp")?
                .with_context(|| format!("block {} not available", record.block_number))?;
            block.header.timestamp
        },
    };

    Ok(Some(TimelockEvent {
        chain_id: record.chain_id,
        contract_address: record.contract_address,
        tx_hash: record.tx_hash,
        log_index: record.log_index,
        block_number: record.block_number,
        block_timestamp,
        initiator: receipt.from,
        kind,
    }))
}

#[cfg(test)]
mod test {
    use alloy::primitives::{address, b256, Address, Bytes, B256, U256};
    use pretty_assertions::assert_eq;
    use timelock_types::events::compound_flow_id;

    use super::*;

    fn record_from(ev_data: alloy::primitives::LogData) -> RawLogRecord {
        RawLogRecord {
            chain_id: 1,
            block_number: 100,
            block_hash: Some(B256::repeat_byte(1)),
            tx_hash: B256::repeat_byte(2),
            log_index: 0,
            contract_address: address!("00000000000000000000000000000000000000cc"),
            topics: ev_data.topics().to_vec(),
            data: ev_data.data.clone(),
            block_timestamp: Some(1_700_000_000),
        }
    }

    #[test]
    fn test_decode_compound_queue() {
        let target = address!("00000000000000000000000000000000000000aa");
        let data = Bytes::from(vec![0x12, 0x34]);
        let eta = U256::from(1_700_086_400u64);
        let ev = CompoundTimelock::QueueTransaction {
            txHash: compound_flow_id(target, U256::ZERO, "transfer(address,uint256)", &data, eta),
            target,
            value: U256::ZERO,
            signature: "transfer(address,uint256)".into(),
            data: data.clone(),
            eta,
        };
        let record = record_from(ev.encode_log_data());

        let kind = decode_payload(&record).unwrap().unwrap();
        let TimelockEventKind::CompoundQueue(call) = &kind else {
            panic!("wrong kind: {kind:?}");
        };
        assert_eq!(call.target, target);
        assert_eq!(call.signature, "transfer(address,uint256)");
        assert_eq!(call.data, data);
        assert_eq!(call.eta, 1_700_086_400);
        // The recomputed flow id matches the emitted topic.
        assert_eq!(kind.flow_id(), call.id);
    }

    #[test]
    fn test_decode_oz_schedule_and_cancel() {
        let id = b256!("00000000000000000000000000000000000000000000000000000000000000de");
        let ev = OpenZeppelinTimelock::CallScheduled {
            id,
            index: U256::ZERO,
            target: address!("00000000000000000000000000000000000000aa"),
            value: U256::from(1_000_000_000_000_000_000u64),
            data: Bytes::from(vec![0xab]),
            predecessor: B256::ZERO,
            delay: U256::from(3600u64),
        };
        let kind = decode_payload(&record_from(ev.encode_log_data()))
            .unwrap()
            .unwrap();
        let TimelockEventKind::OzCallScheduled(call) = &kind else {
            panic!("wrong kind: {kind:?}");
        };
        assert_eq!(call.id, id);
        assert_eq!(call.delay, 3600);
        assert_eq!(kind.flow_id(), id);

        let cancelled = OpenZeppelinTimelock::Cancelled { id };
        let kind = decode_payload(&record_from(cancelled.encode_log_data()))
            .unwrap()
            .unwrap();
        assert_eq!(kind, TimelockEventKind::OzCancelled { id });
    }

    #[test]
    fn test_unknown_and_missing_topics_are_skipped() {
        let mut record = RawLogRecord {
            chain_id: 1,
            block_number: 1,
            block_hash: None,
            tx_hash: B256::repeat_byte(9),
            log_index: 0,
            contract_address: Address::ZERO,
            topics: vec![],
            data: Bytes::new(),
            block_timestamp: None,
        };
        // No topic at all.
        assert_eq!(decode_payload(&record).unwrap(), None);

        // A topic no dictionary knows.
        record.topics = vec![B256::repeat_byte(0x77)];
        assert_eq!(decode_payload(&record).unwrap(), None);
    }

    #[test]
    fn test_matched_topic_with_garbled_body_is_an_error() {
        let record = RawLogRecord {
            chain_id: 1,
            block_number: 1,
            block_hash: None,
            tx_hash: B256::repeat_byte(9),
            log_index: 0,
            contract_address: Address::ZERO,
            // Right topic, but the indexed id topic and body are missing.
            topics: vec![OpenZeppelinTimelock::Cancelled::SIGNATURE_HASH],
            data: Bytes::new(),
            block_timestamp: None,
        };
        assert!(decode_payload(&record).is_err());
    }
}
