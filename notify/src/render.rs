//! Rendering of flow transitions into the fixed-shape notification text.

use alloy::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{utils::format_units, Bytes, B256, U256},
};
use timelock_types::{ChainMetadata, Flow, FlowTransition};

/// A decoded (or deliberately undecoded) view of a flow's call.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedCall {
    /// The function label, or "No Function Call".
    pub label: String,
    pub params: Vec<RenderedParam>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderedParam {
    pub name: String,
    pub ty: String,
    pub value: String,
}

/// Parse a `name(type,…)` signature and decode the call data against it.
///
/// A missing signature or empty call data renders as "No Function Call".
/// Call data that does not match the signature keeps the function label but
/// carries a single sentinel parameter with the raw bytes.
pub fn render_calldata(signature: Option<&str>, data: &Bytes) -> RenderedCall {
    let no_call = RenderedCall {
        label: "No Function Call".into(),
        params: vec![],
    };
    let Some(signature) = signature.filter(|s| !s.is_empty()) else {
        return no_call;
    };
    if data.is_empty() && !signature.ends_with("()") {
        return no_call;
    }

    let (name, types) = match signature.split_once('(') {
        Some((name, rest)) => (name.trim(), rest.trim_end_matches(')')),
        None => return no_call,
    };

    let mismatch = |reason: &str| RenderedCall {
        label: signature.to_string(),
        params: vec![RenderedParam {
            name: "calldata_mismatch".into(),
            ty: reason.to_string(),
            value: data.to_string(),
        }],
    };

    let tuple = match DynSolType::parse(&format!("({types})")) {
        Ok(ty) => ty,
        Err(_) => return mismatch("unparseable signature"),
    };
    let values = match tuple.abi_decode_params(data) {
        Ok(DynSolValue::Tuple(values)) => values,
        Ok(value) => vec![value],
        Err(_) => return mismatch("data does not match signature"),
    };

    let params = values
        .iter()
        .enumerate()
        .map(|(i, value)| RenderedParam {
            name: format!("arg{i}"),
            ty: value
                .sol_type_name()
                .map(|name| name.into_owned())
                .unwrap_or_else(|| "unknown".into()),
            value: fmt_value(value),
        })
        .collect();
    RenderedCall {
        label: name.to_string(),
        params,
    }
}

fn fmt_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Address(addr) => format!("{addr:#x}"),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Uint(n, _) => n.to_string(),
        DynSolValue::Int(n, _) => n.to_string(),
        DynSolValue::FixedBytes(bytes, size) => {
            format!("0x{}", alloy::hex::encode(&bytes.as_slice()[..*size]))
        },
        DynSolValue::Bytes(bytes) => format!("0x{}", alloy::hex::encode(bytes)),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) => {
            let inner: Vec<String> = values.iter().map(fmt_value).collect();
            format!("[{}]", inner.join(", "))
        },
        DynSolValue::Tuple(values) => {
            let inner: Vec<String> = values.iter().map(fmt_value).collect();
            format!("({})", inner.join(", "))
        },
        other => format!("{other:?}"),
    }
}

/// `0x12345678…9abcdef0`-style elision of a transaction hash.
pub fn elide_hash(hash: B256) -> String {
    let full = format!("{hash:#x}");
    format!("{}…{}", &full[..10], &full[full.len() - 8..])
}

/// Wei to human units using the chain's native symbol and decimals.
pub fn format_native(value: U256, decimals: u8, symbol: &str) -> String {
    let amount = match format_units(value, decimals) {
        Ok(amount) => {
            let trimmed = amount.trim_end_matches('0').trim_end_matches('.');
            if trimmed.is_empty() {
                "0".to_string()
            } else {
                trimmed.to_string()
            }
        },
        Err(_) => value.to_string(),
    };
    format!("{amount} {symbol}")
}

/// The single notification text shared by every channel.
pub fn render_message(
    flow: &Flow,
    transition: &FlowTransition,
    chain: Option<&ChainMetadata>,
    remark: Option<&str>,
) -> String {
    let network = chain.map_or_else(
        || format!("chain {}", flow.key.chain_id),
        |chain| chain.name.clone(),
    );
    let (symbol, decimals) = chain.map_or(("ETH", 18), |c| (c.native_symbol.as_str(), c.native_decimals));
    let call = render_calldata(flow.function_signature.as_deref(), &flow.call_data);

    let mut lines = vec![
        "Timelock Transaction Notification".to_string(),
        format!("Standard: {}", flow.key.standard),
        format!("Network: {network}"),
        format!("Timelock: {:#x}", flow.key.contract_address),
    ];
    if let Some(remark) = remark.filter(|r| !r.is_empty()) {
        lines.push(format!("Remark: {remark}"));
    }
    lines.push(format!(
        "Status: {} -> {}",
        transition.from.as_str(),
        transition.to.as_str()
    ));
    if let Some(initiator) = transition.initiator.or(flow.initiator) {
        lines.push(format!("Caller: {initiator:#x}"));
    }
    if let Some(target) = flow.target {
        lines.push(format!("Target: {target:#x}"));
    }
    lines.push(format!(
        "Value: {}",
        format_native(flow.value, decimals, symbol)
    ));
    lines.push(format!("Function: {}", call.label));
    for param in &call.params {
        lines.push(format!("  {}({}): {}", param.name, param.ty, param.value));
    }
    if let Some(tx_hash) = transition.tx_hash {
        lines.push(format!("Tx: {}", elide_hash(tx_hash)));
        if let Some(link) = chain.and_then(|chain| chain.tx_url(tx_hash)) {
            lines.push(format!("Link: {link}"));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod test {
    use alloy::{primitives::address, sol_types::SolValue};
    use pretty_assertions::assert_eq;
    use timelock_types::{FlowKey, FlowStatus, TimelockStandard};

    use super::*;

    #[test]
    fn test_render_transfer_calldata() {
        let to = address!("00000000000000000000000000000000000000aa");
        let amount = U256::from(1_000u64);
        let data = Bytes::from((to, amount).abi_encode_params());

        let call = render_calldata(Some("transfer(address,uint256)"), &data);
        assert_eq!(call.label, "transfer");
        assert_eq!(call.params, vec![
            RenderedParam {
                name: "arg0".into(),
                ty: "address".into(),
                value: format!("{to:#x}"),
            },
            RenderedParam {
                name: "arg1".into(),
                ty: "uint256".into(),
                value: "1000".into(),
            },
        ]);
    }

    #[test]
    fn test_missing_signature_or_data_is_no_function_call() {
        let data = Bytes::from(vec![0x12, 0x34]);
        assert_eq!(render_calldata(None, &data).label, "No Function Call");
        assert_eq!(render_calldata(Some(""), &data).label, "No Function Call");
        assert_eq!(
            render_calldata(Some("transfer(address,uint256)"), &Bytes::new()).label,
            "No Function Call",
        );
    }

    #[test]
    fn test_mismatched_calldata_gets_sentinel_param() {
        let data = Bytes::from(vec![0x12, 0x34]);
        let call = render_calldata(Some("transfer(address,uint256)"), &data);
        assert_eq!(call.label, "transfer(address,uint256)");
        assert_eq!(call.params.len(), 1);
        assert_eq!(call.params[0].name, "calldata_mismatch");
        assert_eq!(call.params[0].value, "0x1234");
    }

    #[test]
    fn test_elide_hash() {
        let hash: B256 =
            "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef"
                .parse()
                .unwrap();
        assert_eq!(elide_hash(hash), "0x12345678…90abcdef");
    }

    #[test]
    fn test_format_native() {
        assert_eq!(
            format_native(U256::from(1_000_000_000_000_000_000u64), 18, "ETH"),
            "1 ETH",
        );
        assert_eq!(
            format_native(U256::from(1_500_000_000_000_000_000u64), 18, "ETH"),
            "1.5 ETH",
        );
        assert_eq!(format_native(U256::ZERO, 18, "BNB"), "0 BNB");
    }

    #[test]
    fn test_render_message_shape() {
        let chain = ChainMetadata {
            chain_id: 1,
            name: "Ethereum".into(),
            native_symbol: "ETH".into(),
            native_decimals: 18,
            block_explorer_urls: vec!["https://etherscan.io".into()],
            official_rpcs: vec![],
            is_testnet: false,
        };
        let mut flow = Flow::new(FlowKey {
            standard: TimelockStandard::Compound,
            chain_id: 1,
            contract_address: address!("00000000000000000000000000000000000000c0"),
            flow_id: B256::repeat_byte(0xab),
        });
        flow.initiator = Some(address!("0000000000000000000000000000000000000a11"));
        flow.target = Some(address!("00000000000000000000000000000000000000aa"));
        flow.value = U256::ZERO;
        flow.status = FlowStatus::Executed;

        let tx_hash = B256::repeat_byte(0x42);
        let transition = FlowTransition {
            key: flow.key.clone(),
            from: FlowStatus::Ready,
            to: FlowStatus::Executed,
            tx_hash: Some(tx_hash),
            initiator: flow.initiator,
        };
        let text = render_message(&flow, &transition, Some(&chain), Some("Treasury"));

        assert!(text.contains("Standard: compound"));
        assert!(text.contains("Network: Ethereum"));
        assert!(text.contains("Remark: Treasury"));
        assert!(text.contains("Status: ready -> executed"));
        assert!(text.contains("Function: No Function Call"));
        assert!(text.contains(&format!("Link: https://etherscan.io/tx/{tx_hash}")));
        // The raw hash only appears elided outside the link.
        assert!(text.contains("Tx: 0x42424242…42424242"));

        // Without chain metadata there is still a message, just without a
        // link.
        let bare = render_message(&flow, &transition, None, None);
        assert!(bare.contains("Network: chain 1"));
        assert!(!bare.contains("Link:"));
    }
}
