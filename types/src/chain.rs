use std::{fmt, str::FromStr};

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Which timelock flavour a contract implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelockStandard {
    Compound,
    OpenZeppelin,
}

impl TimelockStandard {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compound => "compound",
            Self::OpenZeppelin => "openzeppelin",
        }
    }
}

impl fmt::Display for TimelockStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error)]
#[error("unknown timelock standard {0:?}")]
pub struct ParseStandardError(String);

impl FromStr for TimelockStandard {
    type Err = ParseStandardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compound" => Ok(Self::Compound),
            "openzeppelin" => Ok(Self::OpenZeppelin),
            other => Err(ParseStandardError(other.to_string())),
        }
    }
}

/// Display and connection metadata for a supported chain, as stored in the
/// `support_chains` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub chain_id: u64,
    pub name: String,
    pub native_symbol: String,
    pub native_decimals: u8,
    /// Explorer base URLs, decoded from the table's JSON column.
    pub block_explorer_urls: Vec<String>,
    /// Candidate RPC endpoints for this chain.
    pub official_rpcs: Vec<Url>,
    pub is_testnet: bool,
}

impl ChainMetadata {
    /// Link to a transaction on the chain's primary explorer, if one is known.
    pub fn tx_url(&self, tx_hash: B256) -> Option<String> {
        let base = self.block_explorer_urls.first()?;
        Some(format!("{}/tx/{tx_hash}", base.trim_end_matches('/')))
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_standard_round_trip() {
        for standard in [TimelockStandard::Compound, TimelockStandard::OpenZeppelin] {
            assert_eq!(standard.as_str().parse::<TimelockStandard>().unwrap(), standard);
        }
        assert!("comptroller".parse::<TimelockStandard>().is_err());
    }

    #[test]
    fn test_tx_url() {
        let chain = ChainMetadata {
            chain_id: 1,
            name: "Ethereum".into(),
            native_symbol: "ETH".into(),
            native_decimals: 18,
            block_explorer_urls: vec!["https://etherscan.io/".into()],
            official_rpcs: vec![],
            is_testnet: false,
        };
        let hash = B256::repeat_byte(0x11);
        assert_eq!(
            chain.tx_url(hash).unwrap(),
            format!("https://etherscan.io/tx/{hash}"),
        );
    }
}
