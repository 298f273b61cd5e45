use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Paused,
    Error,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error)]
#[error("unknown scan status {0:?}")]
pub struct ParseScanStatusError(String);

impl FromStr for ScanStatus {
    type Err = ParseScanStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "error" => Ok(Self::Error),
            other => Err(ParseScanStatusError(other.to_string())),
        }
    }
}

/// Durable per-chain scan cursor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub chain_id: u64,
    /// Highest block whose logs have been enqueued, inclusive.
    pub last_scanned_block: u64,
    /// Head height at the last successful round.
    pub latest_network_block: u64,
    pub status: ScanStatus,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ScanProgress {
    pub fn new(chain_id: u64, start_block: u64) -> Self {
        Self {
            chain_id,
            last_scanned_block: start_block,
            latest_network_block: start_block,
            status: ScanStatus::Paused,
            error: None,
            updated_at: Utc::now(),
        }
    }
}
