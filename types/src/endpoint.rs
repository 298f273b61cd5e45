use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Capability probe ladder, largest `getLogs` span first.
pub const RANGE_LADDER: [u64; 4] = [50_000, 2_000, 500, 100];

/// Span assumed when every capability probe fails.
pub const MIN_SAFE_RANGE: u64 = 100;

/// Endpoints whose consecutive error count exceeds this are skipped by the
/// pool until a health check rehabilitates them.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Lifetime of endpoint metadata in the k/v store.
pub const METADATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Health and capability record for a single RPC endpoint, shared through the
/// k/v store under [`EndpointMetadata::kv_key`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndpointMetadata {
    pub url: Url,
    pub chain_id: u64,
    pub healthy: bool,
    /// Largest block span this endpoint reliably answers `getLogs` for.
    pub max_safe_range: u64,
    pub last_checked_at: DateTime<Utc>,
    pub last_response_time_ms: u64,
    pub consecutive_error_count: u32,
    pub last_error: Option<String>,
}

impl EndpointMetadata {
    pub fn new(chain_id: u64, url: Url) -> Self {
        Self {
            url,
            chain_id,
            healthy: false,
            max_safe_range: MIN_SAFE_RANGE,
            last_checked_at: Utc::now(),
            last_response_time_ms: 0,
            consecutive_error_count: 0,
            last_error: None,
        }
    }

    pub fn kv_key(chain_id: u64, url: &Url) -> String {
        format!("rpc:metadata:{chain_id}:{url}")
    }

    /// Key of the per-chain FIFO rotation queue.
    pub fn rotation_key(chain_id: u64) -> String {
        format!("rpc:queue_fifo:{chain_id}")
    }

    pub fn record_success(&mut self) {
        self.healthy = true;
        self.consecutive_error_count = 0;
        self.last_error = None;
        self.last_checked_at = Utc::now();
    }

    pub fn record_failure(&mut self, error: impl ToString) {
        self.healthy = false;
        self.consecutive_error_count += 1;
        self.last_error = Some(error.to_string());
        self.last_checked_at = Utc::now();
    }

    /// Whether the pool may hand this endpoint out without re-probing.
    pub fn usable(&self) -> bool {
        self.consecutive_error_count <= MAX_CONSECUTIVE_ERRORS
    }
}
