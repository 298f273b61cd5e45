use std::time::Duration;

use clap::Parser;
use timelock_utils::parse_duration;

/// Configuration for a per-chain endpoint pool.
#[derive(Clone, Debug, Parser)]
pub struct RpcPoolOptions {
    /// Interval between background re-probes of every endpoint.
    #[clap(
        long,
        env = "TIMELOCK_RPC_POOL_HEALTH_CHECK_INTERVAL",
        default_value = "3m",
        value_parser = parse_duration,
    )]
    pub health_check_interval: Duration,

    /// Attempts against a single endpoint before rotating to the next.
    #[clap(long, env = "TIMELOCK_RPC_POOL_MAX_RETRY_COUNT", default_value = "5")]
    pub max_retry_count: usize,

    /// Endpoint rotations allowed for a single logical call.
    #[clap(long, env = "TIMELOCK_RPC_POOL_MAX_RPC_SWITCH_COUNT", default_value = "5")]
    pub max_rpc_switch_count: usize,
}

impl Default for RpcPoolOptions {
    fn default() -> Self {
        Self::parse_from(std::iter::empty::<String>())
    }
}

/// Configuration for the per-chain scanner loops and the flow refresher.
#[derive(Clone, Debug, Parser)]
pub struct ScannerOptions {
    /// Request span cap once the scanner is near the head.
    #[clap(long, env = "TIMELOCK_SCANNER_SCAN_BATCH_SIZE_SLOW", default_value = "100")]
    pub scan_batch_size_slow: u64,

    /// Producer cadence while the cursor is near the head.
    #[clap(
        long,
        env = "TIMELOCK_SCANNER_SCAN_INTERVAL_SLOW",
        default_value = "30s",
        value_parser = parse_duration,
    )]
    pub scan_interval_slow: Duration,

    /// Reorg buffer: blocks behind the head the producer never advances past.
    #[clap(long, env = "TIMELOCK_SCANNER_SCAN_CONFIRMATIONS", default_value = "3")]
    pub scan_confirmations: u64,

    /// Lag (in blocks) above which the producer switches to catch-up cadence.
    #[clap(long, env = "TIMELOCK_SCANNER_NEAR_LATEST_THRESHOLD", default_value = "100")]
    pub near_latest_threshold: u64,

    /// Producer cadence while catching up.
    #[clap(
        long,
        env = "TIMELOCK_SCANNER_NEAR_LATEST_WAIT_TIME",
        default_value = "15s",
        value_parser = parse_duration,
    )]
    pub near_latest_wait_time: Duration,

    /// Records drained from the durable queue per consumer wake.
    #[clap(long, env = "TIMELOCK_SCANNER_LOG_QUEUE_BATCH_SIZE", default_value = "100")]
    pub log_queue_batch_size: usize,

    /// Cadence of the waiting→ready / ready→expired refresher.
    #[clap(
        long,
        env = "TIMELOCK_SCANNER_FLOW_REFRESH_INTERVAL",
        default_value = "60s",
        value_parser = parse_duration,
    )]
    pub flow_refresh_interval: Duration,

    /// Flows examined per refresher wake.
    #[clap(long, env = "TIMELOCK_SCANNER_FLOW_REFRESH_BATCH_SIZE", default_value = "100")]
    pub flow_refresh_batch_size: usize,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self::parse_from(std::iter::empty::<String>())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let pool = RpcPoolOptions::default();
        assert_eq!(pool.health_check_interval, Duration::from_secs(180));
        assert_eq!(pool.max_retry_count, 5);
        assert_eq!(pool.max_rpc_switch_count, 5);

        let scanner = ScannerOptions::default();
        assert_eq!(scanner.scan_interval_slow, Duration::from_secs(30));
        assert_eq!(scanner.scan_confirmations, 3);
        assert_eq!(scanner.near_latest_threshold, 100);
        assert_eq!(scanner.near_latest_wait_time, Duration::from_secs(15));
        assert_eq!(scanner.log_queue_batch_size, 100);
        assert_eq!(scanner.flow_refresh_interval, Duration::from_secs(60));
    }
}
