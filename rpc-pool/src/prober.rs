use std::time::{Duration, Instant};

use alloy::{providers::Provider, rpc::types::Filter};
use timelock_types::{
    endpoint::{MIN_SAFE_RANGE, RANGE_LADDER},
    EndpointMetadata,
};
use tokio::time::{sleep, timeout};
use url::Url;

use crate::{build_provider, RpcProvider};

/// Budget for the handshake and chain-id checks.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(20);

/// Budget for a single capability sub-probe.
pub const CAPABILITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between capability sub-probes.
pub const PROBE_SPACER: Duration = Duration::from_secs(2);

/// First block of the capability probe window. Low enough to exist on any
/// established chain, high enough to skip genesis quirks.
const PROBE_WINDOW_START: u64 = 10_000;

/// Probe a single endpoint: reachability, chain-id match, then the largest
/// `getLogs` span it accepts.
///
/// The returned metadata is healthy iff the endpoint answered the handshake
/// and reported the expected chain id; a fully failed capability search only
/// degrades `max_safe_range` to its floor.
pub async fn probe_endpoint(chain_id: u64, url: &Url) -> EndpointMetadata {
    let mut meta = EndpointMetadata::new(chain_id, url.clone());
    let provider = build_provider(url);
    let started = Instant::now();

    let head = match timeout(PROBE_TIMEOUT, provider.get_block_number()).await {
        Ok(Ok(head)) => head,
        Ok(Err(err)) => {
            meta.record_failure(format!("failed to fetch head block: {err}"));
            return meta;
        },
        Err(_) => {
            meta.record_failure("timed out fetching head block");
            return meta;
        },
    };

    match timeout(PROBE_TIMEOUT, provider.get_chain_id()).await {
        Ok(Ok(reported)) if reported == chain_id => {},
        Ok(Ok(reported)) => {
            meta.record_failure(format!(
                "chain id mismatch: expected {chain_id}, endpoint reports {reported}"
            ));
            return meta;
        },
        Ok(Err(err)) => {
            meta.record_failure(format!("failed to fetch chain id: {err}"));
            return meta;
        },
        Err(_) => {
            meta.record_failure("timed out fetching chain id");
            return meta;
        },
    }

    meta.last_response_time_ms = started.elapsed().as_millis() as u64;
    meta.max_safe_range = probe_capability(&provider).await;
    meta.record_success();
    tracing::debug!(
        chain_id,
        %url,
        head,
        max_safe_range = meta.max_safe_range,
        "endpoint probe succeeded"
    );
    meta
}

/// Descending search for the largest accepted `getLogs` span. Every probe
/// failing yields the floor of the ladder.
async fn probe_capability(provider: &RpcProvider) -> u64 {
    for (i, range) in RANGE_LADDER.iter().enumerate() {
        if i > 0 {
            sleep(PROBE_SPACER).await;
        }
        let filter = Filter::new()
            .from_block(PROBE_WINDOW_START)
            .to_block(PROBE_WINDOW_START + range - 1);
        match timeout(CAPABILITY_TIMEOUT, provider.get_logs(&filter)).await {
            Ok(Ok(_)) => return *range,
            Ok(Err(err)) => {
                tracing::debug!(range, %err, "capability probe rejected");
            },
            Err(_) => {
                tracing::debug!(range, "capability probe timed out");
            },
        }
    }
    MIN_SAFE_RANGE
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use timelock_utils::test_utils::setup_test;

    use super::*;

    #[test]
    fn test_range_ladder_is_descending() {
        for pair in RANGE_LADDER.windows(2) {
            assert!(pair[0] > pair[1]);
        }
        assert_eq!(*RANGE_LADDER.last().unwrap(), MIN_SAFE_RANGE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_endpoint_is_unhealthy() {
        setup_test();

        // Nothing listens on this URL; the handshake either errors out
        // immediately or hits the probe timeout under paused time.
        let url: Url = "http://127.0.0.1:1/".parse().unwrap();
        let meta = probe_endpoint(1, &url).await;
        assert!(!meta.healthy);
        assert_eq!(meta.consecutive_error_count, 1);
        assert!(meta.last_error.is_some());
        assert_eq!(meta.max_safe_range, MIN_SAFE_RANGE);
    }
}
