//! Per-chain pools of JSON-RPC endpoint clients with health probing,
//! capability discovery, FIFO rotation, retry, and failover.

use alloy::{
    network::Ethereum,
    providers::{
        fillers::FillProvider, utils::JoinedRecommendedFillers, ProviderBuilder, RootProvider,
    },
};
use thiserror::Error;
use url::Url;

pub mod pool;
pub mod prober;
pub mod supervisor;

pub use pool::{EndpointPool, PoolClient};
pub use supervisor::PoolSupervisor;

/// HTTP provider with the recommended filler stack.
pub type RpcProvider = FillProvider<JoinedRecommendedFillers, RootProvider, Ethereum>;

pub(crate) fn build_provider(url: &Url) -> RpcProvider {
    ProviderBuilder::new().on_http(url.clone())
}

#[derive(Debug, Error)]
pub enum PoolError {
    /// The supervisor has no pool for the requested chain.
    #[error("no pool for chain {0}")]
    NoPool(u64),

    /// A pool was configured without any candidate endpoints.
    #[error("no endpoints configured for chain {0}")]
    NoEndpoints(u64),

    /// Every rotation slot was tried and none was usable.
    #[error("no usable endpoint for chain {chain_id} after {attempts} attempts")]
    NoUsableEndpoint { chain_id: u64, attempts: usize },

    /// The per-call switch budget ran out; `source` is the last endpoint's
    /// error.
    #[error("operation failed after {switches} endpoint switches: {source}")]
    SwitchBudgetExhausted {
        switches: usize,
        #[source]
        source: anyhow::Error,
    },

    /// Failure talking to the k/v store backing rotation and metadata.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
