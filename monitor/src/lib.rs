//! The timelock monitor service: wires the endpoint pools, per-chain
//! scanners, flow refresher, and notification dispatcher together.

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use timelock_notify::{Dispatcher, WebhookSender};
use timelock_rpc_pool::PoolSupervisor;
use timelock_scanner::{ChainScanner, FlowProjector};
use timelock_storage::{
    persistence::sql::SqlPersistence, KvStore, LogQueue, Persistence, RedisKv,
};
use timelock_types::{RpcPoolOptions, ScannerOptions};
use timelock_utils::logging;
use tokio_util::sync::CancellationToken;

/// Service configuration; every flag can also come from the environment.
#[derive(Clone, Debug, Parser)]
#[command(version, about = "Monitors on-chain timelocks and notifies subscribers")]
pub struct Options {
    /// Postgres connection string.
    #[clap(long, env = "TIMELOCK_DATABASE_URL")]
    pub database_url: String,

    /// Redis connection string.
    #[clap(
        long,
        env = "TIMELOCK_REDIS_URL",
        default_value = "redis://127.0.0.1:6379"
    )]
    pub redis_url: String,

    /// Also monitor chains flagged as testnets.
    #[clap(long, env = "TIMELOCK_RPC_INCLUDE_TESTNETS")]
    pub include_testnets: bool,

    #[clap(flatten)]
    pub rpc_pool: RpcPoolOptions,

    #[clap(flatten)]
    pub scanner: ScannerOptions,

    #[clap(flatten)]
    pub logging: logging::Config,
}

/// Bring the whole pipeline up and run until SIGINT.
pub async fn run(opts: Options) -> anyhow::Result<()> {
    let store: Arc<dyn Persistence> = Arc::new(
        SqlPersistence::connect(&opts.database_url)
            .await
            .context("database connection failed")?,
    );
    let kv: Arc<dyn KvStore> = Arc::new(
        RedisKv::connect(&opts.redis_url)
            .await
            .context("redis connection failed")?,
    );

    let chains = store.active_chains(opts.include_testnets).await?;
    if chains.is_empty() {
        bail!("no active chains configured");
    }

    let supervisor = Arc::new(PoolSupervisor::new(opts.rpc_pool.clone(), kv.clone()));
    supervisor.start(&chains).await?;

    let sender = Arc::new(WebhookSender::new()?);
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), sender));
    let projector = Arc::new(FlowProjector::new(store.clone(), dispatcher));

    let cancel = CancellationToken::new();

    let refresher = {
        let projector = projector.clone();
        let options = opts.scanner.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { projector.run_refresher(options, cancel).await })
    };

    let queue = LogQueue::new(kv.clone());
    let mut scanners = Vec::with_capacity(chains.len());
    for chain in &chains {
        let scanner = ChainScanner::new(
            chain.chain_id,
            supervisor.clone(),
            store.clone(),
            queue.clone(),
            projector.clone(),
            opts.scanner.clone(),
            cancel.child_token(),
        );
        let chain_id = chain.chain_id;
        scanners.push(tokio::spawn(async move {
            if let Err(err) = scanner.run().await {
                tracing::error!(chain_id, err = %format!("{err:#}"), "scanner exited with error");
            }
        }));
    }
    tracing::info!(chains = chains.len(), "timelock monitor started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received, draining");
    cancel.cancel();

    for task in scanners {
        let _ = task.await;
    }
    refresher.abort();
    supervisor.stop().await;
    tracing::info!("timelock monitor stopped");
    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_options_parse_with_defaults() {
        let opts = Options::try_parse_from([
            "timelock-monitor",
            "--database-url",
            "postgres://localhost/timelock",
        ])
        .unwrap();
        assert_eq!(opts.redis_url, "redis://127.0.0.1:6379");
        assert!(!opts.include_testnets);
        assert_eq!(opts.rpc_pool.max_retry_count, 5);
        assert_eq!(opts.scanner.scan_confirmations, 3);
    }

    #[test]
    fn test_database_url_is_required() {
        assert!(Options::try_parse_from(["timelock-monitor"]).is_err());
    }
}
