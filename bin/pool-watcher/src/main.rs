//! Entrypoint.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenvy::dotenv;
use eyre::WrapErr;
use futures::future::try_join_all;
use prometheus::Registry;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cardano::{CliClient, CliOpts, LedgerSet, NodeClient, SystemExecutor};
use chain::{BlockfrostClient, BlockfrostOpts, ChainClient};
use config::Opts;
use metrics::Collection;
use runtime::{ShutdownSignal, run_until_shutdown};
use schedule::Refresher;
use server::AppState;
use store::{ProgressStore, ScheduleStore};
use watcher::{
    BlockState, BlockWatcher, BlockWatcherConfig, HealthStore, NetworkWatcher,
    NetworkWatcherConfig, PoolWatcher, PoolWatcherConfig, StatusWatcher,
};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    if let Ok(custom_env_file) = std::env::var("ENV_FILE") {
        dotenvy::from_filename(custom_env_file)?;
    } else {
        // Try the default .env file, and ignore if it doesn't exist.
        dotenv().ok();
    }

    let opts = Opts::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!(network = %opts.network, "cardano pool watcher starting");

    run_until_shutdown(run(opts), ShutdownSignal::new(), || info!("shutting down")).await
}

async fn run(opts: Opts) -> eyre::Result<()> {
    let pools = opts.load_pools().wrap_err("unable to load pools file")?;
    let stats = pools.stats();
    info!(total = stats.total, active = stats.active, excluded = stats.excluded, "pools loaded");

    let db = store::connect(&opts.database_path).await.wrap_err("unable to open database")?;
    let schedules = ScheduleStore::new(db.clone());
    let progress = ProgressStore::new(db);

    let chain: Arc<dyn ChainClient> = Arc::new(BlockfrostClient::new(BlockfrostOpts {
        endpoint: opts.blockfrost.endpoint.clone(),
        project_id: opts.blockfrost.project_id.clone(),
        timeout: Duration::from_secs(opts.blockfrost.timeout_secs),
    })?);
    let node: Arc<dyn NodeClient> = Arc::new(CliClient::new(
        CliOpts {
            db_path: opts.database_path.clone(),
            config_dir: opts.cardano.config_dir.clone(),
            network: opts.network,
            socket_path: opts.cardano.socket_path.clone(),
            timezone: opts.cardano.timezone.clone(),
        },
        chain.clone(),
        Arc::new(SystemExecutor),
    ));

    let registry = Arc::new(Registry::new());
    let collection = Collection::new()?;
    collection.register(&registry)?;

    let health = Arc::new(HealthStore::new());
    let refresher = Arc::new(Refresher::new(
        chain.clone(),
        node.clone(),
        schedules.clone(),
        collection.clone(),
        pools.clone(),
    ));

    // Refresh the leader schedules for the current epoch before anything
    // starts scanning.
    let epoch = chain.latest_epoch().await.wrap_err("unable to get latest epoch")?;
    refresher
        .refresh(epoch.epoch, LedgerSet::Current)
        .await
        .wrap_err("unable to refresh leader schedules")?;

    let mut tasks: Vec<Pin<Box<dyn Future<Output = eyre::Result<()>> + Send>>> = Vec::new();

    let addr: SocketAddr = format!("{}:{}", opts.http.host, opts.http.port)
        .parse()
        .wrap_err("invalid http server address")?;
    tasks.push(Box::pin(server::run(addr, AppState::new(registry, health.clone()))));

    let status = StatusWatcher::new(chain.clone(), node, collection.clone(), health.clone());
    tasks.push(Box::pin(async move { status.run().await.wrap_err("status watcher failed") }));

    if opts.block_watcher.enabled {
        info!(component = "block-watcher", "starting watcher");
        let state = BlockState::new(chain.clone(), progress);
        let block_watcher = BlockWatcher::new(
            chain.clone(),
            schedules,
            refresher,
            state,
            collection.clone(),
            pools.clone(),
            health.clone(),
            BlockWatcherConfig {
                refresh_interval: Duration::from_secs(opts.block_watcher.refresh_interval_secs),
            },
        );
        tasks.push(Box::pin(async move {
            block_watcher.run().await.wrap_err("block watcher failed")
        }));
    }

    if opts.pool_watcher.enabled {
        info!(component = "pool-watcher", "starting watcher");
        let pool_watcher = PoolWatcher::new(
            chain.clone(),
            collection.clone(),
            pools,
            PoolWatcherConfig {
                refresh_interval: Duration::from_secs(opts.pool_watcher.refresh_interval_secs),
            },
        );
        tasks
            .push(Box::pin(async move { pool_watcher.run().await.wrap_err("pool watcher failed") }));
    }

    if opts.network_watcher.enabled {
        info!(component = "network-watcher", "starting watcher");
        let network_watcher = NetworkWatcher::new(
            chain,
            collection,
            health,
            NetworkWatcherConfig {
                network: opts.network,
                refresh_interval: Duration::from_secs(opts.network_watcher.refresh_interval_secs),
            },
        );
        tasks.push(Box::pin(async move {
            network_watcher.run().await.wrap_err("network watcher failed")
        }));
    }

    // The loops never return on their own; the first failure brings the
    // whole process down so the orchestrator can restart it.
    try_join_all(tasks).await?;
    Ok(())
}
