//! Network watcher: chain-wide gauges.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use chain::ChainClient;
use config::Network;
use metrics::Collection;

use crate::{HealthStore, WatcherError};

/// Cardano epochs last five days on every network we watch.
const EPOCH_DURATION_DAYS: f64 = 5.0;

/// Network watcher configuration.
#[derive(Debug, Clone, Copy)]
pub struct NetworkWatcherConfig {
    /// Network being watched, used as the chain-id label.
    pub network: Network,
    /// Interval between collection ticks.
    pub refresh_interval: Duration,
}

/// Publishes chain, network and epoch gauges.
pub struct NetworkWatcher {
    chain: Arc<dyn ChainClient>,
    metrics: Collection,
    health: Arc<HealthStore>,
    config: NetworkWatcherConfig,
}

impl std::fmt::Debug for NetworkWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkWatcher").field("config", &self.config).finish_non_exhaustive()
    }
}

impl NetworkWatcher {
    /// Create a network watcher over the given collaborators.
    pub fn new(
        chain: Arc<dyn ChainClient>,
        metrics: Collection,
        health: Arc<HealthStore>,
        config: NetworkWatcherConfig,
    ) -> Self {
        Self { chain, metrics, health, config }
    }

    /// Run the watcher. Collection failures are logged and retried on
    /// the next tick.
    pub async fn run(self) -> Result<(), WatcherError> {
        let mut ticker = tokio::time::interval(self.config.refresh_interval);
        // The interval's first tick completes immediately.
        ticker.tick().await;
        let mut was_healthy = false;
        loop {
            let healthy = self.health.is_healthy();
            if healthy != was_healthy {
                if healthy {
                    info!("network watcher is ready");
                } else {
                    warn!("network watcher is not ready");
                }
            }
            was_healthy = healthy;

            if healthy {
                if let Err(err) = self.collect().await {
                    error!(error = %err, "unable to collect network data");
                }
            }

            ticker.tick().await;
        }
    }

    async fn collect(&self) -> Result<(), WatcherError> {
        self.collect_chain_info().await?;
        self.collect_network_info().await?;
        self.collect_epoch_info().await?;
        Ok(())
    }

    async fn collect_chain_info(&self) -> Result<(), WatcherError> {
        self.metrics.epoch_duration.set(EPOCH_DURATION_DAYS);

        let genesis = self.chain.genesis().await?;
        self.metrics
            .chain_id
            .with_label_values(&[&self.config.network.to_string()])
            .set(genesis.network_magic as f64);
        Ok(())
    }

    async fn collect_network_info(&self) -> Result<(), WatcherError> {
        let pool_count = self.chain.pool_count().await?;
        self.metrics.network_pools.set(pool_count as i64);

        let info = self.chain.network_info().await?;
        let active_stake: u64 = info
            .stake
            .active
            .parse()
            .map_err(|source| WatcherError::Numeric { field: "active stake", source })?;
        self.metrics.network_active_stake.set(active_stake as f64);
        Ok(())
    }

    async fn collect_epoch_info(&self) -> Result<(), WatcherError> {
        let epoch = self.chain.latest_epoch().await?;
        self.metrics.network_epoch.set(epoch.epoch as i64);
        self.metrics.network_proposed_blocks.set(epoch.block_count as i64);
        self.metrics.next_epoch_start_time.set(epoch.end_time);

        let block = self.chain.latest_block().await?;
        self.metrics.network_block_height.set(block.height as i64);
        self.metrics.network_slot.set(block.slot as i64);
        self.metrics.network_epoch_slot.set(block.epoch_slot as i64);
        Ok(())
    }
}
