//! Status watcher: the sole writer of the shared health flag.

use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use cardano::NodeClient;
use chain::ChainClient;
use metrics::Collection;

use crate::{HealthStore, WatcherError};

/// Interval between status checks.
const REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// A flag older than this many intervals is considered stale.
const STALE_MULTIPLIER: u32 = 2;

/// Checks the chain API and the local node and writes the result into
/// the [`HealthStore`] every other watcher gates on.
pub struct StatusWatcher {
    chain: Arc<dyn ChainClient>,
    node: Arc<dyn NodeClient>,
    metrics: Collection,
    health: Arc<HealthStore>,
}

impl std::fmt::Debug for StatusWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusWatcher").finish_non_exhaustive()
    }
}

impl StatusWatcher {
    /// Create a status watcher over the given collaborators.
    pub fn new(
        chain: Arc<dyn ChainClient>,
        node: Arc<dyn NodeClient>,
        metrics: Collection,
        health: Arc<HealthStore>,
    ) -> Self {
        Self { chain, node, metrics, health }
    }

    /// Run the watcher. Never fails; an unreachable collaborator flips
    /// the flag instead of erroring out.
    pub async fn run(self) -> Result<(), WatcherError> {
        let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
        // The interval's first tick completes immediately.
        ticker.tick().await;
        loop {
            self.check_status().await;
            ticker.tick().await;
        }
    }

    /// One status check. Skipped when another writer refreshed the flag
    /// longer than the staleness window ago.
    async fn check_status(&self) {
        let fresh = self
            .health
            .last_refresh()
            .is_none_or(|at| at.elapsed() < STALE_MULTIPLIER * REFRESH_INTERVAL);
        if !fresh {
            return;
        }

        let api_healthy = match self.chain.health().await {
            Ok(health) => {
                if !health.is_healthy {
                    error!("chain API reports itself unhealthy");
                }
                health.is_healthy
            }
            Err(err) => {
                error!(error = %err, "unable to check chain API health");
                false
            }
        };

        let node_connected = match self.node.ping().await {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, "cardano node is not responding");
                false
            }
        };

        let healthy = api_healthy && node_connected;
        self.metrics.health_status.set(i64::from(healthy));
        self.health.set_healthy(healthy);
    }
}
