//! Leader-schedule refresher.
//!
//! Computes and caches the per-epoch leader schedule of every monitored
//! pool. The computation itself runs in an external tool behind
//! [`cardano::NodeClient`]; this crate drives it, persists the result and
//! publishes the expected-block count for the epoch.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info};

use cardano::{LedgerSet, NodeClient};
use chain::ChainClient;
use config::{Pool, Pools};
use metrics::Collection;
use store::ScheduleStore;

/// Errors from a schedule refresh.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// The epoch nonce could not be fetched.
    #[error("unable to fetch parameters for epoch {epoch}: {source}")]
    EpochParameters {
        /// Epoch whose parameters were requested.
        epoch: u64,
        /// Underlying chain-API error.
        #[source]
        source: chain::ChainError,
    },
    /// A pool's schedule could not be computed or persisted. One failing
    /// pool fails the whole refresh; partial caches are worse than a
    /// retry on the next tick.
    #[error("unable to refresh schedule for pool {pool_id} in epoch {epoch}: {source}")]
    Refresh {
        /// Pool whose refresh failed.
        pool_id: String,
        /// Epoch being refreshed.
        epoch: u64,
        /// Underlying failure.
        #[source]
        source: RefreshCause,
    },
}

/// Underlying cause of a single-pool refresh failure.
#[derive(Debug, thiserror::Error)]
pub enum RefreshCause {
    /// The leader-schedule tool failed.
    #[error(transparent)]
    Tooling(#[from] cardano::CardanoError),
    /// The schedule could not be read from or written to the database.
    #[error(transparent)]
    Store(#[from] store::StoreError),
}

/// Drives leader-schedule computation for all monitored pools.
pub struct Refresher {
    chain: Arc<dyn ChainClient>,
    node: Arc<dyn NodeClient>,
    schedules: ScheduleStore,
    metrics: Collection,
    pools: Pools,
}

impl std::fmt::Debug for Refresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Refresher").field("pools", &self.pools.stats()).finish_non_exhaustive()
    }
}

impl Refresher {
    /// Create a refresher over the given collaborators.
    pub fn new(
        chain: Arc<dyn ChainClient>,
        node: Arc<dyn NodeClient>,
        schedules: ScheduleStore,
        metrics: Collection,
        pools: Pools,
    ) -> Self {
        Self { chain, node, schedules, metrics, pools }
    }

    /// Refresh the schedule of every active pool for `epoch`, reading
    /// stake from the given ledger snapshot. Pools whose schedule is
    /// already cached are skipped; their expected-block gauge is
    /// republished so the series survives process restarts. All pools
    /// run concurrently and the refresh fails if any of them fails.
    pub async fn refresh(&self, epoch: u64, ledger_set: LedgerSet) -> Result<(), ScheduleError> {
        let nonce = self
            .chain
            .epoch_parameters(epoch)
            .await
            .map_err(|source| ScheduleError::EpochParameters { epoch, source })?
            .nonce;

        let tasks = self.pools.active().into_iter().map(|pool| {
            let nonce = nonce.as_str();
            async move {
                self.refresh_pool(pool, epoch, ledger_set, nonce).await.map_err(|source| {
                    ScheduleError::Refresh { pool_id: pool.id.clone(), epoch, source }
                })
            }
        });
        try_join_all(tasks).await?;
        Ok(())
    }

    async fn refresh_pool(
        &self,
        pool: &Pool,
        epoch: u64,
        ledger_set: LedgerSet,
        nonce: &str,
    ) -> Result<(), RefreshCause> {
        if self.schedules.exists(&pool.id, epoch).await? {
            let schedule = self.schedules.get(&pool.id, epoch).await?;
            self.publish_expected_blocks(pool, epoch, schedule.quantity);
            debug!(pool = %pool.name, epoch, "schedule already computed, skipping");
            return Ok(());
        }

        info!(pool = %pool.name, epoch, ledger_set = ledger_set.as_str(), "computing leader schedule");
        let logs = self.node.leader_logs(ledger_set, nonce, pool).await?;

        let mut slots: Vec<u64> = logs.assigned_slots.iter().map(|s| s.slot).collect();
        slots.sort_unstable();

        self.schedules.put(&pool.id, epoch, &slots, logs.epoch_slots, &logs.epoch_nonce).await?;
        self.publish_expected_blocks(pool, epoch, logs.epoch_slots);
        info!(pool = %pool.name, epoch, expected = logs.epoch_slots, "leader schedule cached");
        Ok(())
    }

    fn publish_expected_blocks(&self, pool: &Pool, epoch: u64, quantity: u64) {
        self.metrics
            .expected_blocks
            .with_label_values(&[&pool.name, &pool.id, &pool.instance, &epoch.to_string()])
            .set(quantity as f64);
    }
}
