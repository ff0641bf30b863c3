//! Block watcher: the slot classification and epoch transition loop.
//!
//! Each tick walks every slot between the persisted cursor and the chain
//! tip, classifying the outcome of every leader slot of every monitored
//! pool. The cursor is saved after every scan, including failed ones, so
//! a restart resumes from the exact slot where processing stopped.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use cardano::LedgerSet;
use chain::{Block, ChainClient};
use config::{Pool, PoolStats, Pools};
use metrics::Collection;
use schedule::Refresher;
use store::{ProgressStore, ScheduleStore};

use crate::{HealthStore, WatcherError};

/// Theoretical number of slots in one epoch. Real epochs end earlier
/// when trailing slots stay empty.
pub const MAX_SLOTS_PER_EPOCH: u64 = 432_000;

/// Scan cursor backed by the progress table. The in-memory epoch and
/// slot always advance, even when persisting them fails; the next
/// successful save catches the row up.
pub struct BlockState {
    chain: Arc<dyn ChainClient>,
    progress: ProgressStore,
    /// Epoch currently being scanned.
    pub epoch: u64,
    /// Last slot fully processed.
    pub slot: u64,
}

impl std::fmt::Debug for BlockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockState")
            .field("epoch", &self.epoch)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

impl BlockState {
    /// Create an unloaded cursor.
    pub fn new(chain: Arc<dyn ChainClient>, progress: ProgressStore) -> Self {
        Self { chain, progress, epoch: 0, slot: 0 }
    }

    /// Load the cursor from the progress table, seeding it from the
    /// chain tip when no row exists yet. Seeding does not persist; the
    /// first save after a scan does.
    pub async fn load(&mut self) -> Result<(), WatcherError> {
        match self.progress.load().await? {
            Some(progress) => {
                self.epoch = progress.epoch;
                self.slot = progress.slot;
            }
            None => {
                let tip = self.chain.latest_block().await?;
                self.epoch = tip.epoch;
                self.slot = tip.slot;
            }
        }
        Ok(())
    }

    /// Load the cursor and, when the chain has moved past the stored
    /// epoch while the process was down, adopt the first block of
    /// `current_epoch` as the new cursor and persist it. Skipped epochs
    /// are not back-filled.
    pub async fn load_and_reconcile(&mut self, current_epoch: u64) -> Result<(), WatcherError> {
        self.load().await?;

        debug!(current_epoch, state_epoch = self.epoch, "reconciling scan cursor");
        if current_epoch > self.epoch {
            let block = self.chain.first_block_in_epoch(current_epoch).await?;
            self.save(current_epoch, block.slot).await?;
        }
        Ok(())
    }

    /// Advance the cursor and upsert the progress row.
    pub async fn save(&mut self, epoch: u64, slot: u64) -> Result<(), WatcherError> {
        self.epoch = epoch;
        self.slot = slot;
        self.progress.save(epoch, slot).await?;
        Ok(())
    }
}

/// Block watcher configuration.
#[derive(Debug, Clone, Copy)]
pub struct BlockWatcherConfig {
    /// Interval between scan ticks.
    pub refresh_interval: Duration,
}

/// Watches block production of the monitored pools.
pub struct BlockWatcher {
    chain: Arc<dyn ChainClient>,
    schedules: ScheduleStore,
    refresher: Arc<Refresher>,
    state: BlockState,
    metrics: Collection,
    pools: Pools,
    stats: PoolStats,
    health: Arc<HealthStore>,
    config: BlockWatcherConfig,
}

impl std::fmt::Debug for BlockWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockWatcher")
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl BlockWatcher {
    /// Create a block watcher over the given collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        schedules: ScheduleStore,
        refresher: Arc<Refresher>,
        state: BlockState,
        metrics: Collection,
        pools: Pools,
        health: Arc<HealthStore>,
        config: BlockWatcherConfig,
    ) -> Self {
        let stats = pools.stats();
        Self { chain, schedules, refresher, state, metrics, pools, stats, health, config }
    }

    /// Run the watcher until a fatal error occurs. Transient scan
    /// failures are logged and retried on the next tick; the polling
    /// interval is the only retry mechanism.
    pub async fn run(mut self) -> Result<(), WatcherError> {
        self.init_state().await?;
        self.init_metrics();

        if let Err(err) = self.ensure_pools_have_slots().await {
            if let WatcherError::NoSlotsAssigned { ref pool_id, epoch } = err {
                error!(pool_id, epoch, "pool has no leader slots assigned, is it a new pool?");
            }
            return Err(err);
        }

        let mut ticker = tokio::time::interval(self.config.refresh_interval);
        // The interval's first tick completes immediately.
        ticker.tick().await;
        let mut was_healthy = false;
        loop {
            let healthy = self.health.is_healthy();
            if healthy != was_healthy {
                if healthy {
                    info!("block watcher is ready");
                } else {
                    warn!("block watcher is not ready");
                }
            }
            was_healthy = healthy;

            if healthy {
                if let Err(err) = self.tick().await {
                    if err.is_fatal() {
                        return Err(err);
                    }
                    error!(error = %err, "scan failed, retrying on next tick");
                }
            }

            ticker.tick().await;
        }
    }

    async fn init_state(&mut self) -> Result<(), WatcherError> {
        let epoch = self.chain.latest_epoch().await?;
        info!(epoch = epoch.epoch, "loading and reconciling scan cursor");
        self.state.load_and_reconcile(epoch.epoch).await?;
        info!(epoch = self.state.epoch, slot = self.state.slot, "scan cursor ready");
        Ok(())
    }

    /// One scan tick: publish next leader slots, walk the new slot
    /// range, and complete an epoch transition when one was crossed.
    async fn tick(&mut self) -> Result<(), WatcherError> {
        let tip = self.chain.latest_block().await?;

        self.publish_next_leader_slots(&tip).await?;

        let transition = self.scan(&tip).await?;
        if transition {
            self.complete_epoch_transition().await?;
            self.init_metrics();
        }
        Ok(())
    }

    /// Walk the slot range `[cursor + 1, end]` and classify every leader
    /// slot. Returns whether an epoch transition was detected.
    ///
    /// When the tip has moved into a new epoch, the end of the range is
    /// not the tip slot but the last slot of the old epoch, computed
    /// from the last block actually produced in it plus the remaining
    /// theoretical slot budget. Every slot of the old epoch is
    /// classified before the cursor moves on.
    async fn scan(&mut self, tip: &Block) -> Result<bool, WatcherError> {
        let start = self.state.slot + 1;
        let mut end = tip.slot;

        let transition = tip.epoch > self.state.epoch;
        if transition {
            info!(epoch = tip.epoch, "a new epoch has started");
            let last_block = self.chain.last_block_in_epoch(self.state.epoch).await?;
            let remaining = MAX_SLOTS_PER_EPOCH - last_block.epoch_slot;
            end = last_block.slot + remaining;
        }

        debug!(start, end, "scanning slot range");
        if start <= end {
            let (last_completed, result) = self.process_slots(self.state.epoch, start, end).await;

            // The cursor is saved even when the scan failed partway, so
            // the next run resumes from the failing slot instead of
            // reclassifying the whole range.
            if let Err(err) = self.state.save(self.state.epoch, last_completed).await {
                error!(slot = last_completed, error = %err, "unable to save scan cursor");
            }
            result?;
            self.metrics.latest_slot_processed.set(last_completed as i64);
        }

        Ok(transition)
    }

    /// Process slots strictly in increasing order. Returns the last slot
    /// processed together with the outcome; on error at slot `k` the
    /// returned cursor is `k`, so resumption starts at `k + 1`.
    async fn process_slots(
        &self,
        epoch: u64,
        start: u64,
        end: u64,
    ) -> (u64, Result<(), WatcherError>) {
        for slot in start..=end {
            debug!(
                slot,
                epoch,
                total = self.stats.total,
                active = self.stats.active,
                excluded = self.stats.excluded,
                "processing slot"
            );
            for pool in self.pools.active() {
                if let Err(err) = self.process_pool_slot(epoch, pool, slot).await {
                    return (slot, Err(err));
                }
            }
        }
        (end, Ok(()))
    }

    async fn process_pool_slot(
        &self,
        epoch: u64,
        pool: &Pool,
        slot: u64,
    ) -> Result<(), WatcherError> {
        let empty = self.schedules.is_empty(&pool.id, epoch).await?;
        if empty && pool.allow_empty_slots {
            debug!(pool = %pool.name, epoch, "pool has no leader slots but empty slots are allowed");
            return Ok(());
        }

        if self.schedules.is_leader(&pool.id, slot, epoch).await? {
            self.classify_leader_slot(epoch, pool, slot).await?;
        } else {
            debug!(pool = %pool.name, slot, epoch, "pool is not a leader for slot");
        }
        Ok(())
    }

    /// Classify the outcome of a slot this pool was leader for.
    ///
    /// No block at the slot is a missed block. A block credited to this
    /// pool is a validated block. A block credited to another leader is
    /// an orphaned block, a lost slot battle. Any other chain-API
    /// failure aborts the scan.
    async fn classify_leader_slot(
        &self,
        epoch: u64,
        pool: &Pool,
        slot: u64,
    ) -> Result<(), WatcherError> {
        info!(pool = %pool.name, pool_id = %pool.id, slot, epoch, "pool leads slot");

        match self.chain.block_by_slot(slot).await {
            Err(err) if err.is_not_found() => self.record_missed(pool, slot, epoch),
            Err(err) => return Err(err.into()),
            Ok(block) if block.slot_leader == pool.id => {
                self.record_validated(pool, slot, epoch, &block);
            }
            Ok(block) => self.record_orphaned(pool, slot, epoch, &block),
        }
        Ok(())
    }

    fn record_missed(&self, pool: &Pool, slot: u64, epoch: u64) {
        info!(pool = %pool.name, pool_id = %pool.id, slot, epoch, "pool missed block");

        let labels = pool_epoch_labels(pool, epoch);
        let labels = labels.each_ref().map(String::as_str);
        self.metrics.missed_blocks.with_label_values(&labels).inc();
        self.metrics.consecutive_missed_blocks.with_label_values(&labels).inc();
    }

    fn record_validated(&self, pool: &Pool, slot: u64, epoch: u64, block: &Block) {
        info!(
            pool = %pool.name,
            pool_id = %pool.id,
            slot,
            epoch,
            height = block.height,
            epoch_slot = block.epoch_slot,
            "pool proposed block"
        );

        let labels = pool_epoch_labels(pool, epoch);
        let labels = labels.each_ref().map(String::as_str);
        self.metrics.validated_blocks.with_label_values(&labels).inc();
        self.metrics.consecutive_missed_blocks.with_label_values(&labels).set(0.0);
    }

    fn record_orphaned(&self, pool: &Pool, slot: u64, epoch: u64, block: &Block) {
        info!(
            pool = %pool.name,
            pool_id = %pool.id,
            slot,
            epoch,
            height = block.height,
            epoch_slot = block.epoch_slot,
            "pool lost the slot battle"
        );

        let labels = pool_epoch_labels(pool, epoch);
        let labels = labels.each_ref().map(String::as_str);
        self.metrics.orphaned_blocks.with_label_values(&labels).inc();
    }

    /// Complete a detected epoch transition: move the cursor to the new
    /// epoch, refresh every pool's leader schedule for it and re-check
    /// the leader-slot presence guard.
    async fn complete_epoch_transition(&mut self) -> Result<(), WatcherError> {
        let epoch = self.chain.latest_epoch().await?;

        self.state.save(epoch.epoch, self.state.slot).await?;

        info!(epoch = epoch.epoch, "refreshing leader schedules for the new epoch");
        self.refresher.refresh(epoch.epoch, LedgerSet::Current).await?;

        if let Err(err) = self.ensure_pools_have_slots().await {
            if let WatcherError::NoSlotsAssigned { ref pool_id, epoch } = err {
                error!(pool_id, epoch, "pool has no leader slots assigned, is it a new pool?");
            }
            return Err(err);
        }
        Ok(())
    }

    /// Assert every active pool that does not allow empty slots has a
    /// non-empty schedule for the current epoch. Storage errors during
    /// the check are logged and skipped; only a confirmed empty schedule
    /// raises the alert.
    async fn ensure_pools_have_slots(&self) -> Result<(), WatcherError> {
        for pool in self.pools.active() {
            if pool.allow_empty_slots {
                continue;
            }
            match self.schedules.is_empty(&pool.id, self.state.epoch).await {
                Ok(true) => {
                    return Err(WatcherError::NoSlotsAssigned {
                        pool_id: pool.id.clone(),
                        epoch: self.state.epoch,
                    });
                }
                Ok(false) => {}
                Err(err) => {
                    error!(pool_id = %pool.id, error = %err, "unable to check pool leader slots");
                }
            }
        }
        Ok(())
    }

    /// Publish and log the next leader slot of every pool. A next slot
    /// of 0 means the pool has no further slots this epoch.
    async fn publish_next_leader_slots(&self, tip: &Block) -> Result<(), WatcherError> {
        for pool in self.pools.active() {
            if pool.allow_empty_slots {
                continue;
            }
            let next_slot =
                self.schedules.next_slot_after(&pool.id, tip.slot, self.state.epoch).await?;
            let remaining_slots = if next_slot == 0 { 0 } else { next_slot - tip.slot };

            info!(
                pool = %pool.name,
                pool_id = %pool.id,
                epoch = self.state.epoch,
                next_slot,
                remaining_slots,
                "next leader slot"
            );
            let labels = pool_epoch_labels(pool, self.state.epoch);
            self.metrics
                .next_slot_leader
                .with_label_values(&labels.each_ref().map(String::as_str))
                .set(next_slot as f64);
        }
        Ok(())
    }

    /// Reset the per-epoch outcome series and publish them at zero for
    /// every active pool, so dashboards show 0 rather than absence.
    fn init_metrics(&self) {
        self.metrics.missed_blocks.reset();
        self.metrics.validated_blocks.reset();
        self.metrics.orphaned_blocks.reset();

        for pool in self.pools.active() {
            let labels = pool_epoch_labels(pool, self.state.epoch);
            let labels = labels.each_ref().map(String::as_str);
            self.metrics.missed_blocks.with_label_values(&labels).inc_by(0);
            self.metrics.validated_blocks.with_label_values(&labels).inc_by(0);
            self.metrics.orphaned_blocks.with_label_values(&labels).inc_by(0);
            self.metrics.consecutive_missed_blocks.with_label_values(&labels).add(0.0);
        }
    }
}

fn pool_epoch_labels(pool: &Pool, epoch: u64) -> [String; 4] {
    [pool.name.clone(), pool.id.clone(), pool.instance.clone(), epoch.to_string()]
}
