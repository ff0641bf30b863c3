//! Prometheus metrics exposed by the watcher.
//!
//! Every metric lives in one [`Collection`] constructed at startup and
//! handed to the watchers; nothing registers on a global registry.

use prometheus::{Gauge, GaugeVec, IntCounterVec, IntGauge, Opts, Registry};

const NAMESPACE: &str = "cardano_pool_watcher";

/// Labels attached to every per-pool block-production series.
pub const POOL_EPOCH_LABELS: &[&str] = &["pool_name", "pool_id", "pool_instance", "epoch"];

/// Labels attached to per-pool health series.
pub const POOL_LABELS: &[&str] = &["pool_name", "pool_id", "pool_instance"];

/// All metrics published by the watcher.
#[derive(Debug, Clone)]
pub struct Collection {
    /// Blocks this pool was expected to produce in the epoch.
    pub expected_blocks: GaugeVec,
    /// Blocks validated by the pool in the epoch.
    pub validated_blocks: IntCounterVec,
    /// Leader slots for which no block appeared on chain.
    pub missed_blocks: IntCounterVec,
    /// Leader slots lost to a competing block (slot battles).
    pub orphaned_blocks: IntCounterVec,
    /// Current streak of missed blocks; reset when a block validates.
    pub consecutive_missed_blocks: GaugeVec,
    /// Next slot this pool leads, 0 when none remain this epoch.
    pub next_slot_leader: GaugeVec,
    /// Latest slot fully processed by the block watcher.
    pub latest_slot_processed: IntGauge,
    /// Whether the chain API and the node are both reachable (0 or 1).
    pub health_status: IntGauge,

    /// Current saturation level of the pool.
    pub pool_saturation_level: GaugeVec,
    /// Whether the pool meets its declared pledge (0 or 1).
    pub pool_pledge_met: GaugeVec,
    /// Count of relays registered for the pool.
    pub pool_relays: GaugeVec,
    /// Number of validators monitored by the watcher, by status.
    pub monitored_validators: GaugeVec,

    /// Network magic of the chain being watched.
    pub chain_id: GaugeVec,
    /// Duration of an epoch in days.
    pub epoch_duration: Gauge,
    /// Current epoch number.
    pub network_epoch: IntGauge,
    /// Start time of the next epoch in seconds.
    pub next_epoch_start_time: IntGauge,
    /// Latest known block height.
    pub network_block_height: IntGauge,
    /// Latest known slot.
    pub network_slot: IntGauge,
    /// Latest known epoch slot.
    pub network_epoch_slot: IntGauge,
    /// Total number of pools in the network.
    pub network_pools: IntGauge,
    /// Number of blocks proposed in the current epoch by the network.
    pub network_proposed_blocks: IntGauge,
    /// Total active stake in the network.
    pub network_active_stake: Gauge,
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

impl Collection {
    /// Build the collection. Metrics are not registered yet; see
    /// [`Collection::register`].
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            expected_blocks: GaugeVec::new(
                opts("expected_blocks", "Blocks expected to be produced by the pool in the epoch"),
                POOL_EPOCH_LABELS,
            )?,
            validated_blocks: IntCounterVec::new(
                opts("validated_blocks", "Blocks successfully proposed by the pool"),
                POOL_EPOCH_LABELS,
            )?,
            missed_blocks: IntCounterVec::new(
                opts("missed_blocks", "Leader slots for which the pool produced no block"),
                POOL_EPOCH_LABELS,
            )?,
            orphaned_blocks: IntCounterVec::new(
                opts("orphaned_blocks", "Leader slots lost to a competing block"),
                POOL_EPOCH_LABELS,
            )?,
            consecutive_missed_blocks: GaugeVec::new(
                opts("consecutive_missed_blocks", "Current streak of missed blocks"),
                POOL_EPOCH_LABELS,
            )?,
            next_slot_leader: GaugeVec::new(
                opts("next_slot_leader", "Next slot the pool is scheduled to lead"),
                POOL_EPOCH_LABELS,
            )?,
            latest_slot_processed: IntGauge::with_opts(opts(
                "latest_slot_processed_by_block_watcher",
                "Latest slot processed by the block watcher",
            ))?,
            health_status: IntGauge::with_opts(opts(
                "health_status",
                "Whether the chain API and the cardano node are reachable (0 or 1)",
            ))?,
            pool_saturation_level: GaugeVec::new(
                opts("pool_saturation_level", "The current saturation level of the pool in percent"),
                POOL_LABELS,
            )?,
            pool_pledge_met: GaugeVec::new(
                opts("pool_pledge_met", "Whether the pool has met its pledge requirements (0 or 1)"),
                POOL_LABELS,
            )?,
            pool_relays: GaugeVec::new(
                opts("pool_relays", "Count of relays associated with each pool"),
                POOL_LABELS,
            )?,
            monitored_validators: GaugeVec::new(
                opts("monitored_validators", "Number of validators monitored by the watcher"),
                &["status"],
            )?,
            chain_id: GaugeVec::new(opts("chain_id", "Chain ID"), &["chain_id"])?,
            epoch_duration: Gauge::with_opts(opts(
                "epoch_duration",
                "Duration of an epoch in days",
            ))?,
            network_epoch: IntGauge::with_opts(opts("network_epoch", "Current epoch number"))?,
            next_epoch_start_time: IntGauge::with_opts(opts(
                "next_epoch_start_time",
                "Start time of the next epoch in seconds",
            ))?,
            network_block_height: IntGauge::with_opts(opts(
                "network_block_height",
                "Latest known block height",
            ))?,
            network_slot: IntGauge::with_opts(opts("network_slot", "Latest known slot"))?,
            network_epoch_slot: IntGauge::with_opts(opts(
                "network_epoch_slot",
                "Latest known epoch slot",
            ))?,
            network_pools: IntGauge::with_opts(opts(
                "network_pools",
                "Total number of pools in the network",
            ))?,
            network_proposed_blocks: IntGauge::with_opts(opts(
                "network_blocks_proposed_current_epoch",
                "Number of blocks proposed in the current epoch by the network",
            ))?,
            network_active_stake: Gauge::with_opts(opts(
                "network_active_stake",
                "Total active stake in the network",
            ))?,
        })
    }

    /// Register every metric on `registry`.
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.expected_blocks.clone()))?;
        registry.register(Box::new(self.validated_blocks.clone()))?;
        registry.register(Box::new(self.missed_blocks.clone()))?;
        registry.register(Box::new(self.orphaned_blocks.clone()))?;
        registry.register(Box::new(self.consecutive_missed_blocks.clone()))?;
        registry.register(Box::new(self.next_slot_leader.clone()))?;
        registry.register(Box::new(self.latest_slot_processed.clone()))?;
        registry.register(Box::new(self.health_status.clone()))?;
        registry.register(Box::new(self.pool_saturation_level.clone()))?;
        registry.register(Box::new(self.pool_pledge_met.clone()))?;
        registry.register(Box::new(self.pool_relays.clone()))?;
        registry.register(Box::new(self.monitored_validators.clone()))?;
        registry.register(Box::new(self.chain_id.clone()))?;
        registry.register(Box::new(self.epoch_duration.clone()))?;
        registry.register(Box::new(self.network_epoch.clone()))?;
        registry.register(Box::new(self.next_epoch_start_time.clone()))?;
        registry.register(Box::new(self.network_block_height.clone()))?;
        registry.register(Box::new(self.network_slot.clone()))?;
        registry.register(Box::new(self.network_epoch_slot.clone()))?;
        registry.register(Box::new(self.network_pools.clone()))?;
        registry.register(Box::new(self.network_proposed_blocks.clone()))?;
        registry.register(Box::new(self.network_active_stake.clone()))?;
        Ok(())
    }
}
