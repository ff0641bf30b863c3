//! Long-running watcher loops.
//!
//! Four independent polling loops share the process-wide collaborators:
//! the block watcher (slot classification and epoch transitions), the
//! pool watcher (registration and saturation gauges), the network
//! watcher (chain-wide gauges) and the status watcher, which is the
//! sole writer of the [`HealthStore`] the other loops gate on.

pub mod block;
pub mod health;
pub mod network;
pub mod pool;
pub mod status;

pub use block::{BlockState, BlockWatcher, BlockWatcherConfig};
pub use health::HealthStore;
pub use network::{NetworkWatcher, NetworkWatcherConfig};
pub use pool::{PoolWatcher, PoolWatcherConfig};
pub use status::StatusWatcher;

/// Errors surfaced by the watcher loops. Most are retried on the next
/// tick; [`WatcherError::is_fatal`] marks the ones that terminate the
/// watcher instead.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// A chain-data query failed.
    #[error(transparent)]
    Chain(#[from] chain::ChainError),
    /// A storage operation failed.
    #[error(transparent)]
    Store(#[from] store::StoreError),
    /// A leader-schedule refresh failed.
    #[error(transparent)]
    Schedule(#[from] schedule::ScheduleError),
    /// A numeric field from the chain API could not be parsed.
    #[error("unable to parse {field}: {source}")]
    Numeric {
        /// Field that failed to parse.
        field: &'static str,
        /// Underlying parse error.
        #[source]
        source: std::num::ParseIntError,
    },
    /// An active pool has no leader slots assigned for the epoch. This
    /// is an operator alert, not a transient fault.
    #[error("pool {pool_id} has no slots assigned for epoch {epoch}, consider excluding it")]
    NoSlotsAssigned {
        /// Pool with the empty schedule.
        pool_id: String,
        /// Epoch it has no slots in.
        epoch: u64,
    },
}

impl WatcherError {
    /// Whether this error must terminate the watcher rather than be
    /// retried on the next tick.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Schedule(_) | Self::NoSlotsAssigned { .. })
    }
}
