//! Cardano node tooling invoked as subprocesses.
//!
//! Two external programs are wrapped here: `cardano-cli` (node liveness
//! ping and stake-snapshot queries over the node socket) and `cncli`
//! (the leader-schedule computation). Both run behind the
//! [`CommandExecutor`] seam so tests can script their output.

use async_trait::async_trait;
use serde::Deserialize;

use config::Pool;

mod cli;
mod executor;

pub use cli::{CliClient, CliOpts};
pub use executor::{CommandExecutor, SystemExecutor};

/// Errors from the subprocess collaborators.
#[derive(Debug, thiserror::Error)]
pub enum CardanoError {
    /// The subprocess could not be spawned or awaited.
    #[error("unable to run {program}: {source}")]
    Io {
        /// Program that failed to run.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The subprocess exited with a non-zero status.
    #[error("{program} failed: {stderr}")]
    Command {
        /// Program that failed.
        program: String,
        /// Captured stderr output.
        stderr: String,
    },
    /// The subprocess produced output we could not decode.
    #[error("unable to decode {program} output: {source}")]
    Decode {
        /// Program whose output was malformed.
        program: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// The leader-schedule tool reported a logical error despite exiting
    /// zero.
    #[error("leaderlog reported an error: {0}")]
    Tool(String),
    /// A required input file is missing.
    #[error("unable to find {0}")]
    MissingFile(String),
    /// A chain-data lookup needed to build the command failed.
    #[error(transparent)]
    Chain(#[from] chain::ChainError),
}

/// Ledger stake-snapshot set used by the leader-schedule computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerSet {
    /// Previous epoch's snapshot (`go`).
    Prev,
    /// Current epoch's snapshot (`set`).
    Current,
    /// Next epoch's snapshot (`mark`).
    Next,
}

impl LedgerSet {
    /// Flag value understood by the tool.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prev => "prev",
            Self::Current => "current",
            Self::Next => "next",
        }
    }
}

/// One assigned leader slot in a leaderlog response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssignedSlot {
    /// Ordinal of the assignment within the epoch.
    #[serde(default)]
    pub no: u64,
    /// Absolute slot number.
    pub slot: u64,
    /// Slot offset within the epoch.
    #[serde(default, rename = "slotInEpoch")]
    pub slot_in_epoch: u64,
    /// Wall-clock time of the slot.
    #[serde(default)]
    pub at: Option<String>,
}

/// Structured output of the leader-schedule computation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LeaderLogs {
    /// `"ok"` or `"error"`.
    pub status: String,
    /// Error detail when `status == "error"`.
    #[serde(default, rename = "errorMessage")]
    pub error_message: Option<String>,
    /// Epoch the schedule was computed for.
    #[serde(default)]
    pub epoch: u64,
    /// Epoch nonce used as computation input.
    #[serde(default, rename = "epochNonce")]
    pub epoch_nonce: String,
    /// Number of leader slots the tool reports for the epoch. This is
    /// the expected-block count, carried separately from the slot list.
    #[serde(default, rename = "epochSlots")]
    pub epoch_slots: u64,
    /// Ideal number of slots for this pool given its stake.
    #[serde(default, rename = "epochSlotsIdeal")]
    pub epoch_slots_ideal: f64,
    /// The assigned leader slots, ascending.
    #[serde(default, rename = "assignedSlots")]
    pub assigned_slots: Vec<AssignedSlot>,
}

/// Per-pool stake across the three ledger snapshots, in lovelace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PoolStake {
    /// `go` snapshot (previous epoch).
    #[serde(default, rename = "stakeGo")]
    pub stake_go: u64,
    /// `mark` snapshot (next epoch).
    #[serde(default, rename = "stakeMark")]
    pub stake_mark: u64,
    /// `set` snapshot (current epoch).
    #[serde(default, rename = "stakeSet")]
    pub stake_set: u64,
}

/// Output of `cardano-cli query stake-snapshot`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StakeSnapshot {
    /// Stake per pool, keyed by hex pool id.
    #[serde(default)]
    pub pools: std::collections::HashMap<String, PoolStake>,
    /// Network-wide totals.
    #[serde(default)]
    pub total: PoolStake,
}

/// Capability interface over the local node tooling.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Compute the leader schedule for `pool` with the given epoch nonce.
    async fn leader_logs(
        &self,
        ledger_set: LedgerSet,
        epoch_nonce: &str,
        pool: &Pool,
    ) -> Result<LeaderLogs, CardanoError>;

    /// Query the stake snapshot for `pool_id`.
    async fn stake_snapshot(&self, pool_id: &str) -> Result<StakeSnapshot, CardanoError>;

    /// Ping the node socket. Output is discarded; only success matters.
    async fn ping(&self) -> Result<(), CardanoError>;
}
