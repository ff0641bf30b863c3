//! Chain-data client for the pool watcher.
//!
//! The watcher never talks to the Cardano network directly; it uses an
//! external indexing API (Blockfrost) as ground truth for blocks, epochs
//! and pool registration data. This crate defines the [`ChainClient`]
//! capability trait consumed by the watchers and its production
//! implementation in [`blockfrost`].

use async_trait::async_trait;
use serde::Deserialize;

pub mod blockfrost;

pub use blockfrost::{BlockfrostClient, BlockfrostOpts};

/// Errors returned by chain-data queries.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The requested resource does not exist. For block-by-slot queries
    /// this is normal control flow: the slot produced no block.
    #[error("requested resource not found")]
    NotFound,
    /// Transport-level failure (connection, timeout, decoding).
    #[error("chain API request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The API answered with a non-success status other than 404.
    #[error("chain API returned status {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body, if any.
        message: String,
    },
}

impl ChainError {
    /// Whether this error signals a missing resource rather than a failure.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// A block as reported by the indexing API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Block {
    /// Unix timestamp of the block.
    pub time: i64,
    /// Block height.
    pub height: u64,
    /// Block hash.
    pub hash: String,
    /// Absolute slot number.
    pub slot: u64,
    /// Epoch the block belongs to.
    pub epoch: u64,
    /// Slot offset within the epoch.
    pub epoch_slot: u64,
    /// Bech32 pool id of the slot leader that produced the block.
    pub slot_leader: String,
}

/// Summary of an epoch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Epoch {
    /// Epoch number.
    pub epoch: u64,
    /// Unix timestamp of the epoch start.
    pub start_time: i64,
    /// Unix timestamp of the epoch end.
    pub end_time: i64,
    /// Number of blocks produced so far in the epoch.
    pub block_count: u64,
}

/// Protocol parameters of an epoch. Only the nonce is consumed, as input
/// to the leader-schedule computation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EpochParameters {
    /// Epoch number.
    pub epoch: u64,
    /// Epoch nonce (hex).
    pub nonce: String,
}

/// On-chain registration data for a stake pool.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PoolInfo {
    /// Bech32 pool id.
    pub pool_id: String,
    /// Hex-encoded pool id, used to index stake-snapshot output.
    pub hex: String,
    /// Live saturation ratio.
    pub live_saturation: f64,
    /// Live pledge in lovelace, as a decimal string.
    pub live_pledge: String,
    /// Declared pledge in lovelace, as a decimal string.
    pub declared_pledge: String,
}

/// Off-chain pool metadata.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolMetadata {
    /// Pool ticker, if registered.
    pub ticker: Option<String>,
    /// Pool name, if registered.
    pub name: Option<String>,
}

/// A relay registered for a pool. Only counted, never dialed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolRelay {
    /// IPv4 address, if any.
    pub ipv4: Option<String>,
    /// DNS name, if any.
    pub dns: Option<String>,
    /// Relay port.
    pub port: Option<u16>,
}

/// Network-wide stake as reported by the indexing API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NetworkStake {
    /// Live stake in lovelace, as a decimal string.
    pub live: String,
    /// Active stake in lovelace, as a decimal string.
    pub active: String,
}

/// Network-wide information.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NetworkInfo {
    /// Stake totals.
    pub stake: NetworkStake,
}

/// Genesis parameters of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Genesis {
    /// Network magic, exposed as the chain-id metric.
    pub network_magic: u64,
    /// Number of slots in an epoch.
    pub epoch_length: u64,
}

/// Health status of the indexing API itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Health {
    /// Whether the API reports itself healthy.
    pub is_healthy: bool,
}

/// Capability interface over the chain indexing API.
///
/// One production implementation ([`BlockfrostClient`]) and scripted test
/// doubles in the consumer crates.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest known epoch.
    async fn latest_epoch(&self) -> Result<Epoch, ChainError>;
    /// Latest known block (chain tip).
    async fn latest_block(&self) -> Result<Block, ChainError>;
    /// Protocol parameters for `epoch`.
    async fn epoch_parameters(&self, epoch: u64) -> Result<EpochParameters, ChainError>;
    /// Block produced at absolute slot `slot`, or [`ChainError::NotFound`]
    /// if the slot stayed empty.
    async fn block_by_slot(&self, slot: u64) -> Result<Block, ChainError>;
    /// First block actually produced in `epoch`.
    async fn first_block_in_epoch(&self, epoch: u64) -> Result<Block, ChainError>;
    /// Last block actually produced in `epoch`.
    async fn last_block_in_epoch(&self, epoch: u64) -> Result<Block, ChainError>;
    /// Registration data for `pool_id`.
    async fn pool_info(&self, pool_id: &str) -> Result<PoolInfo, ChainError>;
    /// Off-chain metadata for `pool_id`.
    async fn pool_metadata(&self, pool_id: &str) -> Result<PoolMetadata, ChainError>;
    /// Registered relays for `pool_id`.
    async fn pool_relays(&self, pool_id: &str) -> Result<Vec<PoolRelay>, ChainError>;
    /// Total number of registered pools on the network.
    async fn pool_count(&self) -> Result<u64, ChainError>;
    /// Network-wide stake information.
    async fn network_info(&self) -> Result<NetworkInfo, ChainError>;
    /// Genesis parameters.
    async fn genesis(&self) -> Result<Genesis, ChainError>;
    /// Health of the indexing API.
    async fn health(&self) -> Result<Health, ChainError>;
}
