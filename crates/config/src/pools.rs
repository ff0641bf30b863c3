//! Monitored pool definitions, loaded once at startup.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::ConfigError;

/// A monitored stake pool. Immutable for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Pool {
    /// Bech32 pool id.
    pub id: String,
    /// Operator-scoped instance label attached to every metric series.
    pub instance: String,
    /// Human-readable pool name.
    pub name: String,
    /// Path to the pool's VRF signing key, consumed only by the
    /// leader-schedule computation.
    pub key: PathBuf,
    /// Known but not actively tracked.
    #[serde(default)]
    pub exclude: bool,
    /// The pool legitimately has zero assigned slots in some epochs;
    /// suppress the no-slots alarm for it.
    #[serde(default, rename = "allow-empty-slots")]
    pub allow_empty_slots: bool,
}

/// Counts of monitored pools by status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Actively tracked pools.
    pub active: usize,
    /// Configured but excluded pools.
    pub excluded: usize,
    /// All configured pools.
    pub total: usize,
}

/// The full set of configured pools.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pools(Vec<Pool>);

#[derive(Debug, Deserialize)]
struct PoolsFile {
    pools: Pools,
}

impl Pools {
    /// Pools that are actively tracked.
    pub fn active(&self) -> Vec<&Pool> {
        self.0.iter().filter(|p| !p.exclude).collect()
    }

    /// Pools that are configured but excluded from tracking.
    pub fn excluded(&self) -> Vec<&Pool> {
        self.0.iter().filter(|p| p.exclude).collect()
    }

    /// Counts by status.
    pub fn stats(&self) -> PoolStats {
        let excluded = self.excluded().len();
        PoolStats { active: self.0.len() - excluded, excluded, total: self.0.len() }
    }

    /// Whether no pools are configured at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over every configured pool.
    pub fn iter(&self) -> std::slice::Iter<'_, Pool> {
        self.0.iter()
    }
}

impl FromIterator<Pool> for Pools {
    fn from_iter<T: IntoIterator<Item = Pool>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Load the pools file at `path`.
pub fn load(path: &Path) -> Result<Pools, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    let file: PoolsFile = serde_yaml::from_str(&raw)?;
    Ok(file.pools)
}
