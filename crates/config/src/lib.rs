//! Pool watcher configuration.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use url::Url;

pub mod pools;

pub use pools::{Pool, PoolStats, Pools};

/// Configuration errors surfaced at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The pools file could not be read.
    #[error("unable to read pools file {path}: {source}")]
    Io {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The pools file could not be parsed.
    #[error("unable to parse pools file: {0}")]
    Parse(#[from] serde_yaml::Error),
    /// The configuration is structurally valid but semantically wrong.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Cardano network the watched node runs on. Drives the network-magic
/// arguments passed to `cardano-cli`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Network {
    /// Cardano mainnet.
    Mainnet,
    /// Pre-production testnet.
    Preprod,
    /// Preview testnet.
    Preview,
    /// Sanchonet testnet.
    Sanchonet,
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Mainnet => "mainnet",
            Self::Preprod => "preprod",
            Self::Preview => "preview",
            Self::Sanchonet => "sanchonet",
        };
        f.write_str(name)
    }
}

/// HTTP server configuration options.
#[derive(Debug, Clone, Parser)]
pub struct HttpOpts {
    /// Host on which the HTTP server should listen
    #[clap(long = "http-server-host", env = "HTTP_SERVER_HOST", default_value = "127.0.0.1")]
    pub host: String,
    /// Port on which the HTTP server should listen
    #[clap(long = "http-server-port", env = "HTTP_SERVER_PORT", default_value = "8080")]
    pub port: u16,
}

/// Blockfrost API configuration options.
#[derive(Debug, Clone, Parser)]
pub struct BlockfrostConfigOpts {
    /// Blockfrost API endpoint
    #[clap(long = "blockfrost-endpoint", env = "BLOCKFROST_ENDPOINT")]
    pub endpoint: Url,
    /// Blockfrost project id
    #[clap(long = "blockfrost-project-id", env = "BLOCKFROST_PROJECT_ID")]
    pub project_id: String,
    /// Timeout for requests to the Blockfrost API (in seconds)
    #[clap(long = "blockfrost-timeout", env = "BLOCKFROST_TIMEOUT", default_value = "60")]
    pub timeout_secs: u64,
}

/// Cardano node / tooling configuration options.
#[derive(Debug, Clone, Parser)]
pub struct CardanoOpts {
    /// Path to the directory where the cardano genesis config files are stored
    #[clap(long = "cardano-config-dir", env = "CARDANO_CONFIG_DIR", default_value = "/config")]
    pub config_dir: PathBuf,
    /// Socket path to communicate with a cardano node
    #[clap(
        long = "cardano-socket-path",
        env = "CARDANO_SOCKET_PATH",
        default_value = "/var/run/cardano.socket"
    )]
    pub socket_path: PathBuf,
    /// Timezone passed to the leader-schedule tool
    #[clap(long = "cardano-timezone", env = "CARDANO_TIMEZONE", default_value = "UTC")]
    pub timezone: String,
}

/// Block watcher configuration options.
#[derive(Debug, Clone, Parser)]
pub struct BlockWatcherOpts {
    /// Enable the block watcher
    #[clap(
        id = "block-watcher-enabled",
        long = "block-watcher-enabled",
        env = "BLOCK_WATCHER_ENABLED",
        default_value = "true"
    )]
    pub enabled: bool,
    /// Interval at which the block watcher collects and processes slots (in seconds)
    #[clap(
        id = "block-watcher-refresh-interval",
        long = "block-watcher-refresh-interval",
        env = "BLOCK_WATCHER_REFRESH_INTERVAL",
        default_value = "60"
    )]
    pub refresh_interval_secs: u64,
}

/// Pool watcher configuration options.
#[derive(Debug, Clone, Parser)]
pub struct PoolWatcherOpts {
    /// Enable the pool watcher
    #[clap(
        id = "pool-watcher-enabled",
        long = "pool-watcher-enabled",
        env = "POOL_WATCHER_ENABLED",
        default_value = "true"
    )]
    pub enabled: bool,
    /// Interval at which the pool watcher collects data about the monitored pools (in seconds)
    #[clap(
        id = "pool-watcher-refresh-interval",
        long = "pool-watcher-refresh-interval",
        env = "POOL_WATCHER_REFRESH_INTERVAL",
        default_value = "60"
    )]
    pub refresh_interval_secs: u64,
}

/// Network watcher configuration options.
#[derive(Debug, Clone, Parser)]
pub struct NetworkWatcherOpts {
    /// Enable the network watcher
    #[clap(
        id = "network-watcher-enabled",
        long = "network-watcher-enabled",
        env = "NETWORK_WATCHER_ENABLED",
        default_value = "true"
    )]
    pub enabled: bool,
    /// Interval at which the network watcher collects data about the network (in seconds)
    #[clap(
        id = "network-watcher-refresh-interval",
        long = "network-watcher-refresh-interval",
        env = "NETWORK_WATCHER_REFRESH_INTERVAL",
        default_value = "60"
    )]
    pub refresh_interval_secs: u64,
}

/// CLI options for the pool watcher.
#[derive(Debug, Clone, Parser)]
#[clap(about = "cardano pool watcher monitors the block production of a set of stake pools")]
pub struct Opts {
    /// Cardano network the node runs on
    #[clap(long, env = "NETWORK", value_enum, default_value_t = Network::Preprod)]
    pub network: Network,

    /// Path to the YAML file describing the monitored pools
    #[clap(long = "pools-file", env = "POOLS_FILE", default_value = "pools.yml")]
    pub pools_file: PathBuf,

    /// Path to the local sqlite database storing schedules and scan progress
    #[clap(long = "database-path", env = "DATABASE_PATH", default_value = "watcher.db")]
    pub database_path: PathBuf,

    /// HTTP server configuration
    #[clap(flatten)]
    pub http: HttpOpts,

    /// Blockfrost API configuration
    #[clap(flatten)]
    pub blockfrost: BlockfrostConfigOpts,

    /// Cardano node / tooling configuration
    #[clap(flatten)]
    pub cardano: CardanoOpts,

    /// Block watcher configuration
    #[clap(flatten)]
    pub block_watcher: BlockWatcherOpts,

    /// Pool watcher configuration
    #[clap(flatten)]
    pub pool_watcher: PoolWatcherOpts,

    /// Network watcher configuration
    #[clap(flatten)]
    pub network_watcher: NetworkWatcherOpts,
}

impl Opts {
    /// Load the pools file and validate the resulting configuration.
    pub fn load_pools(&self) -> Result<Pools, ConfigError> {
        let pools = pools::load(&self.pools_file)?;
        validate_pools(&pools)?;
        Ok(pools)
    }
}

fn validate_pools(pools: &Pools) -> Result<(), ConfigError> {
    if pools.is_empty() {
        return Err(ConfigError::Invalid("at least one pool must be defined".to_owned()));
    }
    for pool in pools.iter() {
        if pool.id.is_empty() {
            return Err(ConfigError::Invalid("id is required for all pools".to_owned()));
        }
        if pool.name.is_empty() {
            return Err(ConfigError::Invalid("name is required for all pools".to_owned()));
        }
        if pool.instance.is_empty() {
            return Err(ConfigError::Invalid("instance is required for all pools".to_owned()));
        }
        if pool.key.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("key is required for all pools".to_owned()));
        }
    }
    if pools.active().is_empty() {
        return Err(ConfigError::Invalid("at least one active pool must be defined".to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Opts::command().debug_assert()
    }

    fn opts_with_pools_file(path: PathBuf) -> Opts {
        Opts::parse_from([
            "pool-watcher",
            "--blockfrost-endpoint",
            "https://cardano-preprod.blockfrost.io/api/v0",
            "--blockfrost-project-id",
            "project",
            "--pools-file",
            path.to_str().unwrap(),
        ])
    }

    fn write_pools_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_and_validates_pools_file() {
        let file = write_pools_file(
            r"
pools:
  - id: pool1abc
    instance: cardano-node-0
    name: mypool
    key: /keys/pool.vrf.skey
  - id: pool1def
    instance: cardano-node-1
    name: otherpool
    key: /keys/other.vrf.skey
    exclude: true
    allow-empty-slots: true
",
        );

        let pools = opts_with_pools_file(file.path().to_path_buf()).load_pools().unwrap();
        assert_eq!(pools.stats(), PoolStats { active: 1, excluded: 1, total: 2 });
        assert!(pools.iter().nth(1).unwrap().allow_empty_slots);
    }

    #[test]
    fn rejects_pools_without_instance() {
        let file = write_pools_file(
            r"
pools:
  - id: pool1abc
    instance: ''
    name: mypool
    key: /keys/pool.vrf.skey
",
        );

        let err = opts_with_pools_file(file.path().to_path_buf()).load_pools().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("instance")));
    }

    #[test]
    fn rejects_all_excluded_pools() {
        let file = write_pools_file(
            r"
pools:
  - id: pool1abc
    instance: cardano-node-0
    name: mypool
    key: /keys/pool.vrf.skey
    exclude: true
",
        );

        let err = opts_with_pools_file(file.path().to_path_buf()).load_pools().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("active")));
    }
}
