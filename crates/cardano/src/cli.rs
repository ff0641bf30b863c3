//! `cardano-cli` / `cncli` client.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use chain::ChainClient;
use config::{Network, Pool};

use crate::{
    CardanoError, CommandExecutor, LeaderLogs, LedgerSet, NodeClient, StakeSnapshot,
};

/// Options for the CLI client.
#[derive(Debug, Clone)]
pub struct CliOpts {
    /// Path to the local database handed to the leader-schedule tool.
    pub db_path: PathBuf,
    /// Directory holding the byron/shelley genesis files.
    pub config_dir: PathBuf,
    /// Network the node runs on.
    pub network: Network,
    /// Node socket path.
    pub socket_path: PathBuf,
    /// Timezone passed to the leader-schedule tool.
    pub timezone: String,
}

/// Production [`NodeClient`] shelling out to `cardano-cli` and `cncli`.
pub struct CliClient {
    chain: Arc<dyn ChainClient>,
    executor: Arc<dyn CommandExecutor>,
    opts: CliOpts,
}

impl std::fmt::Debug for CliClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliClient").field("opts", &self.opts).finish_non_exhaustive()
    }
}

impl CliClient {
    /// Create a new CLI client.
    pub fn new(
        opts: CliOpts,
        chain: Arc<dyn ChainClient>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self { chain, executor, opts }
    }

    fn require_file(path: &std::path::Path, what: &str) -> Result<(), CardanoError> {
        if path.exists() {
            Ok(())
        } else {
            Err(CardanoError::MissingFile(format!("{what}: {}", path.display())))
        }
    }
}

#[async_trait]
impl NodeClient for CliClient {
    async fn ping(&self) -> Result<(), CardanoError> {
        let mut args = vec![
            "ping".to_owned(),
            "-u".to_owned(),
            self.opts.socket_path.display().to_string(),
            "-t".to_owned(),
            "-c".to_owned(),
            "1".to_owned(),
        ];
        match self.opts.network {
            Network::Mainnet => args.extend(["-m".to_owned(), "764824073".to_owned()]),
            Network::Preprod => args.extend(["-m".to_owned(), "1".to_owned()]),
            Network::Sanchonet => args.extend(["--testnet-magic".to_owned(), "4".to_owned()]),
            Network::Preview => args.extend(["--testnet-magic".to_owned(), "2".to_owned()]),
        }

        debug!(cmd = %format!("cardano-cli {}", args.join(" ")), "pinging cardano node");
        self.executor.exec(&[], "cardano-cli", &args).await?;
        Ok(())
    }

    async fn stake_snapshot(&self, pool_id: &str) -> Result<StakeSnapshot, CardanoError> {
        let mut args = vec![
            "query".to_owned(),
            "stake-snapshot".to_owned(),
            "--stake-pool-id".to_owned(),
            pool_id.to_owned(),
            "--socket-path".to_owned(),
            self.opts.socket_path.display().to_string(),
        ];
        match self.opts.network {
            Network::Mainnet => args.push("--mainnet".to_owned()),
            Network::Preprod => args.extend(["--testnet-magic".to_owned(), "1".to_owned()]),
            Network::Sanchonet => args.extend(["--testnet-magic".to_owned(), "4".to_owned()]),
            Network::Preview => args.extend(["--testnet-magic".to_owned(), "2".to_owned()]),
        }

        let output = self.executor.exec(&[], "cardano-cli", &args).await?;
        serde_json::from_slice(&output)
            .map_err(|source| CardanoError::Decode { program: "cardano-cli".to_owned(), source })
    }

    async fn leader_logs(
        &self,
        ledger_set: LedgerSet,
        epoch_nonce: &str,
        pool: &Pool,
    ) -> Result<LeaderLogs, CardanoError> {
        let byron_genesis = self.opts.config_dir.join("byron.json");
        let shelley_genesis = self.opts.config_dir.join("shelley.json");
        Self::require_file(&byron_genesis, "byron genesis file")?;
        Self::require_file(&shelley_genesis, "shelley genesis file")?;
        Self::require_file(&pool.key, "pool vrf skey file")?;

        let mut args = vec![
            "leaderlog".to_owned(),
            "--byron-genesis".to_owned(),
            byron_genesis.display().to_string(),
            "--shelley-genesis".to_owned(),
            shelley_genesis.display().to_string(),
            "--ledger-set".to_owned(),
            ledger_set.as_str().to_owned(),
            "--nonce".to_owned(),
            epoch_nonce.to_owned(),
            "--pool-id".to_owned(),
            pool.id.clone(),
            "--pool-vrf-skey".to_owned(),
            pool.key.display().to_string(),
            "--tz".to_owned(),
            self.opts.timezone.clone(),
            "--db".to_owned(),
            self.opts.db_path.display().to_string(),
        ];

        // The tool needs the pool and total stake figures for the selected
        // snapshot, keyed by the hex form of the pool id.
        let info = self.chain.pool_info(&pool.id).await?;
        let snapshot = self.stake_snapshot(&info.pool_id).await?;
        let pool_stake = snapshot.pools.get(&info.hex).copied().unwrap_or_default();
        let (pool_lovelace, total_lovelace) = match ledger_set {
            LedgerSet::Prev => (pool_stake.stake_go, snapshot.total.stake_go),
            LedgerSet::Current => (pool_stake.stake_set, snapshot.total.stake_set),
            LedgerSet::Next => (pool_stake.stake_mark, snapshot.total.stake_mark),
        };
        args.extend(["--pool-stake".to_owned(), pool_lovelace.to_string()]);
        args.extend(["--active-stake".to_owned(), total_lovelace.to_string()]);

        let output = match self.executor.exec(&[("RUST_LOG", "error")], "cncli", &args).await {
            Ok(output) => output,
            Err(err) => {
                error!(
                    pool_name = %pool.name,
                    pool_id = %pool.id,
                    "unable to execute cncli leaderlog command: {err}"
                );
                return Err(err);
            }
        };

        let logs: LeaderLogs = serde_json::from_slice(&output)
            .map_err(|source| CardanoError::Decode { program: "cncli".to_owned(), source })?;

        // The tool can exit zero while reporting a logical failure in the
        // response body.
        if logs.status == "error" {
            return Err(CardanoError::Tool(
                logs.error_message.unwrap_or_else(|| "unknown error".to_owned()),
            ));
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chain::{
        Block, ChainError, Epoch, EpochParameters, Genesis, Health, NetworkInfo, PoolInfo,
        PoolMetadata, PoolRelay,
    };

    use super::*;

    /// Scripted executor recording invocations and replaying canned output.
    #[derive(Default)]
    struct ScriptedExecutor {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        responses: Mutex<Vec<Result<Vec<u8>, CardanoError>>>,
    }

    impl ScriptedExecutor {
        fn push(&self, response: Result<Vec<u8>, CardanoError>) {
            self.responses.lock().unwrap().push(response);
        }

        fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandExecutor for ScriptedExecutor {
        async fn exec(
            &self,
            _envs: &[(&str, &str)],
            program: &str,
            args: &[String],
        ) -> Result<Vec<u8>, CardanoError> {
            self.calls.lock().unwrap().push((program.to_owned(), args.to_vec()));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(Vec::new());
            }
            responses.remove(0)
        }
    }

    /// Chain double returning fixed pool info.
    struct StaticChain;

    #[async_trait]
    impl ChainClient for StaticChain {
        async fn latest_epoch(&self) -> Result<Epoch, ChainError> {
            unimplemented!()
        }
        async fn latest_block(&self) -> Result<Block, ChainError> {
            unimplemented!()
        }
        async fn epoch_parameters(&self, _epoch: u64) -> Result<EpochParameters, ChainError> {
            unimplemented!()
        }
        async fn block_by_slot(&self, _slot: u64) -> Result<Block, ChainError> {
            unimplemented!()
        }
        async fn first_block_in_epoch(&self, _epoch: u64) -> Result<Block, ChainError> {
            unimplemented!()
        }
        async fn last_block_in_epoch(&self, _epoch: u64) -> Result<Block, ChainError> {
            unimplemented!()
        }
        async fn pool_info(&self, pool_id: &str) -> Result<PoolInfo, ChainError> {
            Ok(PoolInfo {
                pool_id: pool_id.to_owned(),
                hex: "deadbeef".to_owned(),
                live_saturation: 0.42,
                live_pledge: "100".to_owned(),
                declared_pledge: "100".to_owned(),
            })
        }
        async fn pool_metadata(&self, _pool_id: &str) -> Result<PoolMetadata, ChainError> {
            unimplemented!()
        }
        async fn pool_relays(&self, _pool_id: &str) -> Result<Vec<PoolRelay>, ChainError> {
            unimplemented!()
        }
        async fn pool_count(&self) -> Result<u64, ChainError> {
            unimplemented!()
        }
        async fn network_info(&self) -> Result<NetworkInfo, ChainError> {
            unimplemented!()
        }
        async fn genesis(&self) -> Result<Genesis, ChainError> {
            unimplemented!()
        }
        async fn health(&self) -> Result<Health, ChainError> {
            unimplemented!()
        }
    }

    fn client_with(
        network: Network,
        executor: Arc<ScriptedExecutor>,
        config_dir: PathBuf,
    ) -> CliClient {
        CliClient::new(
            CliOpts {
                db_path: PathBuf::from("watcher.db"),
                config_dir,
                network,
                socket_path: PathBuf::from("/var/run/cardano.socket"),
                timezone: "UTC".to_owned(),
            },
            Arc::new(StaticChain),
            executor,
        )
    }

    fn test_pool(key: PathBuf) -> Pool {
        Pool {
            id: "pool1abc".to_owned(),
            instance: "cardano-node-0".to_owned(),
            name: "mypool".to_owned(),
            key,
            exclude: false,
            allow_empty_slots: false,
        }
    }

    #[tokio::test]
    async fn ping_uses_network_magic() {
        let executor = Arc::new(ScriptedExecutor::default());
        let client =
            client_with(Network::Mainnet, Arc::clone(&executor), PathBuf::from("/config"));

        client.ping().await.unwrap();

        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "cardano-cli");
        assert!(calls[0].1.windows(2).any(|w| w == ["-m", "764824073"]));
    }

    #[tokio::test]
    async fn stake_snapshot_parses_output() {
        let executor = Arc::new(ScriptedExecutor::default());
        executor.push(Ok(br#"{
            "pools": {"deadbeef": {"stakeGo": 1, "stakeMark": 2, "stakeSet": 3}},
            "total": {"stakeGo": 10, "stakeMark": 20, "stakeSet": 30}
        }"#
            .to_vec()));
        let client =
            client_with(Network::Preprod, Arc::clone(&executor), PathBuf::from("/config"));

        let snapshot = client.stake_snapshot("pool1abc").await.unwrap();
        assert_eq!(snapshot.pools["deadbeef"].stake_set, 3);
        assert_eq!(snapshot.total.stake_set, 30);
        assert!(executor.calls()[0].1.windows(2).any(|w| w == ["--testnet-magic", "1"]));
    }

    #[tokio::test]
    async fn leader_logs_passes_current_snapshot_stake() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("byron.json"), "{}").unwrap();
        std::fs::write(dir.path().join("shelley.json"), "{}").unwrap();
        let key_path = dir.path().join("pool.vrf.skey");
        std::fs::write(&key_path, "key").unwrap();

        let executor = Arc::new(ScriptedExecutor::default());
        // stake-snapshot call, then cncli leaderlog.
        executor.push(Ok(br#"{
            "pools": {"deadbeef": {"stakeGo": 1, "stakeMark": 2, "stakeSet": 3}},
            "total": {"stakeGo": 10, "stakeMark": 20, "stakeSet": 30}
        }"#
            .to_vec()));
        executor.push(Ok(br#"{
            "status": "ok",
            "epoch": 450,
            "epochNonce": "nonce123",
            "epochSlots": 1,
            "epochSlotsIdeal": 2.5,
            "assignedSlots": [{"no": 1, "slot": 1000, "slotInEpoch": 1000}]
        }"#
            .to_vec()));
        let client =
            client_with(Network::Preprod, Arc::clone(&executor), dir.path().to_path_buf());

        let logs = client
            .leader_logs(LedgerSet::Current, "nonce123", &test_pool(key_path))
            .await
            .unwrap();
        assert_eq!(logs.epoch_slots, 1);
        assert_eq!(logs.assigned_slots.len(), 1);
        assert_eq!(logs.assigned_slots[0].slot, 1000);

        let calls = executor.calls();
        assert_eq!(calls[1].0, "cncli");
        assert!(calls[1].1.windows(2).any(|w| w == ["--pool-stake", "3"]));
        assert!(calls[1].1.windows(2).any(|w| w == ["--active-stake", "30"]));
    }

    #[tokio::test]
    async fn leader_logs_rejects_error_status_with_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("byron.json"), "{}").unwrap();
        std::fs::write(dir.path().join("shelley.json"), "{}").unwrap();
        let key_path = dir.path().join("pool.vrf.skey");
        std::fs::write(&key_path, "key").unwrap();

        let executor = Arc::new(ScriptedExecutor::default());
        executor.push(Ok(br#"{"pools": {}, "total": {}}"#.to_vec()));
        executor
            .push(Ok(br#"{"status": "error", "errorMessage": "node db out of sync"}"#.to_vec()));
        let client =
            client_with(Network::Preprod, Arc::clone(&executor), dir.path().to_path_buf());

        let err = client
            .leader_logs(LedgerSet::Current, "nonce123", &test_pool(key_path))
            .await
            .unwrap_err();
        assert!(matches!(err, CardanoError::Tool(msg) if msg.contains("out of sync")));
    }

    #[tokio::test]
    async fn leader_logs_requires_genesis_files() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("pool.vrf.skey");
        std::fs::write(&key_path, "key").unwrap();

        let executor = Arc::new(ScriptedExecutor::default());
        let client =
            client_with(Network::Preprod, Arc::clone(&executor), dir.path().to_path_buf());

        let err = client
            .leader_logs(LedgerSet::Current, "nonce123", &test_pool(key_path))
            .await
            .unwrap_err();
        assert!(matches!(err, CardanoError::MissingFile(msg) if msg.contains("byron")));
        assert!(executor.calls().is_empty());
    }
}
