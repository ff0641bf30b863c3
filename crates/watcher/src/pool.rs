//! Pool watcher: registration and saturation gauges.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use chain::{ChainClient, PoolInfo, PoolMetadata, PoolRelay};
use config::{Pool, PoolStats, Pools};
use metrics::Collection;

use crate::WatcherError;

/// Pool watcher configuration.
#[derive(Debug, Clone, Copy)]
pub struct PoolWatcherConfig {
    /// Interval between fetch ticks.
    pub refresh_interval: Duration,
}

/// Per-pool chain data fetched together and cached together.
#[derive(Debug, Clone)]
struct PoolData {
    info: PoolInfo,
    metadata: PoolMetadata,
    relays: Vec<PoolRelay>,
}

/// In-process cache of pool data. Registration data moves slowly, so
/// entries live for twice the refresh interval and every other tick is
/// served from memory.
#[derive(Debug)]
struct PoolDataCache {
    ttl: Duration,
    entries: HashMap<String, (Instant, PoolData)>,
}

impl PoolDataCache {
    fn new(ttl: Duration) -> Self {
        Self { ttl, entries: HashMap::new() }
    }

    fn get(&self, pool_id: &str) -> Option<&PoolData> {
        self.entries
            .get(pool_id)
            .filter(|(fetched_at, _)| fetched_at.elapsed() < self.ttl)
            .map(|(_, data)| data)
    }

    fn put(&mut self, pool_id: String, data: PoolData) {
        self.entries.insert(pool_id, (Instant::now(), data));
    }
}

/// Publishes saturation, pledge and relay gauges for every active pool.
pub struct PoolWatcher {
    chain: Arc<dyn ChainClient>,
    metrics: Collection,
    pools: Pools,
    stats: PoolStats,
    cache: PoolDataCache,
    config: PoolWatcherConfig,
}

impl std::fmt::Debug for PoolWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolWatcher").field("stats", &self.stats).finish_non_exhaustive()
    }
}

impl PoolWatcher {
    /// Create a pool watcher over the given collaborators.
    pub fn new(
        chain: Arc<dyn ChainClient>,
        metrics: Collection,
        pools: Pools,
        config: PoolWatcherConfig,
    ) -> Self {
        let stats = pools.stats();
        let cache = PoolDataCache::new(2 * config.refresh_interval);
        Self { chain, metrics, pools, stats, cache, config }
    }

    /// Run the watcher. Fetch failures are logged and retried on the
    /// next tick; nothing here is fatal.
    pub async fn run(mut self) -> Result<(), WatcherError> {
        let mut ticker = tokio::time::interval(self.config.refresh_interval);
        // The interval's first tick completes immediately.
        ticker.tick().await;
        loop {
            if let Err(err) = self.fetch().await {
                error!(error = %err, "unable to fetch pool data");
            }
            ticker.tick().await;
        }
    }

    async fn fetch(&mut self) -> Result<(), WatcherError> {
        self.metrics.monitored_validators.with_label_values(&["total"]).set(self.stats.total as f64);
        self.metrics
            .monitored_validators
            .with_label_values(&["active"])
            .set(self.stats.active as f64);
        self.metrics
            .monitored_validators
            .with_label_values(&["excluded"])
            .set(self.stats.excluded as f64);

        for pool in self.pools.active() {
            let data = match self.cache.get(&pool.id) {
                Some(data) => data.clone(),
                None => {
                    debug!(pool_id = %pool.id, "pool data cache miss");
                    let data = PoolData {
                        info: self.chain.pool_info(&pool.id).await?,
                        metadata: self.chain.pool_metadata(&pool.id).await?,
                        relays: self.chain.pool_relays(&pool.id).await?,
                    };
                    self.cache.put(pool.id.clone(), data.clone());
                    data
                }
            };
            self.publish(pool, &data)?;
        }
        Ok(())
    }

    fn publish(&self, pool: &Pool, data: &PoolData) -> Result<(), WatcherError> {
        self.metrics
            .pool_saturation_level
            .with_label_values(&[&pool.name, &pool.id, &pool.instance])
            .set(data.info.live_saturation);

        let live_pledge: u64 = data
            .info
            .live_pledge
            .parse()
            .map_err(|source| WatcherError::Numeric { field: "live pledge", source })?;
        let declared_pledge: u64 = data
            .info
            .declared_pledge
            .parse()
            .map_err(|source| WatcherError::Numeric { field: "declared pledge", source })?;
        let pledge_met = if live_pledge >= declared_pledge { 1.0 } else { 0.0 };
        self.metrics
            .pool_pledge_met
            .with_label_values(&[&pool.name, &pool.id, &pool.instance])
            .set(pledge_met);

        // Not every pool registers a ticker; fall back to its name.
        let ticker = data.metadata.ticker.as_deref().unwrap_or(&pool.name);
        self.metrics
            .pool_relays
            .with_label_values(&[ticker, &pool.id, &pool.instance])
            .set(data.relays.len() as f64);

        info!(
            pool = %pool.name,
            pool_id = %pool.id,
            saturation = data.info.live_saturation,
            pledge_met = live_pledge >= declared_pledge,
            relays = data.relays.len(),
            "pool data published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use chain::{
        Block, ChainError, Epoch, EpochParameters, Genesis, Health, NetworkInfo, PoolMetadata,
    };

    use super::*;

    struct StubChain {
        info: Mutex<PoolInfo>,
        ticker: Option<String>,
        relays: usize,
        info_calls: AtomicUsize,
    }

    impl StubChain {
        fn new(live_pledge: &str, declared_pledge: &str, ticker: Option<&str>) -> Self {
            Self {
                info: Mutex::new(PoolInfo {
                    pool_id: "pool1abc".to_owned(),
                    hex: "abcd".to_owned(),
                    live_saturation: 0.42,
                    live_pledge: live_pledge.to_owned(),
                    declared_pledge: declared_pledge.to_owned(),
                }),
                ticker: ticker.map(str::to_owned),
                relays: 3,
                info_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChainClient for StubChain {
        async fn latest_epoch(&self) -> Result<Epoch, ChainError> {
            unimplemented!("not used by the pool watcher")
        }
        async fn latest_block(&self) -> Result<Block, ChainError> {
            unimplemented!("not used by the pool watcher")
        }
        async fn epoch_parameters(&self, _epoch: u64) -> Result<EpochParameters, ChainError> {
            unimplemented!("not used by the pool watcher")
        }
        async fn block_by_slot(&self, _slot: u64) -> Result<Block, ChainError> {
            unimplemented!("not used by the pool watcher")
        }
        async fn first_block_in_epoch(&self, _epoch: u64) -> Result<Block, ChainError> {
            unimplemented!("not used by the pool watcher")
        }
        async fn last_block_in_epoch(&self, _epoch: u64) -> Result<Block, ChainError> {
            unimplemented!("not used by the pool watcher")
        }
        async fn pool_info(&self, _pool_id: &str) -> Result<PoolInfo, ChainError> {
            self.info_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.info.lock().unwrap().clone())
        }
        async fn pool_metadata(&self, _pool_id: &str) -> Result<PoolMetadata, ChainError> {
            Ok(PoolMetadata { ticker: self.ticker.clone(), name: Some("My Pool".to_owned()) })
        }
        async fn pool_relays(&self, _pool_id: &str) -> Result<Vec<PoolRelay>, ChainError> {
            Ok(vec![
                PoolRelay { ipv4: None, dns: Some("relay.example".to_owned()), port: Some(3001) };
                self.relays
            ])
        }
        async fn pool_count(&self) -> Result<u64, ChainError> {
            unimplemented!("not used by the pool watcher")
        }
        async fn network_info(&self) -> Result<NetworkInfo, ChainError> {
            unimplemented!("not used by the pool watcher")
        }
        async fn genesis(&self) -> Result<Genesis, ChainError> {
            unimplemented!("not used by the pool watcher")
        }
        async fn health(&self) -> Result<Health, ChainError> {
            unimplemented!("not used by the pool watcher")
        }
    }

    fn pools() -> Pools {
        [Pool {
            id: "pool1abc".to_owned(),
            instance: "cardano-node-0".to_owned(),
            name: "mypool".to_owned(),
            key: PathBuf::from("/keys/pool.vrf.skey"),
            exclude: false,
            allow_empty_slots: false,
        }]
        .into_iter()
        .collect()
    }

    fn watcher(chain: Arc<StubChain>) -> PoolWatcher {
        PoolWatcher::new(
            chain,
            Collection::new().unwrap(),
            pools(),
            PoolWatcherConfig { refresh_interval: Duration::from_secs(60) },
        )
    }

    #[tokio::test]
    async fn publishes_saturation_pledge_and_relay_gauges() {
        let chain = Arc::new(StubChain::new("2000000", "1000000", Some("MYPL")));
        let mut watcher = watcher(chain);

        watcher.fetch().await.unwrap();

        let saturation = watcher
            .metrics
            .pool_saturation_level
            .with_label_values(&["mypool", "pool1abc", "cardano-node-0"]);
        assert_eq!(saturation.get(), 0.42);

        let pledge_met = watcher
            .metrics
            .pool_pledge_met
            .with_label_values(&["mypool", "pool1abc", "cardano-node-0"]);
        assert_eq!(pledge_met.get(), 1.0);

        let relays = watcher
            .metrics
            .pool_relays
            .with_label_values(&["MYPL", "pool1abc", "cardano-node-0"]);
        assert_eq!(relays.get(), 3.0);

        let total = watcher.metrics.monitored_validators.with_label_values(&["total"]);
        assert_eq!(total.get(), 1.0);
    }

    #[tokio::test]
    async fn pledge_not_met_sets_gauge_to_zero() {
        let chain = Arc::new(StubChain::new("500000", "1000000", Some("MYPL")));
        let mut watcher = watcher(chain);

        watcher.fetch().await.unwrap();

        let pledge_met = watcher
            .metrics
            .pool_pledge_met
            .with_label_values(&["mypool", "pool1abc", "cardano-node-0"]);
        assert_eq!(pledge_met.get(), 0.0);
    }

    #[tokio::test]
    async fn missing_ticker_falls_back_to_pool_name() {
        let chain = Arc::new(StubChain::new("1", "1", None));
        let mut watcher = watcher(chain);

        watcher.fetch().await.unwrap();

        let relays = watcher
            .metrics
            .pool_relays
            .with_label_values(&["mypool", "pool1abc", "cardano-node-0"]);
        assert_eq!(relays.get(), 3.0);
    }

    #[tokio::test]
    async fn second_fetch_within_ttl_hits_the_cache() {
        let chain = Arc::new(StubChain::new("1", "1", Some("MYPL")));
        let mut watcher = watcher(chain.clone());

        watcher.fetch().await.unwrap();
        watcher.fetch().await.unwrap();

        assert_eq!(chain.info_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unparsable_pledge_is_an_error() {
        let chain = Arc::new(StubChain::new("not-a-number", "1", Some("MYPL")));
        let mut watcher = watcher(chain);

        let err = watcher.fetch().await.unwrap_err();
        assert!(matches!(err, WatcherError::Numeric { field: "live pledge", .. }));
    }
}
