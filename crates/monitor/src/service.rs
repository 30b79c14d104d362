//! # Monitor Service
//!
//! Merakit semua komponen dari satu [`MonitorConfig`] dan mengelola
//! lifecycle background task.
//!
//! ## Komponen
//!
//! ```text
//! Monitor
//! ├── NodePool                 (shared, read-only)
//! ├── BlueScoreSource ◀── poller task
//! ├── HealthEvaluator
//! ├── MaxHashrateTracker ──▶ KeyValueStore
//! ├── MarketDataCache  ◀── refresher task
//! └── PriceCache
//! ```
//!
//! Ketiga pipeline (health, hashrate, market) tidak berbagi state mutable.
//!
//! ## Lifecycle
//!
//! ```text
//! new / from_config ──▶ start() ──▶ ... ──▶ shutdown()
//! ```
//!
//! `shutdown()` mengirim sinyal lewat `watch` channel dan menunggu semua
//! task selesai.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::blue_score::BlueScoreSource;
use crate::config::{ConfigError, MonitorConfig};
use crate::error::FailureKind;
use crate::hashrate::{network_hashrate, MaxHashrateRecord, MaxHashrateTracker, TrackerError};
use crate::health::{HealthEvaluator, HealthReport};
use crate::kv_store::{KeyValueStore, SledStore, StoreError};
use crate::market::{market_cap, MarketDataCache, MarketDataError, PriceCache};
use crate::metrics::MonitorMetrics;
use crate::mirror::{DatabaseBlueScoreReader, MirrorDatabase};
use crate::node_rpc::{NodePool, NodeRpc, RpcError};
use crate::price_feed::{CoinpaprikaFeed, FeedError, PriceFeed, PriceSnapshot};

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Market(#[from] MarketDataError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl MonitorError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Config(e) => e.kind(),
            Self::Rpc(e) => e.kind(),
            Self::Store(e) => e.kind(),
            Self::Feed(e) => e.kind(),
            Self::Market(e) => e.kind(),
            Self::Tracker(e) => e.kind(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MONITOR
// ════════════════════════════════════════════════════════════════════════════

/// Semua komponen monitor dalam satu handle.
pub struct Monitor {
    config: MonitorConfig,
    pool: NodePool,
    metrics: Arc<MonitorMetrics>,
    blue_score: Arc<BlueScoreSource>,
    health: HealthEvaluator,
    tracker: MaxHashrateTracker,
    market: Arc<MarketDataCache>,
    prices: PriceCache,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("nodes", &self.pool.len())
            .field("blue_score", &self.blue_score.current())
            .field("tasks", &self.tasks.lock().len())
            .finish()
    }
}

impl Monitor {
    /// Merakit monitor dari collaborator yang sudah dibuat.
    pub fn new(
        config: MonitorConfig,
        pool: NodePool,
        mirror: Arc<dyn MirrorDatabase>,
        store: Arc<dyn KeyValueStore>,
        feed: Arc<dyn PriceFeed>,
    ) -> Self {
        let metrics = Arc::new(MonitorMetrics::new());

        let blue_score =
            Arc::new(BlueScoreSource::new(pool.clone()).with_metrics(metrics.clone()));
        let reader = DatabaseBlueScoreReader::new(mirror.clone(), config.db_timeout());
        let health = HealthEvaluator::new(blue_score.clone(), reader, pool.clone())
            .with_metrics(metrics.clone());
        let tracker = MaxHashrateTracker::new(mirror, store, config.db_timeout())
            .with_metrics(metrics.clone());
        let market = Arc::new(
            MarketDataCache::new(feed)
                .with_ttl(config.market_ttl())
                .with_backoff(config.flood_backoff())
                .with_fetch_timeout(config.price_timeout())
                .with_metrics(metrics.clone()),
        );
        let prices = PriceCache::with_ttl(market.clone(), config.price_ttl());
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            pool,
            metrics,
            blue_score,
            health,
            tracker,
            market,
            prices,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Merakit monitor production: node pool dari `connect` (satu transport
    /// per `node_hosts`), sled store, coinpaprika feed.
    pub fn from_config<F>(
        config: MonitorConfig,
        connect: F,
        mirror: Arc<dyn MirrorDatabase>,
    ) -> Result<Self, MonitorError>
    where
        F: FnMut(&str) -> Result<Arc<dyn NodeRpc>, RpcError>,
    {
        config.validate()?;

        let pool = NodePool::connect(&config.node_hosts, config.rpc_timeout(), connect)?;
        let store = SledStore::open(&config.kv_store_path)?;
        let feed = CoinpaprikaFeed::new(config.price_feed_url.clone(), config.price_timeout())?;

        info!(
            nodes = pool.len(),
            kv_store = %config.kv_store_path,
            "monitor configured"
        );

        Ok(Self::new(config, pool, mirror, Arc::new(store), Arc::new(feed)))
    }

    /// Start background poller dan refresher. Idempotent; tidak bisa
    /// di-start ulang setelah `shutdown()`.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            warn!("monitor already started");
            return;
        }
        if *self.shutdown.borrow() {
            warn!("monitor already shut down");
            return;
        }

        tasks.push(
            self.blue_score
                .clone()
                .spawn_poller(self.config.blue_score_poll_interval(), self.shutdown.subscribe()),
        );
        tasks.push(
            self.market
                .clone()
                .spawn_refresher(self.config.market_refresh_interval(), self.shutdown.subscribe()),
        );
        info!(tasks = tasks.len(), "monitor background tasks started");
    }

    /// Hentikan semua background task dan tunggu sampai selesai.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("monitor stopped");
    }

    // ════════════════════════════════════════════════════════════════════════
    // OPERATIONS
    // ════════════════════════════════════════════════════════════════════════

    pub async fn health_report(&self) -> HealthReport {
        self.health.evaluate().await
    }

    /// Satu siklus tracker; hasilnya record terbaru.
    pub async fn max_hashrate(&self) -> Result<Option<MaxHashrateRecord>, MonitorError> {
        Ok(self.tracker.update().await?)
    }

    /// Hashrate jaringan saat ini (H/s).
    pub async fn network_hashrate(&self) -> Result<f64, MonitorError> {
        Ok(network_hashrate(&self.pool).await?)
    }

    pub async fn market_data(&self) -> Result<PriceSnapshot, MonitorError> {
        Ok(self.market.get().await?)
    }

    pub async fn price(&self) -> Result<f64, MonitorError> {
        Ok(self.prices.price().await?)
    }

    /// Market cap USD dari circulating supply node dan harga.
    pub async fn market_cap(&self) -> Result<u64, MonitorError> {
        let supply = self.pool.coin_supply().await?;
        let price = self.prices.price().await?;
        Ok(market_cap(supply.circulating_sompi, price))
    }

    pub fn blue_score(&self) -> &Arc<BlueScoreSource> {
        &self.blue_score
    }

    pub fn tracker(&self) -> &MaxHashrateTracker {
        &self.tracker
    }

    pub fn metrics(&self) -> &Arc<MonitorMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_store::MemoryStore;
    use crate::mock::{MockMirror, MockNode, MockPriceFeed};
    use std::time::Duration;

    fn monitor(node: Arc<MockNode>, feed: Arc<MockPriceFeed>) -> Monitor {
        let config = MonitorConfig {
            node_hosts: vec!["127.0.0.1:18110".to_string()],
            ..MonitorConfig::default()
        };
        let pool = NodePool::new(config.rpc_timeout()).with_node(node);
        Monitor::new(
            config,
            pool,
            Arc::new(MockMirror::new()),
            Arc::new(MemoryStore::new()),
            feed,
        )
    }

    #[test]
    fn test_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<Monitor>();
        assert_send_sync::<MonitorError>();
    }

    #[tokio::test]
    async fn test_market_cap_from_supply_and_price() {
        let node = Arc::new(MockNode::new());
        node.set_circulating_sompi(5_000_000_000_000_000);
        let m = monitor(node, Arc::new(MockPriceFeed::with_price(0.002)));
        // 50M coins × 0.002 USD
        assert_eq!(m.market_cap().await.expect("mcap"), 100_000);
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid_config() {
        let err = Monitor::from_config(
            MonitorConfig::default(),
            |_| Ok(Arc::new(MockNode::new()) as Arc<dyn NodeRpc>),
            Arc::new(MockMirror::new()),
        )
        .unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
        assert_eq!(err.kind(), FailureKind::Inconsistent);
    }

    #[tokio::test]
    async fn test_from_config_connects_each_host() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = MonitorConfig {
            node_hosts: vec!["10.0.0.1:18110".to_string(), "10.0.0.2:18110".to_string()],
            kv_store_path: dir.path().join("kv").to_string_lossy().into_owned(),
            ..MonitorConfig::default()
        };
        let node = Arc::new(MockNode::at_blue_score(123));

        let mut hosts = Vec::new();
        let m = Monitor::from_config(
            config,
            |host| {
                hosts.push(host.to_string());
                Ok(node.clone() as Arc<dyn NodeRpc>)
            },
            Arc::new(MockMirror::new()),
        )
        .expect("monitor");

        assert_eq!(hosts, vec!["10.0.0.1:18110", "10.0.0.2:18110"]);
        assert_eq!(m.blue_score().poll_once().await, Ok(123));
    }

    #[test]
    fn test_from_config_propagates_connect_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = MonitorConfig {
            node_hosts: vec!["10.0.0.1:18110".to_string()],
            kv_store_path: dir.path().join("kv").to_string_lossy().into_owned(),
            ..MonitorConfig::default()
        };
        let err = Monitor::from_config(
            config,
            |_| Err(RpcError::Transport("handshake failed".to_string())),
            Arc::new(MockMirror::new()),
        )
        .unwrap_err();
        assert!(matches!(err, MonitorError::Rpc(RpcError::Transport(_))));
        assert_eq!(err.kind(), FailureKind::Unreachable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown() {
        let node = Arc::new(MockNode::at_blue_score(77));
        let feed = Arc::new(MockPriceFeed::with_price(1.0));
        let m = monitor(node, feed.clone());

        m.start();
        m.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(m.blue_score().current(), Some(77));
        assert_eq!(feed.calls(), 1);

        m.shutdown().await;
        assert!(m.metrics().to_prometheus().contains("spectre_monitor_node_blue_score 77"));
    }
}
