//! # Spectre Monitor
//!
//! Node/database consistency and liveness monitor for the Spectre REST
//! gateway.
//!
//! ## Modules
//! - `node_rpc`: NodeRpc trait, labelled node pool with failover
//! - `mirror`: Read-only mirror database contract and blue score reader
//! - `blue_score`: Background-refreshed node blue score
//! - `health`: Health policy and report
//! - `hashrate`: Network hashrate and incremental max hashrate tracker
//! - `kv_store`: Durable key-value store (sled / in-memory)
//! - `price_feed`: External ticker client
//! - `market`: Market data TTL cache with rate-limit backoff
//! - `metrics`: Prometheus text metrics
//! - `config`: TOML / env configuration
//! - `service`: `Monitor` wiring and lifecycle
//! - `mock`: In-memory collaborators for tests
//!
//! ## Pipelines
//! ```text
//! NodePool ──▶ BlueScoreSource ─┐
//!                               ├──▶ HealthEvaluator ──▶ HealthReport
//! Mirror ──▶ BlueScoreReader ───┘
//!
//! Mirror + KeyValueStore ──▶ MaxHashrateTracker ──▶ MaxHashrateRecord
//!
//! PriceFeed ──▶ MarketDataCache ──▶ PriceSnapshot
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let config = MonitorConfig::from_env()?;
//! let monitor = Monitor::from_config(config, mirror)?;
//! monitor.start();
//! let report = monitor.health_report().await;
//! let status = report.status_code();
//! ```

pub mod blue_score;
pub mod config;
pub mod error;
pub mod hashrate;
pub mod health;
pub mod kv_store;
pub mod market;
pub mod metrics;
pub mod mirror;
pub mod mock;
pub mod node_rpc;
pub mod price_feed;
pub mod service;

pub use blue_score::BlueScoreSource;
pub use config::{load_env_file, load_from_file, ConfigError, MonitorConfig};
pub use error::FailureKind;
pub use hashrate::{
    format_hashrate_th, network_hashrate, MaxHashrateRecord, MaxHashrateTracker, SourceBlock,
    TrackerError, HASHRATE_PER_DIFFICULTY,
};
pub use health::{
    hash_p2p_id, DatabaseCheck, DatabaseStatus, HealthEvaluator, HealthReport, NodeState,
    NodeStatus, Verdict, LAG_THRESHOLD,
};
pub use kv_store::{KeyValueStore, MemoryStore, SledStore, StoreError};
pub use market::{
    format_market_cap, market_cap, CacheState, MarketDataCache, MarketDataError, PriceCache,
};
pub use metrics::MonitorMetrics;
pub use mirror::{DatabaseBlueScoreReader, DbBlueScore, MirrorBlock, MirrorDatabase, MirrorError};
pub use mock::{MockMirror, MockNode, MockPriceFeed};
pub use node_rpc::{CoinSupply, DagInfo, NodeInfo, NodePool, NodeRpc, RpcError};
pub use price_feed::{CoinpaprikaFeed, FeedError, PriceFeed, PriceSnapshot};
pub use service::{Monitor, MonitorError};
