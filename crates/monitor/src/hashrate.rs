//! # Hashrate
//!
//! Current network hashrate from the node, and the all-time maximum
//! hashrate tracked incrementally over the mirror database.
//!
//! ## Max Hashrate Tracker
//!
//! Each [`MaxHashrateTracker::update`] cycle:
//!
//! ```text
//! 1. cursor  ← kv[maxhash_last_bluescore]  (default 0)
//!    record  ← kv[maxhash_last_value]      (default none)
//! 2. block   ← mirror: highest difficulty with blue_score > cursor
//! 3. none    → return record, no writes
//! 4. if difficulty × 2 > record.hashrate → kv[maxhash_last_value] ← block
//! 5. kv[maxhash_last_bluescore] ← block.blue_score
//! ```
//!
//! The record is written before the cursor. A crash in between leaves the
//! cursor behind, so the next cycle rescans the same range and finds the
//! same block again; a record is never lost.
//!
//! ## Guarantees
//!
//! - **Monotonic**: stored hashrate never decreases
//! - **Idempotent**: repeated cycles without new mirror data write nothing
//! - **Serialized**: cycles run one at a time under a process-local mutex
//! - **Corruption-safe**: an unparsable record or cursor aborts the cycle
//!   before any write

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::FailureKind;
use crate::kv_store::{KeyValueStore, StoreError};
use crate::metrics::MonitorMetrics;
use crate::mirror::{MirrorBlock, MirrorDatabase, MirrorError};
use crate::node_rpc::{NodePool, RpcError};

/// Hashes per unit of difficulty.
pub const HASHRATE_PER_DIFFICULTY: f64 = 2.0;

/// KV key of the JSON-encoded record.
pub const RECORD_KEY: &str = "maxhash_last_value";

/// KV key of the decimal blue score cursor.
pub const CURSOR_KEY: &str = "maxhash_last_bluescore";

const HASHES_PER_TERAHASH: f64 = 1e12;

/// H/s to TH/s.
pub fn to_terahash(hashrate: f64) -> f64 {
    hashrate / HASHES_PER_TERAHASH
}

/// TH/s with one decimal, e.g. `7741.4`.
pub fn format_hashrate_th(hashrate: f64) -> String {
    format!("{:.1}", to_terahash(hashrate))
}

/// Current network hashrate in H/s from the node's virtual difficulty.
pub async fn network_hashrate(pool: &NodePool) -> Result<f64, RpcError> {
    let dag = pool.block_dag_info().await?;
    Ok(dag.difficulty * HASHRATE_PER_DIFFICULTY)
}

// ════════════════════════════════════════════════════════════════════════════
// RECORD
// ════════════════════════════════════════════════════════════════════════════

/// Header of the block that set the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBlock {
    pub hash: String,
    /// Unix milliseconds.
    pub timestamp: u64,
    pub difficulty: f64,
    pub daa_score: u64,
    pub blue_score: u64,
}

impl From<MirrorBlock> for SourceBlock {
    fn from(b: MirrorBlock) -> Self {
        Self {
            hash: b.hash,
            timestamp: b.timestamp,
            difficulty: b.difficulty,
            daa_score: b.daa_score,
            blue_score: b.blue_score,
        }
    }
}

/// All-time maximum hashrate and the block it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxHashrateRecord {
    /// H/s.
    pub hashrate: f64,
    #[serde(rename = "blockheader")]
    pub block: SourceBlock,
}

impl MaxHashrateRecord {
    pub fn from_block(block: MirrorBlock) -> Self {
        Self {
            hashrate: block.difficulty * HASHRATE_PER_DIFFICULTY,
            block: block.into(),
        }
    }

    /// Record hashrate in TH/s.
    pub fn hashrate_th(&self) -> f64 {
        to_terahash(self.hashrate)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error("persisted max hashrate record is corrupt: {0}")]
    CorruptRecord(String),

    #[error("persisted blue score cursor is corrupt: {0:?}")]
    CorruptCursor(String),
}

impl TrackerError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::Mirror(e) => e.kind(),
            Self::CorruptRecord(_) | Self::CorruptCursor(_) => FailureKind::Inconsistent,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TRACKER
// ════════════════════════════════════════════════════════════════════════════

/// Incremental all-time-high tracker.
///
/// Assumes it is the only writer of [`RECORD_KEY`] / [`CURSOR_KEY`]. Two
/// processes sharing one store need an external lock.
pub struct MaxHashrateTracker {
    mirror: Arc<dyn MirrorDatabase>,
    store: Arc<dyn KeyValueStore>,
    query_timeout: Duration,
    lock: Mutex<()>,
    metrics: Arc<MonitorMetrics>,
}

impl std::fmt::Debug for MaxHashrateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaxHashrateTracker")
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

impl MaxHashrateTracker {
    pub fn new(
        mirror: Arc<dyn MirrorDatabase>,
        store: Arc<dyn KeyValueStore>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            mirror,
            store,
            query_timeout,
            lock: Mutex::new(()),
            metrics: Arc::new(MonitorMetrics::new()),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MonitorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Persisted record without scanning.
    pub async fn current(&self) -> Result<Option<MaxHashrateRecord>, TrackerError> {
        self.read_record().await
    }

    /// Runs one scan cycle and returns the (possibly new) record.
    pub async fn update(&self) -> Result<Option<MaxHashrateRecord>, TrackerError> {
        let _guard = self.lock.lock().await;

        let cursor = self.read_cursor().await?;
        let record = self.read_record().await?;
        debug!(cursor, record_hashrate = ?record.as_ref().map(|r| r.hashrate), "max hashrate scan");

        let candidate = match timeout(
            self.query_timeout,
            self.mirror.highest_difficulty_block_above(cursor),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(MirrorError::Timeout(self.query_timeout.as_millis() as u64).into()),
        };

        let Some(block) = candidate else {
            debug!(cursor, "no new mirror blocks since cursor");
            self.metrics.hashrate_scans.inc();
            return Ok(record);
        };

        let next_cursor = block.blue_score;
        let candidate = MaxHashrateRecord::from_block(block);

        let current = match record {
            Some(existing) if candidate.hashrate <= existing.hashrate => Some(existing),
            previous => {
                let encoded = serde_json::to_string(&candidate)
                    .map_err(|e| TrackerError::CorruptRecord(e.to_string()))?;
                self.store_set(RECORD_KEY, &encoded).await?;
                self.metrics.hashrate_records.inc();
                info!(
                    hashrate_th = candidate.hashrate_th(),
                    previous_th = ?previous.as_ref().map(MaxHashrateRecord::hashrate_th),
                    blue_score = candidate.block.blue_score,
                    "new max hashrate record"
                );
                Some(candidate)
            }
        };

        self.store_set(CURSOR_KEY, &next_cursor.to_string()).await?;
        self.metrics.hashrate_scans.inc();
        debug!(cursor = next_cursor, "max hashrate cursor advanced");

        Ok(current)
    }

    async fn read_cursor(&self) -> Result<u64, TrackerError> {
        match self.store_get(CURSOR_KEY).await? {
            None => Ok(0),
            Some(raw) => raw.trim().parse().map_err(|_| TrackerError::CorruptCursor(raw)),
        }
    }

    async fn read_record(&self) -> Result<Option<MaxHashrateRecord>, TrackerError> {
        match self.store_get(RECORD_KEY).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| TrackerError::CorruptRecord(e.to_string())),
        }
    }

    // Store calls run under the tracker lock; a hung backend must not keep it.
    async fn store_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        timeout(self.query_timeout, self.store.get(key))
            .await
            .unwrap_or_else(|_| Err(StoreError::Timeout(self.query_timeout.as_millis() as u64)))
    }

    async fn store_set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        timeout(self.query_timeout, self.store.set(key, value))
            .await
            .unwrap_or_else(|_| Err(StoreError::Timeout(self.query_timeout.as_millis() as u64)))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
