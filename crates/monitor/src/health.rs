//! # Health Evaluation
//!
//! Menggabungkan blue score node, blue score mirror, dan status setiap node
//! menjadi satu `HealthReport` dengan verdict tunggal.
//!
//! ## Policy (satu-satunya)
//!
//! | Kondisi                                                   | Verdict      |
//! |-----------------------------------------------------------|--------------|
//! | DB sub-status `healthy` DAN ≥1 node `synced`              | Healthy      |
//! | Query DB gagal DAN tidak ada node yang reachable          | Unavailable  |
//! | Selain itu                                                | Degraded     |
//!
//! ## Database sub-status
//!
//! | Kondisi                                   | Sub-status   |
//! |-------------------------------------------|--------------|
//! | Query DB gagal / timeout                  | unavailable  |
//! | Blue score node atau DB tidak diketahui   | unsynced     |
//! | `diff < LAG_THRESHOLD`                    | healthy      |
//! | `diff >= LAG_THRESHOLD`                   | lagging      |
//!
//! ## Guarantees
//!
//! - **NO error keluar**: `evaluate()` selalu menghasilkan report
//! - **Read-only**: Tidak ada side effect selain metrics dan log
//! - **Concurrent**: Semua node di-query paralel, masing-masing dengan timeout
//! - **Never cached**: Setiap panggilan membuat report baru
//! - **Privacy**: p2p id node hanya keluar dalam bentuk SHA-256 hex

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::blue_score::BlueScoreSource;
use crate::error::FailureKind;
use crate::metrics::MonitorMetrics;
use crate::mirror::{DatabaseBlueScoreReader, DbBlueScore};
use crate::node_rpc::{NodeHandle, NodePool};

/// Selisih blue score (node vs mirror) mulai dari mana mirror dianggap lagging.
pub const LAG_THRESHOLD: u64 = 1000;

/// SHA-256 hex digest dari p2p id node.
pub fn hash_p2p_id(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

// ════════════════════════════════════════════════════════════════════════════
// NODE STATUS
// ════════════════════════════════════════════════════════════════════════════

/// Reachability satu node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Reachable,
    Unreachable,
}

/// Status satu node pada satu health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    /// `node-1`, `node-2`, ... sesuai urutan konfigurasi.
    pub label: String,
    pub state: NodeState,
    pub server_version: Option<String>,
    /// Selalu `false` untuk node unreachable.
    pub is_synced: bool,
    pub is_utxo_indexed: bool,
    /// SHA-256 hex dari p2p id. Raw id tidak pernah disimpan di sini.
    pub p2p_id_hash: Option<String>,
    /// Pesan error jika unreachable.
    pub error: Option<String>,
}

impl NodeStatus {
    pub fn is_reachable(&self) -> bool {
        self.state == NodeState::Reachable
    }
}

// ════════════════════════════════════════════════════════════════════════════
// DATABASE CHECK
// ════════════════════════════════════════════════════════════════════════════

/// Sub-status mirror database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseStatus {
    Healthy,
    Lagging,
    Unsynced,
    Unavailable,
}

/// Perbandingan blue score node dengan mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseCheck {
    pub node_blue_score: Option<u64>,
    pub db_blue_score: Option<u64>,
    /// `|node - db|`, hanya jika keduanya diketahui.
    pub blue_score_diff: Option<u64>,
    pub status: DatabaseStatus,
    pub reason: String,
    /// Mirror menjawab tanpa block sama sekali.
    pub mirror_empty: bool,
}

impl DatabaseCheck {
    /// Klasifikasi murni dari dua observasi.
    pub fn classify(node: Option<u64>, db: &DbBlueScore) -> Self {
        let (db_blue_score, status, reason) = match (node, db) {
            (_, DbBlueScore::Unavailable(why)) => {
                (None, DatabaseStatus::Unavailable, format!("database query failed: {}", why))
            }
            (None, DbBlueScore::Value(v)) => (
                Some(*v),
                DatabaseStatus::Unsynced,
                "node blue score unknown".to_string(),
            ),
            (_, DbBlueScore::Empty) => {
                (None, DatabaseStatus::Unsynced, "mirror database has no blocks".to_string())
            }
            (Some(n), DbBlueScore::Value(v)) => {
                let diff = n.abs_diff(*v);
                let (status, reason) = if diff < LAG_THRESHOLD {
                    (DatabaseStatus::Healthy, format!("mirror within {} blue scores of node", diff))
                } else {
                    (
                        DatabaseStatus::Lagging,
                        format!("mirror lags node by {} blue scores (threshold {})", diff, LAG_THRESHOLD),
                    )
                };
                return Self {
                    node_blue_score: Some(n),
                    db_blue_score: Some(*v),
                    blue_score_diff: Some(diff),
                    status,
                    reason,
                    mirror_empty: false,
                };
            }
        };

        Self {
            node_blue_score: node,
            db_blue_score,
            blue_score_diff: None,
            status,
            reason,
            mirror_empty: matches!(db, DbBlueScore::Empty),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// VERDICT & REPORT
// ════════════════════════════════════════════════════════════════════════════

/// Verdict keseluruhan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Healthy,
    Degraded,
    Unavailable,
}

impl Verdict {
    /// Verdict dari sub-status DB dan status node.
    pub fn decide(database: &DatabaseCheck, nodes: &[NodeStatus]) -> (Self, String) {
        let any_synced = nodes.iter().any(|n| n.is_synced);
        let any_reachable = nodes.iter().any(NodeStatus::is_reachable);

        if database.status == DatabaseStatus::Healthy && any_synced {
            return (Self::Healthy, "database in sync and at least one node synced".to_string());
        }

        if database.status == DatabaseStatus::Unavailable && !any_reachable {
            return (Self::Unavailable, "database and all nodes unreachable".to_string());
        }

        let reason = if database.status != DatabaseStatus::Healthy {
            database.reason.clone()
        } else if nodes.is_empty() {
            "no nodes configured".to_string()
        } else if !any_reachable {
            "no node reachable".to_string()
        } else {
            "no node reports synced".to_string()
        };
        (Self::Degraded, reason)
    }
}

/// Hasil satu health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub nodes: Vec<NodeStatus>,
    pub database: DatabaseCheck,
    pub verdict: Verdict,
    pub reason: String,
}

impl HealthReport {
    /// Status code yang harus dipakai layer HTTP: 200 hanya jika healthy.
    pub fn status_code(&self) -> u16 {
        match self.verdict {
            Verdict::Healthy => 200,
            Verdict::Degraded | Verdict::Unavailable => 503,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.verdict == Verdict::Healthy
    }

    /// Klasifikasi penyebab utama, `None` jika healthy.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        if self.is_healthy() {
            return None;
        }
        let kind = match self.database.status {
            DatabaseStatus::Unavailable => FailureKind::Unreachable,
            DatabaseStatus::Lagging => FailureKind::Inconsistent,
            DatabaseStatus::Unsynced if self.database.mirror_empty => FailureKind::Empty,
            DatabaseStatus::Unsynced => FailureKind::Unreachable,
            DatabaseStatus::Healthy if !self.nodes.iter().any(NodeStatus::is_reachable) => {
                FailureKind::Unreachable
            }
            DatabaseStatus::Healthy => FailureKind::Inconsistent,
        };
        Some(kind)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// HEALTH EVALUATOR
// ════════════════════════════════════════════════════════════════════════════

/// Menghasilkan `HealthReport` on demand.
pub struct HealthEvaluator {
    blue_score: Arc<BlueScoreSource>,
    reader: DatabaseBlueScoreReader,
    pool: NodePool,
    metrics: Arc<MonitorMetrics>,
}

impl std::fmt::Debug for HealthEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthEvaluator")
            .field("nodes", &self.pool.len())
            .field("reader", &self.reader)
            .finish()
    }
}

impl HealthEvaluator {
    pub fn new(
        blue_score: Arc<BlueScoreSource>,
        reader: DatabaseBlueScoreReader,
        pool: NodePool,
    ) -> Self {
        Self {
            blue_score,
            reader,
            pool,
            metrics: Arc::new(MonitorMetrics::new()),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MonitorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Satu health check lengkap.
    pub async fn evaluate(&self) -> HealthReport {
        let node_blue_score = self.blue_score.current();

        let (db, nodes) = tokio::join!(self.reader.latest_db_blue_score(), self.node_statuses());

        let database = DatabaseCheck::classify(node_blue_score, &db);
        let (verdict, reason) = Verdict::decide(&database, &nodes);

        self.metrics.record_verdict(verdict);
        if let Some(diff) = database.blue_score_diff {
            self.metrics.db_lag.set(diff);
        }

        match verdict {
            Verdict::Healthy => {
                debug!(diff = ?database.blue_score_diff, nodes = nodes.len(), "health check healthy")
            }
            _ => warn!(
                verdict = ?verdict,
                db_status = ?database.status,
                diff = ?database.blue_score_diff,
                reason = %reason,
                "health check not healthy"
            ),
        }

        HealthReport { nodes, database, verdict, reason }
    }

    async fn node_statuses(&self) -> Vec<NodeStatus> {
        join_all(self.pool.nodes().iter().map(|node| self.node_status(node))).await
    }

    async fn node_status(&self, node: &NodeHandle) -> NodeStatus {
        match self.pool.call(node, |rpc| async move { rpc.info().await }).await {
            Ok(info) => NodeStatus {
                label: node.label().to_string(),
                state: NodeState::Reachable,
                server_version: Some(info.server_version),
                is_synced: info.is_synced,
                is_utxo_indexed: info.is_utxo_indexed,
                p2p_id_hash: Some(hash_p2p_id(&info.p2p_id)),
                error: None,
            },
            Err(e) => {
                warn!(node = %node.label(), error = %e, "node unreachable during health check");
                NodeStatus {
                    label: node.label().to_string(),
                    state: NodeState::Unreachable,
                    server_version: None,
                    is_synced: false,
                    is_utxo_indexed: false,
                    p2p_id_hash: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn node(synced: bool, reachable: bool) -> NodeStatus {
        NodeStatus {
            label: "node-1".to_string(),
            state: if reachable { NodeState::Reachable } else { NodeState::Unreachable },
            server_version: None,
            is_synced: synced && reachable,
            is_utxo_indexed: true,
            p2p_id_hash: None,
            error: None,
        }
    }

    #[test]
    fn test_hash_p2p_id_is_sha256_hex() {
        assert_eq!(
            hash_p2p_id("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_lag_threshold_boundary() {
        let at = DatabaseCheck::classify(Some(101_000), &DbBlueScore::Value(100_000));
        assert_eq!(at.blue_score_diff, Some(1000));
        assert_eq!(at.status, DatabaseStatus::Lagging);

        let below = DatabaseCheck::classify(Some(100_999), &DbBlueScore::Value(100_000));
        assert_eq!(below.blue_score_diff, Some(999));
        assert_eq!(below.status, DatabaseStatus::Healthy);
    }

    #[test]
    fn test_db_ahead_of_node_uses_absolute_diff() {
        let c = DatabaseCheck::classify(Some(100_000), &DbBlueScore::Value(100_400));
        assert_eq!(c.blue_score_diff, Some(400));
        assert_eq!(c.status, DatabaseStatus::Healthy);
    }

    #[test]
    fn test_unknown_node_score_is_unsynced_without_diff() {
        let c = DatabaseCheck::classify(None, &DbBlueScore::Value(5));
        assert_eq!(c.status, DatabaseStatus::Unsynced);
        assert_eq!(c.blue_score_diff, None);
        assert_eq!(c.db_blue_score, Some(5));
    }

    #[test]
    fn test_verdict_requires_synced_node() {
        let db = DatabaseCheck::classify(Some(10), &DbBlueScore::Value(10));
        let (v, _) = Verdict::decide(&db, &[node(false, true)]);
        assert_eq!(v, Verdict::Degraded);
        let (v, _) = Verdict::decide(&db, &[node(false, true), node(true, true)]);
        assert_eq!(v, Verdict::Healthy);
    }

    #[test]
    fn test_verdict_unavailable_only_when_everything_down() {
        let db = DatabaseCheck::classify(Some(10), &DbBlueScore::Unavailable("down".into()));
        let (v, _) = Verdict::decide(&db, &[node(false, false)]);
        assert_eq!(v, Verdict::Unavailable);
        let (v, _) = Verdict::decide(&db, &[node(false, true)]);
        assert_eq!(v, Verdict::Degraded);
        let (v, _) = Verdict::decide(&db, &[]);
        assert_eq!(v, Verdict::Unavailable);
    }

    #[test]
    fn test_status_code_and_failure_kind() {
        let db = DatabaseCheck::classify(Some(100_500), &DbBlueScore::Value(99_000));
        let (verdict, reason) = Verdict::decide(&db, &[node(true, true)]);
        let report = HealthReport { nodes: vec![node(true, true)], database: db, verdict, reason };
        assert_eq!(report.status_code(), 503);
        assert_eq!(report.failure_kind(), Some(FailureKind::Inconsistent));

        let db = DatabaseCheck::classify(Some(100_500), &DbBlueScore::Empty);
        let (verdict, reason) = Verdict::decide(&db, &[node(true, true)]);
        let report = HealthReport { nodes: vec![node(true, true)], database: db, verdict, reason };
        assert_eq!(report.failure_kind(), Some(FailureKind::Empty));
    }

    #[test]
    fn test_empty_mirror_is_empty_even_without_node_score() {
        let db = DatabaseCheck::classify(None, &DbBlueScore::Empty);
        assert!(db.mirror_empty);
        let (verdict, reason) = Verdict::decide(&db, &[node(false, false)]);
        let report = HealthReport { nodes: vec![node(false, false)], database: db, verdict, reason };
        assert_eq!(report.failure_kind(), Some(FailureKind::Empty));

        let db = DatabaseCheck::classify(None, &DbBlueScore::Value(500));
        assert!(!db.mirror_empty);
        let (verdict, reason) = Verdict::decide(&db, &[node(false, false)]);
        let report = HealthReport { nodes: vec![node(false, false)], database: db, verdict, reason };
        assert_eq!(report.failure_kind(), Some(FailureKind::Unreachable));
    }

    #[test]
    fn test_report_serializes_snake_case_verdict() {
        let db = DatabaseCheck::classify(Some(1), &DbBlueScore::Value(1));
        let report = HealthReport {
            nodes: vec![],
            database: db,
            verdict: Verdict::Healthy,
            reason: String::new(),
        };
        let v = serde_json::to_value(&report).expect("serialize");
        assert_eq!(v["verdict"], "healthy");
        assert_eq!(v["database"]["blueScoreDiff"], 0);
        assert_eq!(v["database"]["status"], "healthy");
    }
}
