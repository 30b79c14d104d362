//! # Mirror Database Access
//!
//! Mirror database adalah relational store yang mereplikasi block dari node
//! secara asinkron. Dari sudut pandang monitor, mirror bersifat READ-ONLY.
//!
//! ## Prinsip
//!
//! - Mirror selalu satu langkah di belakang node (by design dari replikasi)
//! - Kosong (`Empty`) dan tidak tersedia (`Unavailable`) adalah dua hal
//!   BERBEDA dan tidak boleh dicampur
//! - Tidak ada error yang keluar dari `DatabaseBlueScoreReader`
//!
//! ## Query yang dibutuhkan
//!
//! | Query                              | SQL ekuivalen                                         |
//! |------------------------------------|-------------------------------------------------------|
//! | `highest_blue_score`               | `SELECT max(blue_score) FROM blocks`                  |
//! | `highest_difficulty_block_above`   | `... WHERE blue_score > $1 ORDER BY difficulty DESC LIMIT 1` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::FailureKind;

// ════════════════════════════════════════════════════════════════════════════
// MIRROR BLOCK
// ════════════════════════════════════════════════════════════════════════════

/// Block header yang tersimpan di mirror database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorBlock {
    /// Block hash (hex).
    pub hash: String,
    /// Timestamp block (Unix milliseconds).
    pub timestamp: u64,
    /// Difficulty block.
    pub difficulty: f64,
    /// DAA score block.
    pub daa_score: u64,
    /// Blue score block.
    pub blue_score: u64,
}

// ════════════════════════════════════════════════════════════════════════════
// MIRROR ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Error dari mirror database.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MirrorError {
    /// Koneksi ke database gagal.
    #[error("mirror connection failed: {0}")]
    Connection(String),

    /// Query gagal dieksekusi.
    #[error("mirror query failed: {0}")]
    Query(String),

    /// Query melewati batas waktu.
    #[error("mirror query timed out after {0} ms")]
    Timeout(u64),
}

impl MirrorError {
    /// Semua error mirror berarti database tidak bisa dipakai saat ini.
    pub fn kind(&self) -> FailureKind {
        FailureKind::Unreachable
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MIRROR DATABASE TRAIT
// ════════════════════════════════════════════════════════════════════════════

/// Kontrak read-only ke mirror database.
///
/// Implementasi konkret (Postgres, dll) berada di luar crate ini.
/// Untuk testing tersedia [`crate::mock::MockMirror`].
#[async_trait]
pub trait MirrorDatabase: Send + Sync {
    /// Blue score tertinggi di mirror, `None` jika mirror kosong.
    async fn highest_blue_score(&self) -> Result<Option<u64>, MirrorError>;

    /// Block dengan difficulty tertinggi di antara block yang
    /// `blue_score > above`. `None` jika tidak ada block baru.
    async fn highest_difficulty_block_above(
        &self,
        above: u64,
    ) -> Result<Option<MirrorBlock>, MirrorError>;
}

// ════════════════════════════════════════════════════════════════════════════
// DB BLUE SCORE
// ════════════════════════════════════════════════════════════════════════════

/// Hasil pembacaan blue score dari mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbBlueScore {
    /// Blue score tertinggi yang sudah dimirror.
    Value(u64),
    /// Mirror terhubung tapi belum berisi block.
    Empty,
    /// Query gagal atau timeout; berisi alasan.
    Unavailable(String),
}

impl DbBlueScore {
    /// Nilai blue score jika tersedia.
    pub fn value(&self) -> Option<u64> {
        match self {
            Self::Value(v) => Some(*v),
            _ => None,
        }
    }

    /// Apakah database tidak bisa dihubungi.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// DATABASE BLUE SCORE READER
// ════════════════════════════════════════════════════════════════════════════

/// Membaca blue score tertinggi yang sudah tersimpan di mirror.
///
/// ## Guarantees
///
/// - **NO error keluar**: Semua kegagalan menjadi `DbBlueScore::Unavailable`
/// - **Bounded**: Setiap query dibungkus timeout
/// - **Read-only**: Tidak ada write ke database
pub struct DatabaseBlueScoreReader {
    db: Arc<dyn MirrorDatabase>,
    query_timeout: Duration,
}

impl std::fmt::Debug for DatabaseBlueScoreReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseBlueScoreReader")
            .field("db", &"<MirrorDatabase>")
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

impl DatabaseBlueScoreReader {
    /// Membuat reader baru.
    pub fn new(db: Arc<dyn MirrorDatabase>, query_timeout: Duration) -> Self {
        Self { db, query_timeout }
    }

    /// Blue score tertinggi di mirror.
    ///
    /// ## Returns
    ///
    /// - `Value(n)`: mirror berisi block, tertinggi `n`
    /// - `Empty`: mirror kosong
    /// - `Unavailable(reason)`: query gagal atau timeout
    pub async fn latest_db_blue_score(&self) -> DbBlueScore {
        match timeout(self.query_timeout, self.db.highest_blue_score()).await {
            Ok(Ok(Some(score))) => {
                debug!(db_blue_score = score, "mirror blue score read");
                DbBlueScore::Value(score)
            }
            Ok(Ok(None)) => {
                debug!("mirror has no blocks yet");
                DbBlueScore::Empty
            }
            Ok(Err(e)) => {
                warn!(error = %e, "mirror blue score query failed");
                DbBlueScore::Unavailable(e.to_string())
            }
            Err(_) => {
                let e = MirrorError::Timeout(self.query_timeout.as_millis() as u64);
                warn!(error = %e, "mirror blue score query timed out");
                DbBlueScore::Unavailable(e.to_string())
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
