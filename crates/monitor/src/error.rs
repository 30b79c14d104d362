//! # Failure Taxonomy
//!
//! Semua komponen monitor menyerap kegagalan transport mereka sendiri dan
//! mengubahnya menjadi salah satu `FailureKind` di bawah ini sebagai bagian
//! dari HASIL, bukan sebagai fault yang menggagalkan caller.
//!
//! | Kind          | Kapan                                                  |
//! |---------------|--------------------------------------------------------|
//! | Unreachable   | RPC / DB / HTTP tidak bisa dihubungi atau timeout      |
//! | RateLimited   | Upstream menolak karena kuota (HTTP 429)               |
//! | Inconsistent  | Blue score divergen melewati threshold, data korup     |
//! | Empty         | Belum ada data (mirror kosong, cache belum terisi)     |

use std::fmt;

use serde::Serialize;

/// Klasifikasi kegagalan yang dipakai di seluruh crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Sumber data tidak bisa dihubungi atau timeout.
    Unreachable,
    /// Upstream secara eksplisit menolak karena rate limit.
    RateLimited,
    /// Dua sumber data tidak konsisten (lag, record korup).
    Inconsistent,
    /// Belum ada data sama sekali.
    Empty,
}

impl FailureKind {
    /// Label stabil untuk logging dan metrics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::RateLimited => "rate_limited",
            Self::Inconsistent => "inconsistent",
            Self::Empty => "empty",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
