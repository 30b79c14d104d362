//! # Monitor Configuration
//!
//! Konfigurasi bisa berasal dari:
//!
//! 1. File TOML via [`load_from_file`]
//! 2. Environment variables via [`MonitorConfig::from_env`]
//!    (opsional didahului [`load_env_file`])
//! 3. [`MonitorConfig::default`]
//!
//! Field yang tidak disebut di TOML / env memakai nilai default.
//!
//! ## Environment Variables
//!
//! | Variable                            | Field                 |
//! |-------------------------------------|-----------------------|
//! | `SPECTRED_HOST_1`, `SPECTRED_HOST_2`, ... | `node_hosts`    |
//! | `SPECTRE_RPC_TIMEOUT_MS`            | `rpc_timeout_ms`      |
//! | `SPECTRE_DB_TIMEOUT_MS`             | `db_timeout_ms`       |
//! | `SPECTRE_PRICE_TIMEOUT_MS`          | `price_timeout_ms`    |
//! | `SPECTRE_BLUE_SCORE_POLL_MS`        | `blue_score_poll_ms`  |
//! | `SPECTRE_MARKET_TTL_SECS`           | `market_ttl_secs`     |
//! | `SPECTRE_PRICE_TTL_SECS`            | `price_ttl_secs`      |
//! | `SPECTRE_FLOOD_BACKOFF_SECS`        | `flood_backoff_secs`  |
//! | `SPECTRE_MARKET_REFRESH_SECS`       | `market_refresh_secs` |
//! | `SPECTRE_PRICE_FEED_URL`            | `price_feed_url`      |
//! | `SPECTRE_KV_STORE_PATH`             | `kv_store_path`       |
//!
//! Host disimpan apa adanya (`127.0.0.1:18110`); protokol koneksi ditentukan
//! oleh connector yang diberikan ke [`crate::Monitor::from_config`].

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::blue_score::DEFAULT_POLL_INTERVAL;
use crate::error::FailureKind;
use crate::market::{DEFAULT_FLOOD_BACKOFF, DEFAULT_MARKET_TTL, DEFAULT_PRICE_TTL};
use crate::price_feed::DEFAULT_TICKER_URL;

/// Batas atas jumlah `SPECTRED_HOST_n` yang dipindai.
const MAX_NODE_HOSTS: usize = 64;

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Io(_) => FailureKind::Unreachable,
            Self::Parse(_) | Self::InvalidValue { .. } | Self::Invalid(_) => FailureKind::Inconsistent,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CONFIG
// ════════════════════════════════════════════════════════════════════════════

/// Semua parameter runtime monitor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Alamat node spectred, urutan menentukan label `node-1`, `node-2`, ...
    pub node_hosts: Vec<String>,
    /// Timeout per node RPC call.
    pub rpc_timeout_ms: u64,
    /// Timeout per query mirror database.
    pub db_timeout_ms: u64,
    /// Timeout request ke price feed.
    pub price_timeout_ms: u64,
    /// Interval poll blue score node.
    pub blue_score_poll_ms: u64,
    /// TTL market data.
    pub market_ttl_secs: u64,
    /// TTL view harga.
    pub price_ttl_secs: u64,
    /// Cooldown setelah HTTP 429 dari price feed.
    pub flood_backoff_secs: u64,
    /// Interval background refresh market data.
    pub market_refresh_secs: u64,
    /// Ticker URL.
    pub price_feed_url: String,
    /// Lokasi sled database untuk max hashrate tracker.
    pub kv_store_path: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            node_hosts: Vec::new(),
            rpc_timeout_ms: 5_000,
            db_timeout_ms: 5_000,
            price_timeout_ms: 10_000,
            blue_score_poll_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            market_ttl_secs: DEFAULT_MARKET_TTL.as_secs(),
            price_ttl_secs: DEFAULT_PRICE_TTL.as_secs(),
            flood_backoff_secs: DEFAULT_FLOOD_BACKOFF.as_secs(),
            market_refresh_secs: DEFAULT_MARKET_TTL.as_secs(),
            price_feed_url: DEFAULT_TICKER_URL.to_string(),
            kv_store_path: "./data/monitor-kv".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Load dari environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load dari sumber key-value arbitrer (dipakai oleh `from_env`).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        let mut hosts = Vec::new();
        for i in 1..=MAX_NODE_HOSTS {
            match lookup(&format!("SPECTRED_HOST_{}", i)) {
                Some(host) if !host.trim().is_empty() => hosts.push(host.trim().to_string()),
                _ => break,
            }
        }
        cfg.node_hosts = hosts;

        parse_into(&lookup, "SPECTRE_RPC_TIMEOUT_MS", &mut cfg.rpc_timeout_ms)?;
        parse_into(&lookup, "SPECTRE_DB_TIMEOUT_MS", &mut cfg.db_timeout_ms)?;
        parse_into(&lookup, "SPECTRE_PRICE_TIMEOUT_MS", &mut cfg.price_timeout_ms)?;
        parse_into(&lookup, "SPECTRE_BLUE_SCORE_POLL_MS", &mut cfg.blue_score_poll_ms)?;
        parse_into(&lookup, "SPECTRE_MARKET_TTL_SECS", &mut cfg.market_ttl_secs)?;
        parse_into(&lookup, "SPECTRE_PRICE_TTL_SECS", &mut cfg.price_ttl_secs)?;
        parse_into(&lookup, "SPECTRE_FLOOD_BACKOFF_SECS", &mut cfg.flood_backoff_secs)?;
        parse_into(&lookup, "SPECTRE_MARKET_REFRESH_SECS", &mut cfg.market_refresh_secs)?;

        if let Some(url) = lookup("SPECTRE_PRICE_FEED_URL") {
            cfg.price_feed_url = url;
        }
        if let Some(path) = lookup("SPECTRE_KV_STORE_PATH") {
            cfg.kv_store_path = path;
        }

        debug!(nodes = cfg.node_hosts.len(), "monitor config loaded from environment");
        Ok(cfg)
    }

    /// Validasi konfigurasi sebelum dipakai.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_hosts.is_empty() {
            return Err(ConfigError::Invalid("at least one node host is required".to_string()));
        }
        if let Some(host) = self.node_hosts.iter().find(|h| h.trim().is_empty()) {
            return Err(ConfigError::InvalidValue { key: "node_hosts".to_string(), value: host.clone() });
        }

        for (key, value) in [
            ("rpc_timeout_ms", self.rpc_timeout_ms),
            ("db_timeout_ms", self.db_timeout_ms),
            ("price_timeout_ms", self.price_timeout_ms),
            ("blue_score_poll_ms", self.blue_score_poll_ms),
            ("market_ttl_secs", self.market_ttl_secs),
            ("price_ttl_secs", self.price_ttl_secs),
            ("market_refresh_secs", self.market_refresh_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} cannot be 0", key)));
            }
        }

        if self.price_feed_url.is_empty() {
            return Err(ConfigError::Invalid("price_feed_url cannot be empty".to_string()));
        }
        if self.kv_store_path.is_empty() {
            return Err(ConfigError::Invalid("kv_store_path cannot be empty".to_string()));
        }

        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn db_timeout(&self) -> Duration {
        Duration::from_millis(self.db_timeout_ms)
    }

    pub fn price_timeout(&self) -> Duration {
        Duration::from_millis(self.price_timeout_ms)
    }

    pub fn blue_score_poll_interval(&self) -> Duration {
        Duration::from_millis(self.blue_score_poll_ms)
    }

    pub fn market_ttl(&self) -> Duration {
        Duration::from_secs(self.market_ttl_secs)
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_ttl_secs)
    }

    pub fn flood_backoff(&self) -> Duration {
        Duration::from_secs(self.flood_backoff_secs)
    }

    pub fn market_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.market_refresh_secs)
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value: raw.clone() })?;
    }
    Ok(())
}

/// Load config dari file TOML.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<MonitorConfig, ConfigError> {
    let s = fs::read_to_string(path.as_ref())?;
    let cfg: MonitorConfig = toml::from_str(&s)?;
    Ok(cfg)
}

// ════════════════════════════════════════════════════════════════════════════
// ENV FILE LOADING
// ════════════════════════════════════════════════════════════════════════════

/// Load env file ke process environment.
///
/// Prioritas: `SPECTRE_ENV_FILE` > `.env`. File yang tidak ada bukan error;
/// environment yang sudah ada tidak ditimpa.
pub fn load_env_file() -> Option<PathBuf> {
    let env_file = env::var("SPECTRE_ENV_FILE").unwrap_or_else(|_| ".env".to_string());

    match dotenvy::from_filename(&env_file) {
        Ok(path) => {
            debug!(path = %path.display(), "env file loaded");
            Some(path)
        }
        Err(e) => {
            if !matches!(e, dotenvy::Error::Io(_)) {
                warn!(file = %env_file, error = %e, "failed to load env file");
            }
            None
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_matches_documented_windows() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.market_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.price_ttl(), Duration::from_secs(120));
        assert_eq!(cfg.flood_backoff(), Duration::from_secs(300));
        assert_eq!(cfg.price_feed_url, DEFAULT_TICKER_URL);
    }

    #[test]
    fn test_from_lookup_collects_hosts_in_order() {
        let cfg = MonitorConfig::from_lookup(lookup(&[
            ("SPECTRED_HOST_1", " 10.0.0.1:18110 "),
            ("SPECTRED_HOST_2", "node-b.example:18110"),
            ("SPECTRED_HOST_4", "ignored-after-gap:1"),
            ("SPECTRE_RPC_TIMEOUT_MS", "2500"),
        ]))
        .expect("config");

        assert_eq!(cfg.node_hosts, vec!["10.0.0.1:18110", "node-b.example:18110"]);
        assert_eq!(cfg.rpc_timeout(), Duration::from_millis(2500));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_rejects_bad_number() {
        let err = MonitorConfig::from_lookup(lookup(&[("SPECTRE_MARKET_TTL_SECS", "five")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SPECTRE_MARKET_TTL_SECS"));
    }

    #[test]
    fn test_validate_requires_nodes_and_nonzero_windows() {
        assert!(MonitorConfig::default().validate().is_err());

        let cfg = MonitorConfig {
            node_hosts: vec!["n1:18110".to_string()],
            market_ttl_secs: 0,
            ..MonitorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_file_partial_toml() {
        use std::io::Write;
        let tmp = tempfile::NamedTempFile::new().expect("temp file");
        let toml = r#"
            node_hosts = ["127.0.0.1:18110", "127.0.0.1:18111"]
            db_timeout_ms = 750
            kv_store_path = "/var/lib/spectre/monitor"
        "#;
        let mut f = tmp.reopen().expect("reopen");
        write!(f, "{}", toml).expect("write");

        let cfg = load_from_file(tmp.path()).expect("load");
        assert_eq!(cfg.node_hosts.len(), 2);
        assert_eq!(cfg.db_timeout(), Duration::from_millis(750));
        assert_eq!(cfg.kv_store_path, "/var/lib/spectre/monitor");
        assert_eq!(cfg.market_ttl_secs, 300);
    }

    #[test]
    fn test_load_from_missing_file_is_io_error() {
        let err = load_from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
