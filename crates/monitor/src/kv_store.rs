//! Durable key-value store used by the hashrate tracker.
//!
//! Keys and values are UTF-8 strings. The store owns the persisted state;
//! callers only read-modify-write through [`KeyValueStore`].
//!
//! sled is a synchronous engine, so [`SledStore`] runs every tree operation
//! on tokio's blocking pool and never on a runtime worker.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::error::FailureKind;

const TREE_NAME: &str = "spectre-monitor";

/// Errors from a key-value backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("kv store error: {0}")]
    Db(#[from] sled::Error),

    #[error("kv store unavailable: {0}")]
    Unavailable(String),

    #[error("kv store call timed out after {0} ms")]
    Timeout(u64),

    #[error("value under key {key} is not valid UTF-8")]
    Encoding { key: String },
}

impl StoreError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Encoding { .. } => FailureKind::Inconsistent,
            Self::Db(_) | Self::Unavailable(_) | Self::Timeout(_) => FailureKind::Unreachable,
        }
    }
}

/// String key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value under `key`, `None` if never set.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`. Durable once this returns `Ok`.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

// ════════════════════════════════════════════════════════════════════════════
// SLED
// ════════════════════════════════════════════════════════════════════════════

/// sled-backed store; every write is flushed before returning.
#[derive(Debug, Clone)]
pub struct SledStore {
    tree: sled::Tree,
}

impl SledStore {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self { tree })
    }
}

/// Runs a sled operation on the blocking pool.
async fn blocking<T, F>(op: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, sled::Error> + Send + 'static,
{
    match tokio::task::spawn_blocking(op).await {
        Ok(result) => Ok(result?),
        Err(e) => Err(StoreError::Unavailable(format!("blocking task failed: {}", e))),
    }
}

#[async_trait]
impl KeyValueStore for SledStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let tree = self.tree.clone();
        let k = key.to_string();
        let Some(v) = blocking(move || tree.get(k.as_bytes())).await? else {
            return Ok(None);
        };
        String::from_utf8(v.to_vec())
            .map(Some)
            .map_err(|_| StoreError::Encoding { key: key.to_string() })
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let tree = self.tree.clone();
        let (k, v) = (key.to_string(), value.to_string());
        blocking(move || {
            tree.insert(k.as_bytes(), v.as_bytes())?;
            tree.flush().map(|_| ())
        })
        .await
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MEMORY
// ════════════════════════════════════════════════════════════════════════════

/// Process-local store. Can be switched into a failing mode for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    failing: Mutex<bool>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every operation returns `StoreError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// Number of successful writes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if *self.failing.lock() {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.entries.lock().insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sled_store_survives_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("kv");

        {
            let store = SledStore::open(&path).expect("open");
            assert_eq!(store.get("maxhash_last_bluescore").await.expect("get"), None);
            store.set("maxhash_last_bluescore", "12345").await.expect("set");
        }

        let store = SledStore::open(&path).expect("reopen");
        assert_eq!(
            store.get("maxhash_last_bluescore").await.expect("get"),
            Some("12345".to_string())
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_sled_store_does_not_stall_single_worker() {
        let dir = TempDir::new().expect("tempdir");
        let store = std::sync::Arc::new(SledStore::open(dir.path().join("kv")).expect("open"));

        // other tasks on the only worker keep running while writes are in flight
        let ticker = tokio::spawn(async {
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            true
        });
        let writes: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.set(&format!("k{}", i), &i.to_string()).await })
            })
            .collect();

        for w in writes {
            w.await.expect("join").expect("set");
        }
        assert!(ticker.await.expect("join"));
        assert_eq!(store.get("k7").await.expect("get"), Some("7".to_string()));
    }

    #[test]
    fn test_store_error_kinds() {
        assert_eq!(StoreError::Timeout(5000).kind(), FailureKind::Unreachable);
        assert_eq!(
            StoreError::Encoding { key: "k".to_string() }.kind(),
            FailureKind::Inconsistent
        );
    }

    #[tokio::test]
    async fn test_memory_store_failing_mode() {
        let store = MemoryStore::new();
        store.set("k", "v").await.expect("set");
        store.set_failing(true);
        let err = store.get("k").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Unreachable);
        store.set_failing(false);
        assert_eq!(store.get("k").await.expect("get"), Some("v".to_string()));
        assert_eq!(store.writes(), 1);
    }
}
