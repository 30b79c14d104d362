//! # Node RPC Client
//!
//! Trait-abstracted access to one or more redundant spectred nodes.
//!
//! ## Architecture
//!
//! ```text
//! BlueScoreSource ─┐
//! HealthEvaluator ─┼──▶ NodePool ──▶ [node-1, node-2, ...] : dyn NodeRpc
//! network_hashrate ┘
//! ```
//!
//! ## Transport
//!
//! spectred speaks gRPC (and wRPC over websockets). The wire client is an
//! external collaborator: the embedder implements [`NodeRpc`] on top of
//! its client of choice and hands one instance per configured host to
//! [`NodePool::connect`]. Response types derive `Deserialize` following the
//! protowire JSON mapping, where 64-bit integers are rendered as decimal
//! strings; both numbers and strings are accepted.
//!
//! ## No Implicit Retry
//!
//! Implementations perform exactly one attempt per call. `NodePool` may try
//! the next node on failure, but never the same node twice.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::FailureKind;

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Errors from a node RPC call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    /// Connection refused, DNS failure, TLS failure, protocol error.
    #[error("node transport error: {0}")]
    Transport(String),

    /// The call did not finish within the configured timeout.
    #[error("node call timed out after {0} ms")]
    Timeout(u64),

    /// The node answered, but the payload could not be decoded.
    #[error("malformed node response: {0}")]
    Decode(String),

    /// The node reported an error inside its response.
    #[error("node rejected request: {0}")]
    Node(String),

    /// The pool has no configured nodes.
    #[error("no node connections configured")]
    NoNodes,
}

impl RpcError {
    /// Failure classification.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Decode(_) => FailureKind::Inconsistent,
            _ => FailureKind::Unreachable,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// RESPONSE TYPES
// ════════════════════════════════════════════════════════════════════════════

/// Global DAG facts from `getBlockDagInfo`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagInfo {
    /// Network name, e.g. `spectre-mainnet`.
    #[serde(default)]
    pub network_name: String,
    /// Current virtual difficulty.
    pub difficulty: f64,
    /// Virtual DAA score.
    #[serde(default, deserialize_with = "de_u64")]
    pub virtual_daa_score: u64,
    /// Current DAG tips.
    #[serde(default)]
    pub tip_hashes: Vec<String>,
}

/// Per-node facts from `getInfo`.
///
/// `p2p_id` is the raw node identity. It must never be logged or exposed;
/// use [`crate::health::hash_p2p_id`] before it leaves the process.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Raw p2p identity token.
    pub p2p_id: String,
    /// Reported software version.
    pub server_version: String,
    /// Whether the node is synced with the network.
    pub is_synced: bool,
    /// Whether the node maintains a UTXO index.
    pub is_utxo_indexed: bool,
    /// Mempool size at the time of the call.
    #[serde(default, deserialize_with = "de_u64")]
    pub mempool_size: u64,
}

impl std::fmt::Debug for NodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeInfo")
            .field("p2p_id", &"<redacted>")
            .field("server_version", &self.server_version)
            .field("is_synced", &self.is_synced)
            .field("is_utxo_indexed", &self.is_utxo_indexed)
            .field("mempool_size", &self.mempool_size)
            .finish()
    }
}

/// Coin supply from `getCoinSupply`, in sompi.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinSupply {
    /// Circulating supply in sompi.
    #[serde(deserialize_with = "de_u64")]
    pub circulating_sompi: u64,
    /// Maximum supply in sompi.
    #[serde(default, deserialize_with = "de_u64")]
    pub max_sompi: u64,
}

/// Accepts a u64 given either as a JSON number or as a decimal string.
fn de_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TRANSPORT TRAIT
// ════════════════════════════════════════════════════════════════════════════

/// Async access to a single node.
///
/// ## Contract
///
/// - One attempt per call, no internal retry.
/// - Never panics.
/// - Timeouts are enforced by the caller ([`NodePool`]); implementations may
///   additionally enforce their own transport timeout.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Blue score of the node's current sink (virtual selected parent).
    async fn sink_blue_score(&self) -> Result<u64, RpcError>;

    /// Global DAG info, including the current difficulty.
    async fn block_dag_info(&self) -> Result<DagInfo, RpcError>;

    /// Version, sync and indexing facts plus the p2p identity.
    async fn info(&self) -> Result<NodeInfo, RpcError>;

    /// Circulating and maximum coin supply.
    async fn coin_supply(&self) -> Result<CoinSupply, RpcError>;
}

// ════════════════════════════════════════════════════════════════════════════
// NODE POOL
// ════════════════════════════════════════════════════════════════════════════

/// One configured node connection with its display label.
#[derive(Clone)]
pub struct NodeHandle {
    label: String,
    rpc: Arc<dyn NodeRpc>,
}

impl NodeHandle {
    /// Display label (`node-1`, `node-2`, ...). Never the node host.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Underlying transport.
    pub fn rpc(&self) -> &Arc<dyn NodeRpc> {
        &self.rpc
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("label", &self.label)
            .field("rpc", &"<NodeRpc>")
            .finish()
    }
}

/// Redundant node connections sharing one call timeout.
///
/// Each node is independently queryable via [`NodePool::call`]. Pool-wide
/// calls (`sink_blue_score`, `block_dag_info`, `coin_supply`) try nodes in
/// configuration order and return the first success.
#[derive(Debug, Clone)]
pub struct NodePool {
    nodes: Vec<NodeHandle>,
    call_timeout: Duration,
}

impl NodePool {
    /// Empty pool.
    pub fn new(call_timeout: Duration) -> Self {
        Self { nodes: Vec::new(), call_timeout }
    }

    /// Pool with one transport per host, opened by `connect` in order.
    ///
    /// The first connector error aborts construction. Hosts are only seen
    /// by the connector; the pool keeps positional labels.
    pub fn connect<I, S, F>(hosts: I, call_timeout: Duration, mut connect: F) -> Result<Self, RpcError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnMut(&str) -> Result<Arc<dyn NodeRpc>, RpcError>,
    {
        let mut pool = Self::new(call_timeout);
        for host in hosts {
            pool.push(connect(host.as_ref())?);
        }
        Ok(pool)
    }

    /// Builder-style [`NodePool::push`].
    #[must_use]
    pub fn with_node(mut self, rpc: Arc<dyn NodeRpc>) -> Self {
        self.push(rpc);
        self
    }

    /// Adds a node; its label is derived from its position.
    pub fn push(&mut self, rpc: Arc<dyn NodeRpc>) {
        let label = format!("node-{}", self.nodes.len() + 1);
        self.nodes.push(NodeHandle { label, rpc });
    }

    /// Configured nodes in order.
    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes
    }

    /// Number of configured nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node is configured.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Per-call timeout.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Runs `op` against a single node under the pool timeout.
    pub async fn call<T, F, Fut>(&self, node: &NodeHandle, op: F) -> Result<T, RpcError>
    where
        F: FnOnce(Arc<dyn NodeRpc>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        match timeout(self.call_timeout, op(node.rpc.clone())).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout(self.call_timeout.as_millis() as u64)),
        }
    }

    /// Tries nodes in order, returning the first success or the last error.
    async fn first_ok<T, F, Fut>(&self, method: &'static str, op: F) -> Result<T, RpcError>
    where
        F: Fn(Arc<dyn NodeRpc>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut last_err = RpcError::NoNodes;
        for node in &self.nodes {
            match self.call(node, &op).await {
                Ok(value) => {
                    debug!(node = %node.label, method, "node call succeeded");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(node = %node.label, method, error = %e, "node call failed, trying next");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Sink blue score from the first responsive node.
    pub async fn sink_blue_score(&self) -> Result<u64, RpcError> {
        self.first_ok("getSinkBlueScore", |rpc| async move { rpc.sink_blue_score().await })
            .await
    }

    /// DAG info from the first responsive node.
    pub async fn block_dag_info(&self) -> Result<DagInfo, RpcError> {
        self.first_ok("getBlockDagInfo", |rpc| async move { rpc.block_dag_info().await })
            .await
    }

    /// Coin supply from the first responsive node.
    pub async fn coin_supply(&self) -> Result<CoinSupply, RpcError> {
        self.first_ok("getCoinSupply", |rpc| async move { rpc.coin_supply().await })
            .await
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
