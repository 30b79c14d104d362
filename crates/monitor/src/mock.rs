//! In-memory collaborators for testing.
//!
//! Semua mock di sini deterministik, tidak melakukan network call, dan
//! menghitung jumlah pemanggilan supaya test bisa memverifikasi bahwa
//! cache atau failover benar-benar menghindari upstream.
//!
//! | Mock             | Menggantikan        |
//! |------------------|---------------------|
//! | `MockNode`       | `dyn NodeRpc`       |
//! | `MockMirror`     | `dyn MirrorDatabase`|
//! | `MockPriceFeed`  | `dyn PriceFeed`     |
//!
//! Latency disimulasikan dengan `tokio::time::sleep`, sehingga test dengan
//! `start_paused = true` tetap instan.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::mirror::{MirrorBlock, MirrorDatabase, MirrorError};
use crate::node_rpc::{CoinSupply, DagInfo, NodeInfo, NodeRpc, RpcError};
use crate::price_feed::{FeedError, PriceFeed, PriceSnapshot};

// ════════════════════════════════════════════════════════════════════════════
// MOCK NODE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct NodeState {
    blue_score: u64,
    difficulty: f64,
    info: NodeInfo,
    supply: CoinSupply,
    failing: bool,
    delay: Duration,
}

/// Scriptable node.
///
/// Default: synced, utxo-indexed, blue score 0, difficulty 0.
#[derive(Debug)]
pub struct MockNode {
    state: Mutex<NodeState>,
    calls: AtomicUsize,
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNode {
    /// Healthy synced node.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NodeState {
                blue_score: 0,
                difficulty: 0.0,
                info: NodeInfo {
                    p2p_id: "mock-peer".to_string(),
                    server_version: "0.3.14".to_string(),
                    is_synced: true,
                    is_utxo_indexed: true,
                    mempool_size: 0,
                },
                supply: CoinSupply { circulating_sompi: 0, max_sompi: 0 },
                failing: false,
                delay: Duration::ZERO,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    /// Synced node at `blue_score`.
    pub fn at_blue_score(blue_score: u64) -> Self {
        let node = Self::new();
        node.set_blue_score(blue_score);
        node
    }

    pub fn set_blue_score(&self, blue_score: u64) {
        self.state.lock().blue_score = blue_score;
    }

    pub fn set_difficulty(&self, difficulty: f64) {
        self.state.lock().difficulty = difficulty;
    }

    pub fn set_synced(&self, synced: bool) {
        self.state.lock().info.is_synced = synced;
    }

    pub fn set_p2p_id(&self, p2p_id: impl Into<String>) {
        self.state.lock().info.p2p_id = p2p_id.into();
    }

    pub fn set_server_version(&self, version: impl Into<String>) {
        self.state.lock().info.server_version = version.into();
    }

    pub fn set_circulating_sompi(&self, sompi: u64) {
        self.state.lock().supply.circulating_sompi = sompi;
    }

    /// Every call fails with a transport error while set.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Every call sleeps for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    /// Number of RPC calls received, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<NodeState, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.lock().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().clone();
        if state.failing {
            return Err(RpcError::Transport("connection refused".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl NodeRpc for MockNode {
    async fn sink_blue_score(&self) -> Result<u64, RpcError> {
        Ok(self.enter().await?.blue_score)
    }

    async fn block_dag_info(&self) -> Result<DagInfo, RpcError> {
        let state = self.enter().await?;
        Ok(DagInfo {
            network_name: "spectre-mainnet".to_string(),
            difficulty: state.difficulty,
            virtual_daa_score: state.blue_score,
            tip_hashes: Vec::new(),
        })
    }

    async fn info(&self) -> Result<NodeInfo, RpcError> {
        Ok(self.enter().await?.info)
    }

    async fn coin_supply(&self) -> Result<CoinSupply, RpcError> {
        Ok(self.enter().await?.supply)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MOCK MIRROR
// ════════════════════════════════════════════════════════════════════════════

/// In-memory mirror database.
#[derive(Debug, Default)]
pub struct MockMirror {
    blocks: Mutex<Vec<MirrorBlock>>,
    failing: Mutex<bool>,
    delay: Mutex<Duration>,
    queries: AtomicUsize,
}

impl MockMirror {
    /// Empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a block; timestamp and DAA score are derived from `blue_score`.
    pub fn insert_block(&self, hash: &str, difficulty: f64, blue_score: u64) {
        self.push_block(MirrorBlock {
            hash: hash.to_string(),
            timestamp: 1_700_000_000_000 + blue_score * 1_000,
            difficulty,
            daa_score: blue_score,
            blue_score,
        });
    }

    pub fn push_block(&self, block: MirrorBlock) {
        self.blocks.lock().push(block);
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Number of queries received.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), MirrorError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.failing.lock() {
            return Err(MirrorError::Connection("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MirrorDatabase for MockMirror {
    async fn highest_blue_score(&self) -> Result<Option<u64>, MirrorError> {
        self.enter().await?;
        Ok(self.blocks.lock().iter().map(|b| b.blue_score).max())
    }

    async fn highest_difficulty_block_above(
        &self,
        above: u64,
    ) -> Result<Option<MirrorBlock>, MirrorError> {
        self.enter().await?;
        Ok(self
            .blocks
            .lock()
            .iter()
            .filter(|b| b.blue_score > above)
            .max_by(|a, b| a.difficulty.total_cmp(&b.difficulty))
            .cloned())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MOCK PRICE FEED
// ════════════════════════════════════════════════════════════════════════════

/// Scriptable price feed.
///
/// Queued responses are consumed first; afterwards the sticky response set
/// by [`MockPriceFeed::set_response`] is returned for every call.
#[derive(Debug)]
pub struct MockPriceFeed {
    queue: Mutex<VecDeque<Result<PriceSnapshot, FeedError>>>,
    sticky: Mutex<Result<PriceSnapshot, FeedError>>,
    calls: AtomicUsize,
}

impl MockPriceFeed {
    /// Feed that always answers with `price`.
    pub fn with_price(price: f64) -> Self {
        Self::with_response(Ok(PriceSnapshot::with_price(price)))
    }

    /// Feed that always answers with `response`.
    pub fn with_response(response: Result<PriceSnapshot, FeedError>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            sticky: Mutex::new(response),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_response(&self, response: Result<PriceSnapshot, FeedError>) {
        *self.sticky.lock() = response;
    }

    pub fn set_price(&self, price: f64) {
        self.set_response(Ok(PriceSnapshot::with_price(price)));
    }

    /// Queues a one-shot response.
    pub fn push_response(&self, response: Result<PriceSnapshot, FeedError>) {
        self.queue.lock().push_back(response);
    }

    /// Number of upstream calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceFeed for MockPriceFeed {
    async fn fetch(&self) -> Result<PriceSnapshot, FeedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.queue.lock().pop_front() {
            return next;
        }
        self.sticky.lock().clone()
    }
}
