//! # Blue Score Source
//!
//! Process-wide view of the node's live blue score, refreshed by a
//! background poller and read lock-free by everyone else.
//!
//! ## Slot
//!
//! The value lives in an `ArcSwapOption<Observation>`. A successful poll
//! publishes a new immutable observation in one atomic store; readers load
//! whichever observation is current and never block the poller.
//!
//! ## Failure Behaviour
//!
//! A failed poll leaves the previous observation in place. Before the first
//! success the slot is empty and [`BlueScoreSource::current`] returns `None`,
//! never 0.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::metrics::MonitorMetrics;
use crate::node_rpc::{NodePool, RpcError};

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct Observation {
    blue_score: u64,
    observed_at: Instant,
}

/// Latest known node blue score.
pub struct BlueScoreSource {
    pool: NodePool,
    slot: ArcSwapOption<Observation>,
    metrics: Arc<MonitorMetrics>,
}

impl std::fmt::Debug for BlueScoreSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlueScoreSource")
            .field("nodes", &self.pool.len())
            .field("current", &self.current())
            .finish()
    }
}

impl BlueScoreSource {
    pub fn new(pool: NodePool) -> Self {
        Self {
            pool,
            slot: ArcSwapOption::empty(),
            metrics: Arc::new(MonitorMetrics::new()),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MonitorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Latest blue score, `None` until the first successful poll.
    pub fn current(&self) -> Option<u64> {
        self.slot.load_full().map(|o| o.blue_score)
    }

    /// When the current value was observed.
    pub fn observed_at(&self) -> Option<Instant> {
        self.slot.load_full().map(|o| o.observed_at)
    }

    /// Age of the current value.
    pub fn age(&self) -> Option<Duration> {
        self.observed_at().map(|t| t.elapsed())
    }

    /// One RPC round. On failure the previous value is kept.
    ///
    /// The error is returned for the caller's information only; the poller
    /// logs it and carries on.
    pub async fn poll_once(&self) -> Result<u64, RpcError> {
        match self.pool.sink_blue_score().await {
            Ok(blue_score) => {
                let previous = self.current();
                self.slot.store(Some(Arc::new(Observation {
                    blue_score,
                    observed_at: Instant::now(),
                })));
                self.metrics.blue_score_polls_ok.inc();
                self.metrics.node_blue_score.set(blue_score);
                if previous.is_none() {
                    info!(blue_score, "first node blue score observed");
                } else {
                    debug!(blue_score, "node blue score refreshed");
                }
                Ok(blue_score)
            }
            Err(e) => {
                self.metrics.blue_score_polls_failed.inc();
                warn!(error = %e, kept = ?self.current(), "blue score poll failed");
                Err(e)
            }
        }
    }

    /// Polls every `interval` until `shutdown` flips to `true`.
    pub fn spawn_poller(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis() as u64, "blue score poller started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _ = self.poll_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("blue score poller stopped");
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockNode;

    fn source(node: Arc<MockNode>) -> BlueScoreSource {
        BlueScoreSource::new(NodePool::new(Duration::from_secs(1)).with_node(node))
    }

    #[tokio::test]
    async fn test_unknown_before_first_poll() {
        let s = source(Arc::new(MockNode::at_blue_score(5)));
        assert_eq!(s.current(), None);
        assert_eq!(s.age(), None);
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_previous_value() {
        let node = Arc::new(MockNode::at_blue_score(100));
        let s = source(node.clone());

        assert_eq!(s.poll_once().await, Ok(100));
        node.set_failing(true);
        node.set_blue_score(200);
        assert!(s.poll_once().await.is_err());
        assert_eq!(s.current(), Some(100));
    }

    #[tokio::test]
    async fn test_failed_first_poll_stays_unknown() {
        let node = Arc::new(MockNode::new());
        node.set_failing(true);
        let s = source(node);
        assert!(s.poll_once().await.is_err());
        assert_eq!(s.current(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_refreshes_and_stops() {
        let node = Arc::new(MockNode::at_blue_score(1));
        let s = Arc::new(source(node.clone()));
        let (tx, rx) = watch::channel(false);

        let handle = s.clone().spawn_poller(Duration::from_secs(2), rx);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(s.current(), Some(1));

        node.set_blue_score(7);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(s.current(), Some(7));
        assert!(s.age().is_some());

        tx.send(true).expect("send shutdown");
        handle.await.expect("poller joins");
    }
}
