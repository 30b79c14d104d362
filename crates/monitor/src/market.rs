//! # Market Data Cache
//!
//! TTL cache over the external [`PriceFeed`] with rate-limit backoff.
//!
//! ## State Machine
//!
//! ```text
//!              age < ttl
//!   ┌────────────────────────────┐
//!   │            Fresh           │ ── serve cached, no network
//!   └────────────────────────────┘
//!              age ≥ ttl
//!   ┌────────────────────────────┐
//!   │ Backoff (flood < backoff)  │ ── serve stale, no network
//!   ├────────────────────────────┤
//!   │ Expired                    │ ── one upstream call
//!   └────────────────────────────┘
//!        │ 200   → replace snapshot, clear flood flag
//!        │ 429   → flood flag = now, serve stale
//!        │ other → keep snapshot, serve stale
//! ```
//!
//! The state is computed by [`CacheState::at`], a pure function of the slot
//! timestamps and an `Instant`.
//!
//! ## Concurrency
//!
//! The slot is an `ArcSwap<CacheSlot>`; readers of a fresh slot only load
//! it. Refreshes take an async mutex and re-check the state after acquiring
//! it, so concurrent callers on an expired slot cause one upstream call.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::FailureKind;
use crate::metrics::MonitorMetrics;
use crate::price_feed::{FeedError, PriceFeed, PriceSnapshot};

/// Market data freshness window.
pub const DEFAULT_MARKET_TTL: Duration = Duration::from_secs(300);

/// Cooldown after the upstream answered 429.
pub const DEFAULT_FLOOD_BACKOFF: Duration = Duration::from_secs(300);

/// Freshness window of the price-only view.
pub const DEFAULT_PRICE_TTL: Duration = Duration::from_secs(120);

/// Sompi per whole coin.
pub const SOMPI_PER_COIN: f64 = 1e8;

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Returned only while nothing has ever been cached.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarketDataError {
    #[error("market data rate limited and nothing cached")]
    RateLimited,

    #[error("market data unavailable and nothing cached: {0}")]
    Unreachable(String),
}

impl MarketDataError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::RateLimited => FailureKind::RateLimited,
            Self::Unreachable(_) => FailureKind::Unreachable,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// STATE
// ════════════════════════════════════════════════════════════════════════════

/// Cache state at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Fresh,
    Expired,
    Backoff,
}

impl CacheState {
    /// Pure state computation.
    pub fn at(
        fetched_at: Option<Instant>,
        flood_since: Option<Instant>,
        now: Instant,
        ttl: Duration,
        backoff: Duration,
    ) -> Self {
        if fetched_at.is_some_and(|t| now.saturating_duration_since(t) < ttl) {
            return Self::Fresh;
        }
        if flood_since.is_some_and(|t| now.saturating_duration_since(t) < backoff) {
            return Self::Backoff;
        }
        Self::Expired
    }
}

#[derive(Debug, Default)]
struct CacheSlot {
    snapshot: Option<Arc<PriceSnapshot>>,
    fetched_at: Option<Instant>,
    flood_since: Option<Instant>,
}

// ════════════════════════════════════════════════════════════════════════════
// MARKET DATA CACHE
// ════════════════════════════════════════════════════════════════════════════

/// Process-wide market data slot.
pub struct MarketDataCache {
    feed: Arc<dyn PriceFeed>,
    slot: ArcSwap<CacheSlot>,
    refresh: Mutex<()>,
    ttl: Duration,
    backoff: Duration,
    fetch_timeout: Duration,
    metrics: Arc<MonitorMetrics>,
}

impl std::fmt::Debug for MarketDataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataCache")
            .field("ttl", &self.ttl)
            .field("backoff", &self.backoff)
            .field("state", &self.state_at(Instant::now()))
            .finish()
    }
}

impl MarketDataCache {
    /// Cache with default TTL and backoff (300s each) and a 10s fetch timeout.
    pub fn new(feed: Arc<dyn PriceFeed>) -> Self {
        Self {
            feed,
            slot: ArcSwap::from_pointee(CacheSlot::default()),
            refresh: Mutex::new(()),
            ttl: DEFAULT_MARKET_TTL,
            backoff: DEFAULT_FLOOD_BACKOFF,
            fetch_timeout: Duration::from_secs(10),
            metrics: Arc::new(MonitorMetrics::new()),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MonitorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// State of the slot at `now`.
    pub fn state_at(&self, now: Instant) -> CacheState {
        let slot = self.slot.load();
        CacheState::at(slot.fetched_at, slot.flood_since, now, self.ttl, self.backoff)
    }

    /// Cached snapshot regardless of age, without any network call.
    pub fn peek(&self) -> Option<Arc<PriceSnapshot>> {
        self.slot.load().snapshot.clone()
    }

    /// Current market data, refreshing from upstream when expired.
    pub async fn get(&self) -> Result<PriceSnapshot, MarketDataError> {
        {
            let slot = self.slot.load();
            let state =
                CacheState::at(slot.fetched_at, slot.flood_since, Instant::now(), self.ttl, self.backoff);
            if let (CacheState::Fresh, Some(snap)) = (state, &slot.snapshot) {
                return Ok(PriceSnapshot::clone(snap));
            }
        }

        let _guard = self.refresh.lock().await;

        let slot = self.slot.load_full();
        match CacheState::at(slot.fetched_at, slot.flood_since, Instant::now(), self.ttl, self.backoff) {
            CacheState::Fresh => {
                if let Some(snap) = &slot.snapshot {
                    return Ok(PriceSnapshot::clone(snap));
                }
                self.fetch(&slot).await
            }
            CacheState::Backoff => {
                debug!("price feed in rate-limit backoff, skipping upstream");
                self.serve_stale(&slot, MarketDataError::RateLimited)
            }
            CacheState::Expired => self.fetch(&slot).await,
        }
    }

    async fn fetch(&self, slot: &CacheSlot) -> Result<PriceSnapshot, MarketDataError> {
        self.metrics.price_upstream_calls.inc();
        let result = match timeout(self.fetch_timeout, self.feed.fetch()).await {
            Ok(r) => r,
            Err(_) => Err(FeedError::Timeout(self.fetch_timeout.as_millis() as u64)),
        };

        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.slot.store(Arc::new(CacheSlot {
                    snapshot: Some(snapshot.clone()),
                    fetched_at: Some(Instant::now()),
                    flood_since: None,
                }));
                info!(price = snapshot.price, "market data refreshed");
                Ok(PriceSnapshot::clone(&snapshot))
            }
            Err(FeedError::RateLimited) => {
                self.metrics.price_rate_limited.inc();
                self.slot.store(Arc::new(CacheSlot {
                    snapshot: slot.snapshot.clone(),
                    fetched_at: slot.fetched_at,
                    flood_since: Some(Instant::now()),
                }));
                warn!(
                    backoff_secs = self.backoff.as_secs(),
                    cached = slot.snapshot.is_some(),
                    "price feed rate limit exceeded"
                );
                self.serve_stale(slot, MarketDataError::RateLimited)
            }
            Err(e) => {
                error!(error = %e, "did not retrieve market data");
                self.serve_stale(slot, MarketDataError::Unreachable(e.to_string()))
            }
        }
    }

    fn serve_stale(
        &self,
        slot: &CacheSlot,
        empty: MarketDataError,
    ) -> Result<PriceSnapshot, MarketDataError> {
        match &slot.snapshot {
            Some(snap) => {
                self.metrics.price_stale_serves.inc();
                warn!("using cached market data");
                Ok(PriceSnapshot::clone(snap))
            }
            None => Err(empty),
        }
    }

    /// Calls [`MarketDataCache::get`] every `interval` until shutdown.
    pub fn spawn_refresher(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "market data refresher started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.get().await {
                            debug!(error = %e, "market data refresh produced nothing");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("market data refresher stopped");
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PRICE CACHE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
struct PriceEntry {
    price: f64,
    at: Instant,
}

/// Price-only view with its own shorter TTL.
#[derive(Debug)]
pub struct PriceCache {
    market: Arc<MarketDataCache>,
    slot: ArcSwapOption<PriceEntry>,
    ttl: Duration,
}

impl PriceCache {
    pub fn new(market: Arc<MarketDataCache>) -> Self {
        Self::with_ttl(market, DEFAULT_PRICE_TTL)
    }

    pub fn with_ttl(market: Arc<MarketDataCache>, ttl: Duration) -> Self {
        Self { market, slot: ArcSwapOption::empty(), ttl }
    }

    /// USD price.
    pub async fn price(&self) -> Result<f64, MarketDataError> {
        if let Some(entry) = self.slot.load_full() {
            if entry.at.elapsed() < self.ttl {
                return Ok(entry.price);
            }
        }

        let price = self.market.get().await?.price;
        self.slot.store(Some(Arc::new(PriceEntry { price, at: Instant::now() })));
        Ok(price)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MARKET CAP
// ════════════════════════════════════════════════════════════════════════════

/// Market cap in USD, rounded to a whole dollar.
pub fn market_cap(circulating_sompi: u64, price: f64) -> u64 {
    (circulating_sompi as f64 / SOMPI_PER_COIN * price).round() as u64
}

/// `12.3M` below one billion, `1.2B` from one billion on.
pub fn format_market_cap(mcap: u64) -> String {
    if mcap < 1_000_000_000 {
        format!("{:.1}M", mcap as f64 / 1e6)
    } else {
        format!("{:.1}B", mcap as f64 / 1e9)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPriceFeed;

    const TTL: Duration = DEFAULT_MARKET_TTL;
    const BACKOFF: Duration = DEFAULT_FLOOD_BACKOFF;

    #[test]
    fn test_cache_state_transitions() {
        let t0 = Instant::now();
        let s = |fetched, flood, now| CacheState::at(fetched, flood, now, TTL, BACKOFF);

        assert_eq!(s(None, None, t0), CacheState::Expired);
        assert_eq!(s(Some(t0), None, t0 + Duration::from_secs(299)), CacheState::Fresh);
        assert_eq!(s(Some(t0), None, t0 + Duration::from_secs(300)), CacheState::Expired);

        let flood = t0 + Duration::from_secs(310);
        assert_eq!(s(Some(t0), Some(flood), flood + Duration::from_secs(299)), CacheState::Backoff);
        assert_eq!(s(Some(t0), Some(flood), flood + Duration::from_secs(300)), CacheState::Expired);
        assert_eq!(s(None, Some(t0), t0), CacheState::Backoff);
    }

    #[test]
    fn test_market_cap_and_format() {
        // 2.5e9 sompi = 25 coins
        assert_eq!(market_cap(2_500_000_000, 2.0), 50);
        assert_eq!(format_market_cap(12_345_678), "12.3M");
        assert_eq!(format_market_cap(999_999_999), "1000.0M");
        assert_eq!(format_market_cap(1_250_000_000), "1.2B");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_hits_do_not_call_upstream() {
        let feed = Arc::new(MockPriceFeed::with_price(0.5));
        let cache = MarketDataCache::new(feed.clone());

        for _ in 0..10 {
            assert_eq!(cache.get().await.map(|s| s.price), Ok(0.5));
        }
        assert_eq!(feed.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_cached_errors_by_kind() {
        let feed = Arc::new(MockPriceFeed::with_response(Err(FeedError::Status(500))));
        let cache = MarketDataCache::new(feed.clone());
        let err = cache.get().await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Unreachable);

        feed.set_response(Err(FeedError::RateLimited));
        let err = cache.get().await.unwrap_err();
        assert_eq!(err, MarketDataError::RateLimited);

        // inside backoff now: no upstream call
        assert_eq!(cache.get().await, Err(MarketDataError::RateLimited));
        assert_eq!(feed.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_rate_limit_failure_keeps_snapshot_without_backoff() {
        let feed = Arc::new(MockPriceFeed::with_price(1.0));
        let cache = MarketDataCache::new(feed.clone());
        cache.get().await.expect("prime");

        feed.set_response(Err(FeedError::Timeout(10_000)));
        tokio::time::advance(TTL).await;
        assert_eq!(cache.get().await.map(|s| s.price), Ok(1.0));
        assert_eq!(cache.state_at(Instant::now()), CacheState::Expired);
        assert_eq!(cache.get().await.map(|s| s.price), Ok(1.0));
        assert_eq!(feed.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_is_enforced() {
        struct Hang;

        #[async_trait::async_trait]
        impl PriceFeed for Hang {
            async fn fetch(&self) -> Result<PriceSnapshot, FeedError> {
                std::future::pending().await
            }
        }

        let cache = MarketDataCache::new(Arc::new(Hang)).with_fetch_timeout(Duration::from_secs(10));
        let err = cache.get().await.unwrap_err();
        assert!(matches!(err, MarketDataError::Unreachable(ref m) if m.contains("timed out")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_price_cache_has_its_own_ttl() {
        let feed = Arc::new(MockPriceFeed::with_price(1.0));
        let market = Arc::new(MarketDataCache::new(feed.clone()));
        let prices = PriceCache::new(market);

        assert_eq!(prices.price().await, Ok(1.0));
        feed.set_price(2.0);
        tokio::time::advance(Duration::from_secs(119)).await;
        assert_eq!(prices.price().await, Ok(1.0));

        // price TTL over, market TTL not: served from market cache
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(prices.price().await, Ok(1.0));
        assert_eq!(feed.calls(), 1);

        tokio::time::advance(TTL).await;
        assert_eq!(prices.price().await, Ok(2.0));
        assert_eq!(feed.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_stops_on_shutdown() {
        let feed = Arc::new(MockPriceFeed::with_price(1.0));
        let cache = Arc::new(MarketDataCache::new(feed.clone()));
        let (tx, rx) = watch::channel(false);

        let handle = cache.clone().spawn_refresher(TTL, rx);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.peek().is_some());

        tx.send(true).expect("send shutdown");
        handle.await.expect("refresher joins");
        assert_eq!(feed.calls(), 1);
    }
}
