//! # Integration Tests: Market Data Cache
//!
//! Semua test memakai paused tokio time, sehingga TTL dan backoff 300 detik
//! diverifikasi tanpa benar-benar menunggu.
//!
//! ## Skenario
//!
//! 1. Steady success: satu upstream call per TTL window
//! 2. HTTP 429 dengan cache: stale dilayani, nol call selama backoff,
//!    tepat satu request ulang setelahnya
//! 3. Refresh konkuren pada slot expired: satu upstream call

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spectre_monitor::{
    CacheState, FeedError, MarketDataCache, MockPriceFeed, MonitorMetrics, PriceFeed,
    PriceSnapshot,
};
use tokio::time::{advance, Instant};

const TTL: Duration = Duration::from_secs(300);
const BACKOFF: Duration = Duration::from_secs(300);

fn cache(feed: Arc<dyn PriceFeed>, metrics: Arc<MonitorMetrics>) -> MarketDataCache {
    MarketDataCache::new(feed).with_ttl(TTL).with_backoff(BACKOFF).with_metrics(metrics)
}

// ════════════════════════════════════════════════════════════════════════════
// STEADY SUCCESS
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_one_upstream_call_per_ttl_window() {
    let feed = Arc::new(MockPriceFeed::with_price(0.01));
    let metrics = Arc::new(MonitorMetrics::new());
    let c = cache(feed.clone(), metrics.clone());

    // 20 requests spread over 10 minutes, one every 30s
    for _ in 0..20 {
        c.get().await.expect("market data");
        advance(Duration::from_secs(30)).await;
    }

    assert_eq!(feed.calls(), 2);
    assert_eq!(metrics.price_upstream_calls.get(), 2);
    assert_eq!(metrics.price_stale_serves.get(), 0);
}

// ════════════════════════════════════════════════════════════════════════════
// RATE LIMITING
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_rate_limit_serves_stale_and_backs_off() {
    let feed = Arc::new(MockPriceFeed::with_price(0.02));
    let metrics = Arc::new(MonitorMetrics::new());
    let c = cache(feed.clone(), metrics.clone());

    let primed = c.get().await.expect("prime");
    assert_eq!(feed.calls(), 1);

    // TTL passes, upstream now answers 429
    advance(TTL).await;
    feed.set_response(Err(FeedError::RateLimited));
    assert_eq!(c.get().await, Ok(primed.clone()));
    assert_eq!(feed.calls(), 2);
    assert_eq!(c.state_at(Instant::now()), CacheState::Backoff);

    // whole backoff window: zero upstream calls
    for _ in 0..29 {
        advance(Duration::from_secs(10)).await;
        assert_eq!(c.get().await, Ok(primed.clone()));
    }
    assert_eq!(feed.calls(), 2);

    // window over: exactly one upstream retry
    advance(Duration::from_secs(10)).await;
    assert_eq!(c.state_at(Instant::now()), CacheState::Expired);
    feed.set_price(0.03);
    assert_eq!(c.get().await.map(|s| s.price), Ok(0.03));
    assert_eq!(feed.calls(), 3);
    assert_eq!(c.state_at(Instant::now()), CacheState::Fresh);

    assert_eq!(metrics.price_rate_limited.get(), 1);
    assert_eq!(metrics.price_stale_serves.get(), 30);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_again_after_retry_restarts_backoff() {
    let feed = Arc::new(MockPriceFeed::with_price(0.02));
    let c = cache(feed.clone(), Arc::new(MonitorMetrics::new()));
    c.get().await.expect("prime");

    feed.set_response(Err(FeedError::RateLimited));
    advance(TTL).await;
    c.get().await.expect("stale");
    advance(BACKOFF).await;
    c.get().await.expect("stale after retry");
    assert_eq!(feed.calls(), 3);

    advance(Duration::from_secs(60)).await;
    c.get().await.expect("stale in second backoff");
    assert_eq!(feed.calls(), 3);
}

// ════════════════════════════════════════════════════════════════════════════
// CONCURRENCY
// ════════════════════════════════════════════════════════════════════════════

struct SlowFeed {
    calls: AtomicUsize,
}

#[async_trait]
impl PriceFeed for SlowFeed {
    async fn fetch(&self) -> Result<PriceSnapshot, FeedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(PriceSnapshot::with_price(4.2))
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_expired_reads_make_one_upstream_call() {
    let feed = Arc::new(SlowFeed { calls: AtomicUsize::new(0) });
    let c = Arc::new(cache(feed.clone(), Arc::new(MonitorMetrics::new())));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let c = c.clone();
            tokio::spawn(async move { c.get().await })
        })
        .collect();

    for h in handles {
        assert_eq!(h.await.expect("join").map(|s| s.price), Ok(4.2));
    }
    assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
}
