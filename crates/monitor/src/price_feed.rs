//! # External Price Feed
//!
//! Client for the third-party ticker API that supplies the USD quote.
//!
//! The feed performs exactly one HTTP GET per [`PriceFeed::fetch`] call and
//! classifies the outcome. Caching and rate-limit backoff live one layer up
//! in [`crate::market::MarketDataCache`].
//!
//! | HTTP outcome        | Result                        |
//! |---------------------|-------------------------------|
//! | 200 + valid body    | `Ok(PriceSnapshot)`           |
//! | 429                 | `Err(FeedError::RateLimited)` |
//! | other status        | `Err(FeedError::Status)`      |
//! | timeout             | `Err(FeedError::Timeout)`     |
//! | connect failure     | `Err(FeedError::Transport)`   |
//! | malformed body      | `Err(FeedError::Decode)`      |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::FailureKind;

/// Default ticker endpoint.
pub const DEFAULT_TICKER_URL: &str = "https://api.coinpaprika.com/v1/tickers/spr-spectre-network";

// ════════════════════════════════════════════════════════════════════════════
// PRICE SNAPSHOT
// ════════════════════════════════════════════════════════════════════════════

/// USD quote object as returned by the ticker under `quotes.USD`.
///
/// Fields the monitor does not interpret are kept verbatim in `extra` so the
/// snapshot can be handed upward unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Price in USD.
    pub price: f64,
    /// 24h traded volume in USD.
    #[serde(default)]
    pub volume_24h: f64,
    /// Market cap in USD as computed by the ticker.
    #[serde(default)]
    pub market_cap: f64,
    /// Price change over 24h, percent.
    #[serde(default)]
    pub percent_change_24h: f64,
    /// Remaining quote fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PriceSnapshot {
    /// Snapshot carrying only a price.
    pub fn with_price(price: f64) -> Self {
        Self {
            price,
            volume_24h: 0.0,
            market_cap: 0.0,
            percent_change_24h: 0.0,
            extra: serde_json::Map::new(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Failure of a single ticker request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// Upstream answered HTTP 429.
    #[error("price feed rate limited")]
    RateLimited,

    /// Upstream answered with an unexpected status.
    #[error("price feed returned HTTP status {0}")]
    Status(u16),

    /// Request did not complete in time.
    #[error("price feed timed out after {0} ms")]
    Timeout(u64),

    /// Connection-level failure.
    #[error("price feed transport error: {0}")]
    Transport(String),

    /// Body was not a ticker with a USD quote.
    #[error("malformed price feed response: {0}")]
    Decode(String),
}

impl FeedError {
    /// Failure classification.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::RateLimited => FailureKind::RateLimited,
            Self::Decode(_) => FailureKind::Inconsistent,
            Self::Status(_) | Self::Timeout(_) | Self::Transport(_) => FailureKind::Unreachable,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// FEED TRAIT
// ════════════════════════════════════════════════════════════════════════════

/// Source of USD quotes.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// One upstream request. No retry.
    async fn fetch(&self) -> Result<PriceSnapshot, FeedError>;
}

// ════════════════════════════════════════════════════════════════════════════
// COINPAPRIKA
// ════════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct Ticker {
    quotes: Quotes,
}

#[derive(Deserialize)]
struct Quotes {
    #[serde(rename = "USD")]
    usd: PriceSnapshot,
}

/// Ticker client backed by reqwest.
#[derive(Debug, Clone)]
pub struct CoinpaprikaFeed {
    url: String,
    client: Client,
    request_timeout: Duration,
}

impl CoinpaprikaFeed {
    /// Client for `url` with a per-request timeout.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FeedError::Transport(format!("client build: {}", e)))?;
        Ok(Self { url: url.into(), client, request_timeout })
    }

    /// Ticker URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_error(&self, e: reqwest::Error) -> FeedError {
        if e.is_timeout() {
            FeedError::Timeout(self.request_timeout.as_millis() as u64)
        } else if e.is_decode() {
            FeedError::Decode(e.to_string())
        } else {
            FeedError::Transport(e.to_string())
        }
    }
}

/// Extracts `quotes.USD` from a ticker body.
pub fn parse_ticker(body: &[u8]) -> Result<PriceSnapshot, FeedError> {
    let ticker: Ticker =
        serde_json::from_slice(body).map_err(|e| FeedError::Decode(e.to_string()))?;
    Ok(ticker.quotes.usd)
}

#[async_trait]
impl PriceFeed for CoinpaprikaFeed {
    async fn fetch(&self) -> Result<PriceSnapshot, FeedError> {
        debug!(url = %self.url, "querying price feed");

        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        match resp.status() {
            StatusCode::OK => {
                let body = resp.bytes().await.map_err(|e| self.map_error(e))?;
                parse_ticker(&body)
            }
            StatusCode::TOO_MANY_REQUESTS => Err(FeedError::RateLimited),
            other => Err(FeedError::Status(other.as_u16())),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ticker_extracts_usd_quote() {
        let body = br#"{
            "id": "spr-spectre-network",
            "quotes": {
                "USD": {
                    "price": 0.0123,
                    "volume_24h": 15000.5,
                    "market_cap": 650000,
                    "percent_change_24h": -3.2,
                    "ath_price": 0.05
                }
            }
        }"#;
        let snap = parse_ticker(body).expect("parse");
        assert!((snap.price - 0.0123).abs() < 1e-12);
        assert!((snap.percent_change_24h + 3.2).abs() < 1e-12);
        assert!(snap.extra.contains_key("ath_price"));
    }

    #[test]
    fn test_parse_ticker_without_usd_is_decode_error() {
        let err = parse_ticker(br#"{"quotes": {}}"#).unwrap_err();
        assert!(matches!(err, FeedError::Decode(_)));
        assert_eq!(err.kind(), FailureKind::Inconsistent);
    }

    #[test]
    fn test_feed_error_kinds() {
        assert_eq!(FeedError::RateLimited.kind(), FailureKind::RateLimited);
        assert_eq!(FeedError::Status(500).kind(), FailureKind::Unreachable);
        assert_eq!(FeedError::Timeout(10_000).kind(), FailureKind::Unreachable);
    }

    #[test]
    fn test_snapshot_serializes_extra_fields_flat() {
        let mut snap = PriceSnapshot::with_price(1.5);
        snap.extra.insert("ath_date".into(), serde_json::json!("2024-01-01"));
        let v = serde_json::to_value(&snap).expect("serialize");
        assert_eq!(v["price"], serde_json::json!(1.5));
        assert_eq!(v["ath_date"], serde_json::json!("2024-01-01"));
    }
}
