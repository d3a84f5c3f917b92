//! Cached TRX price oracle.
//!
//! Owns its cache (constructed at init, no module-level state) and degrades
//! in two steps: a fresh fetch, then the last known rate, then the
//! configured fallback constant. The engine reads it exactly once per
//! settlement, so a stale-but-bounded rate is acceptable.

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use shared_types::{Clock, TimestampMs, MINUTE_MS};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::DealError;
use crate::ports::outbound::PriceOracle;

/// Where the oracle pulls fresh rates from.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Current TRX price in USD.
    async fn fetch_trx_usd(&self) -> Result<Decimal, DealError>;
}

/// Fixed rate, for tests and air-gapped development.
pub struct StaticRateSource(pub Decimal);

#[async_trait]
impl RateSource for StaticRateSource {
    async fn fetch_trx_usd(&self) -> Result<Decimal, DealError> {
        Ok(self.0)
    }
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    price: Decimal,
}

/// Rate source backed by an exchange ticker endpoint returning
/// `{"price": "0.1234"}`.
pub struct HttpRateSource {
    client: reqwest::Client,
    url: String,
}

impl HttpRateSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn fetch_trx_usd(&self) -> Result<Decimal, DealError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DealError::BlockchainUnavailable(format!("rate feed: {e}")))?;
        let ticker: TickerResponse = response
            .json()
            .await
            .map_err(|e| DealError::BlockchainUnavailable(format!("rate feed decode: {e}")))?;
        Ok(ticker.price)
    }
}

struct CachedRate {
    price: Decimal,
    fetched_at: TimestampMs,
}

/// The [`PriceOracle`] implementation: periodic cache over a source, with a
/// fallback constant when both the feed and the cache are unusable.
pub struct CachedPriceOracle {
    source: Arc<dyn RateSource>,
    clock: Arc<dyn Clock>,
    refresh_ms: u64,
    fallback: Decimal,
    cached: RwLock<Option<CachedRate>>,
}

impl CachedPriceOracle {
    pub fn new(source: Arc<dyn RateSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            refresh_ms: 5 * MINUTE_MS,
            fallback: dec!(0.12),
            cached: RwLock::new(None),
        }
    }

    /// Override the refresh interval.
    pub fn with_refresh_ms(mut self, refresh_ms: u64) -> Self {
        self.refresh_ms = refresh_ms;
        self
    }

    /// Override the fallback constant.
    pub fn with_fallback(mut self, fallback: Decimal) -> Self {
        self.fallback = fallback;
        self
    }

    fn fresh_cached(&self, now: TimestampMs) -> Option<Decimal> {
        self.cached
            .read()
            .as_ref()
            .filter(|c| now.saturating_sub(c.fetched_at) < self.refresh_ms)
            .map(|c| c.price)
    }

    fn any_cached(&self) -> Option<Decimal> {
        self.cached.read().as_ref().map(|c| c.price)
    }
}

#[async_trait]
impl PriceOracle for CachedPriceOracle {
    async fn trx_price_usd(&self) -> Decimal {
        let now = self.clock.now_ms();
        if let Some(price) = self.fresh_cached(now) {
            return price;
        }

        match self.source.fetch_trx_usd().await {
            Ok(price) if price > Decimal::ZERO => {
                *self.cached.write() = Some(CachedRate {
                    price,
                    fetched_at: now,
                });
                debug!(%price, "TRX rate refreshed");
                price
            }
            Ok(price) => {
                warn!(%price, "rate feed returned a non-positive price; ignoring");
                self.any_cached().unwrap_or(self.fallback)
            }
            Err(err) => {
                warn!(%err, "rate feed unavailable; using last known rate or fallback");
                self.any_cached().unwrap_or(self.fallback)
            }
        }
    }
}
