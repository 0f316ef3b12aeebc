//! External data and delivery integrations.
//!
//! Defines the provider traits the core depends on and implementations
//! for:
//! - TradingView scanner — equity candidate universes (TH, CN, HK, US)
//! - Binance — crypto candidate universe and klines
//! - Yahoo Finance chart API — equity bars
//! - Telegram Bot API — alert notifications

pub mod binance;
pub mod telegram;
pub mod tradingview;
pub mod yahoo;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::types::{Bar, Instrument, Interval, Market};

/// Source of candidate instruments for one market.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CandidateProvider: Send + Sync {
    /// Instruments ranked by a liquidity-like criterion, at most `limit`.
    async fn query(&self, market: Market, limit: usize) -> Result<Vec<Instrument>>;
}

/// Source of historical OHLCV bars.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BarProvider: Send + Sync {
    /// The most recent `count` bars, oldest first.
    async fn fetch(&self, instrument: &Instrument, interval: Interval, count: usize)
        -> Result<Vec<Bar>>;
}

/// Fire-and-forget delivery channel for user notifications.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, owner: i64, message: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Routers
// ---------------------------------------------------------------------------

/// Routes universe queries to the provider that covers each market.
pub struct MarketUniverse {
    equities: Arc<dyn CandidateProvider>,
    crypto: Arc<dyn CandidateProvider>,
}

impl MarketUniverse {
    pub fn new(equities: Arc<dyn CandidateProvider>, crypto: Arc<dyn CandidateProvider>) -> Self {
        Self { equities, crypto }
    }
}

#[async_trait]
impl CandidateProvider for MarketUniverse {
    async fn query(&self, market: Market, limit: usize) -> Result<Vec<Instrument>> {
        match market {
            Market::Crypto => self.crypto.query(market, limit).await,
            _ => self.equities.query(market, limit).await,
        }
    }
}

/// Routes bar requests by venue: Binance instruments to the crypto
/// provider, everything else to the equity provider.
pub struct VenueRouter {
    equities: Arc<dyn BarProvider>,
    crypto: Arc<dyn BarProvider>,
}

impl VenueRouter {
    pub fn new(equities: Arc<dyn BarProvider>, crypto: Arc<dyn BarProvider>) -> Self {
        Self { equities, crypto }
    }
}

#[async_trait]
impl BarProvider for VenueRouter {
    async fn fetch(
        &self,
        instrument: &Instrument,
        interval: Interval,
        count: usize,
    ) -> Result<Vec<Bar>> {
        if instrument.is_crypto() {
            self.crypto.fetch(instrument, interval, count).await
        } else {
            self.equities.fetch(instrument, interval, count).await
        }
    }
}
