//! Shared types for the TRENDSCOUT engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that analysis, ranking, provider
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Instrument
// ---------------------------------------------------------------------------

/// A tradable symbol at a specific venue (e.g. `BINANCE:BTCUSDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub venue: String,
}

impl Instrument {
    /// Build an instrument, normalising both parts to upper case.
    pub fn new(symbol: impl AsRef<str>, venue: impl AsRef<str>) -> Self {
        Self {
            symbol: symbol.as_ref().trim().to_uppercase(),
            venue: venue.as_ref().trim().to_uppercase(),
        }
    }

    /// Whether this instrument trades on the Binance spot venue.
    pub fn is_crypto(&self) -> bool {
        self.venue == BINANCE_VENUE
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.venue, self.symbol)
    }
}

/// Venue tag used for every crypto instrument.
pub const BINANCE_VENUE: &str = "BINANCE";

// ---------------------------------------------------------------------------
// Bars
// ---------------------------------------------------------------------------

/// One OHLCV sample for a fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Bar interval requested from a [`crate::providers::BarProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Interval {
    /// Length of one bar in minutes.
    pub fn minutes(&self) -> i64 {
        match self {
            Interval::OneMinute => 1,
            Interval::FiveMinutes => 5,
            Interval::FifteenMinutes => 15,
            Interval::OneHour => 60,
            Interval::FourHours => 240,
            Interval::OneDay => 1440,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Markets and directions
// ---------------------------------------------------------------------------

/// A scanned market. Each one has its own candidate universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Market {
    #[serde(rename = "TH")]
    Thailand,
    #[serde(rename = "CN")]
    China,
    #[serde(rename = "HK")]
    HongKong,
    #[serde(rename = "US")]
    UnitedStates,
    #[serde(rename = "CRYPTO")]
    Crypto,
}

impl Market {
    /// All known markets (useful for iteration).
    pub const ALL: &'static [Market] = &[
        Market::Thailand,
        Market::China,
        Market::HongKong,
        Market::UnitedStates,
        Market::Crypto,
    ];

    /// Short tag used in records, config keys and URLs.
    pub fn tag(&self) -> &'static str {
        match self {
            Market::Thailand => "TH",
            Market::China => "CN",
            Market::HongKong => "HK",
            Market::UnitedStates => "US",
            Market::Crypto => "CRYPTO",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Parse a market tag (case-insensitive).
impl FromStr for Market {
    type Err = ScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TH" => Ok(Market::Thailand),
            "CN" => Ok(Market::China),
            "HK" => Ok(Market::HongKong),
            "US" => Ok(Market::UnitedStates),
            "CRYPTO" => Ok(Market::Crypto),
            other => Err(ScoutError::Validation(format!("unknown market: {other}"))),
        }
    }
}

/// Which side of the market a scan looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub const ALL: &'static [Direction] = &[Direction::Buy, Direction::Sell];
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for Direction {
    type Err = ScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(Direction::Buy),
            "SELL" => Ok(Direction::Sell),
            other => Err(ScoutError::Validation(format!("unknown direction: {other}"))),
        }
    }
}

/// Key of one ranking slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RankingKey {
    pub market: Market,
    pub direction: Direction,
}

impl RankingKey {
    pub fn new(market: Market, direction: Direction) -> Self {
        Self { market, direction }
    }

    /// Every (market, direction) pair.
    pub fn all() -> Vec<RankingKey> {
        Market::ALL
            .iter()
            .flat_map(|m| Direction::ALL.iter().map(move |d| RankingKey::new(*m, *d)))
            .collect()
    }
}

impl fmt::Display for RankingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.market, self.direction)
    }
}

// ---------------------------------------------------------------------------
// Score records and ranking entries
// ---------------------------------------------------------------------------

/// A scored snapshot of one instrument at scan time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub instrument: Instrument,
    /// Latest close when the record was produced.
    pub price: f64,
    pub score: i32,
    pub reasons: Vec<String>,
    pub market: Market,
}

impl fmt::Display for ScoreRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] score {} @ {:.4} ({})",
            self.instrument,
            self.market,
            self.score,
            self.price,
            self.reasons.join(" + "),
        )
    }
}

/// Bounded, ranked list of records for one (market, direction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub market: Market,
    pub direction: Direction,
    pub records: Vec<ScoreRecord>,
    /// `None` until the first refresh completes.
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl RankingEntry {
    pub fn empty(key: RankingKey) -> Self {
        Self {
            market: key.market,
            direction: key.direction,
            records: Vec::new(),
            refreshed_at: None,
        }
    }

    pub fn key(&self) -> RankingKey {
        RankingKey::new(self.market, self.direction)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Trigger side of a price alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertDirection {
    Above,
    Below,
}

impl AlertDirection {
    /// Whether `price` crosses `threshold` on this side (inclusive).
    pub fn is_hit(&self, price: Decimal, threshold: Decimal) -> bool {
        match self {
            AlertDirection::Above => price >= threshold,
            AlertDirection::Below => price <= threshold,
        }
    }
}

impl fmt::Display for AlertDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertDirection::Above => write!(f, "above"),
            AlertDirection::Below => write!(f, "below"),
        }
    }
}

impl FromStr for AlertDirection {
    type Err = ScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "above" => Ok(AlertDirection::Above),
            "below" => Ok(AlertDirection::Below),
            other => Err(ScoutError::Validation(format!(
                "direction must be 'above' or 'below', got '{other}'"
            ))),
        }
    }
}

/// A user-defined price threshold. Immutable once created; removed when
/// it fires or when its owner deletes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    /// Chat / user id the notification is delivered to.
    pub owner: i64,
    pub instrument: Instrument,
    pub direction: AlertDirection,
    pub threshold: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Validate raw parameters and build a new alert.
    pub fn new(
        owner: i64,
        symbol: &str,
        venue: &str,
        direction: &str,
        threshold: Decimal,
    ) -> Result<Self, ScoutError> {
        if symbol.trim().is_empty() {
            return Err(ScoutError::Validation("symbol must not be empty".into()));
        }
        if venue.trim().is_empty() {
            return Err(ScoutError::Validation("venue must not be empty".into()));
        }
        let direction: AlertDirection = direction.parse()?;
        if threshold <= Decimal::ZERO {
            return Err(ScoutError::Validation(format!(
                "threshold must be positive, got {threshold}"
            )));
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner,
            instrument: Instrument::new(symbol, venue),
            direction,
            threshold,
            created_at: Utc::now(),
        })
    }

    /// Whether the alert fires at `price`.
    pub fn is_triggered(&self, price: Decimal) -> bool {
        self.direction.is_hit(price, self.threshold)
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} (owner {})",
            self.instrument, self.direction, self.threshold, self.owner
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for TRENDSCOUT.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoutError {
    #[error("Fetch failed for {target}: {message}")]
    TransientFetch { target: String, message: String },

    #[error("Insufficient data for {instrument}: {have} bars, need {need}")]
    InsufficientData {
        instrument: String,
        have: usize,
        need: usize,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
