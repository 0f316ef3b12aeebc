//! Binance spot market data.
//!
//! Provides the crypto candidate universe (USDT pairs ranked by 24h
//! quote volume) and hourly/daily klines for any Binance symbol.
//!
//! API docs: https://developers.binance.com/docs/binance-spot-api-docs
//! Base URL: https://api.binance.com/api/v3
//! Auth: Not required for market data.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{BarProvider, CandidateProvider};
use crate::types::{Bar, Instrument, Interval, Market, BINANCE_VENUE};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://api.binance.com/api/v3";

/// Hard cap on klines per request.
const MAX_KLINES: usize = 1000;

/// Quote asset every candidate must trade against.
const QUOTE_ASSET: &str = "USDT";

/// Leveraged token suffixes that are never candidates.
const EXCLUDED_SUFFIXES: &[&str] = &["UPUSDT", "DOWNUSDT", "BULLUSDT", "BEARUSDT"];

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

/// Element of `/ticker/24hr`. Only the fields we rank on.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    /// Decimal string.
    quote_volume: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BinanceClient {
    http: Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    /// Point the client at a different host (testnet, local mock).
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("TRENDSCOUT/0.1.0 (market-scanner)")
            .build()
            .context("Failed to build HTTP client for Binance")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn interval_param(interval: Interval) -> &'static str {
        match interval {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
        }
    }

    /// Rank USDT pairs by quote volume, dropping leveraged tokens.
    fn rank_usdt_pairs(tickers: Vec<Ticker24h>, limit: usize) -> Vec<Instrument> {
        let mut pairs: Vec<(String, f64)> = tickers
            .into_iter()
            .filter(|t| t.symbol.ends_with(QUOTE_ASSET))
            .filter(|t| !EXCLUDED_SUFFIXES.iter().any(|s| t.symbol.ends_with(s)))
            .map(|t| {
                let vol = t.quote_volume.parse::<f64>().unwrap_or(0.0);
                (t.symbol, vol)
            })
            .collect();

        // stable sort keeps API order among equal volumes
        pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        pairs
            .into_iter()
            .take(limit)
            .map(|(symbol, _)| Instrument::new(symbol, BINANCE_VENUE))
            .collect()
    }

    /// Parse the positional kline arrays returned by `/klines`.
    fn parse_klines(raw: Vec<Vec<serde_json::Value>>) -> Result<Vec<Bar>> {
        let num = |v: &serde_json::Value| -> Result<f64> {
            match v {
                serde_json::Value::String(s) => s.parse::<f64>().context("Bad kline number"),
                serde_json::Value::Number(n) => n.as_f64().context("Bad kline number"),
                other => anyhow::bail!("Unexpected kline field: {other}"),
            }
        };

        raw.iter()
            .map(|k| {
                if k.len() < 6 {
                    anyhow::bail!("Kline row too short: {} fields", k.len());
                }
                let open_ms = k[0].as_i64().context("Kline open time missing")?;
                let time = Utc
                    .timestamp_millis_opt(open_ms)
                    .single()
                    .context("Kline open time out of range")?;
                Ok(Bar {
                    time,
                    open: num(&k[1])?,
                    high: num(&k[2])?,
                    low: num(&k[3])?,
                    close: num(&k[4])?,
                    volume: num(&k[5])?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl CandidateProvider for BinanceClient {
    async fn query(&self, market: Market, limit: usize) -> Result<Vec<Instrument>> {
        if market != Market::Crypto {
            return Ok(Vec::new());
        }

        let url = format!("{}/ticker/24hr", self.base_url);
        debug!(url = %url, "Fetching Binance 24h tickers");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Binance ticker request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {status}: {body}");
        }

        let tickers: Vec<Ticker24h> = resp
            .json()
            .await
            .context("Failed to parse Binance ticker response")?;

        Ok(Self::rank_usdt_pairs(tickers, limit))
    }
}

#[async_trait]
impl BarProvider for BinanceClient {
    async fn fetch(
        &self,
        instrument: &Instrument,
        interval: Interval,
        count: usize,
    ) -> Result<Vec<Bar>> {
        let limit = count.clamp(1, MAX_KLINES);
        let url = format!("{}/klines", self.base_url);
        let limit_param = limit.to_string();

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("symbol", instrument.symbol.as_str()),
                ("interval", Self::interval_param(interval)),
                ("limit", limit_param.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("Binance klines request failed for {instrument}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {status} for {instrument}: {body}");
        }

        let raw: Vec<Vec<serde_json::Value>> = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse Binance klines for {instrument}"))?;

        Self::parse_klines(raw)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
