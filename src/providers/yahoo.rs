//! Yahoo Finance chart API for equity bars.
//!
//! Maps screener venues onto Yahoo ticker suffixes (SET → `.BK`,
//! HKEX → `.HK`, SSE → `.SS`, SZSE → `.SZ`) and converts the columnar
//! chart payload into a bar series, dropping rows with missing fields.
//!
//! Endpoint: GET https://query1.finance.yahoo.com/v8/finance/chart/{ticker}

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::BarProvider;
use crate::types::{Bar, Instrument, Interval};

const BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct YahooChartClient {
    http: Client,
    base_url: String,
}

impl YahooChartClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .user_agent("Mozilla/5.0 (compatible; TRENDSCOUT/0.1.0)")
            .build()
            .context("Failed to build HTTP client for Yahoo Finance")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Yahoo ticker for a screener instrument.
    fn ticker(instrument: &Instrument) -> String {
        let sym = instrument.symbol.as_str();
        match instrument.venue.as_str() {
            "SET" => format!("{sym}.BK"),
            "HKEX" => format!("{sym:0>4}.HK"),
            "SSE" => format!("{sym}.SS"),
            "SZSE" => format!("{sym}.SZ"),
            // US share classes: BRK.B → BRK-B
            _ => sym.replace('.', "-"),
        }
    }

    fn interval_param(interval: Interval) -> &'static str {
        match interval {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            // Yahoo has no 4h bars; hourly is the closest that keeps the series long
            Interval::OneHour | Interval::FourHours => "60m",
            Interval::OneDay => "1d",
        }
    }

    /// Smallest Yahoo range that comfortably holds `count` bars. Equity
    /// sessions are ~6.5h, so hourly data needs ~4x calendar cover.
    fn range_param(interval: Interval, count: usize) -> &'static str {
        let days = match interval {
            Interval::OneMinute | Interval::FiveMinutes | Interval::FifteenMinutes => {
                return if interval == Interval::OneMinute { "1d" } else { "5d" };
            }
            Interval::OneHour | Interval::FourHours => count / 6 + 7,
            Interval::OneDay => count * 7 / 5 + 7,
        };
        match days {
            0..=30 => "1mo",
            31..=90 => "3mo",
            91..=180 => "6mo",
            181..=365 => "1y",
            366..=730 => "2y",
            _ => "5y",
        }
    }

    fn parse_chart(envelope: ChartEnvelope, count: usize) -> Result<Vec<Bar>> {
        if let Some(err) = envelope.chart.error.filter(|e| !e.is_null()) {
            anyhow::bail!("Yahoo chart error: {err}");
        }
        let result = envelope
            .chart
            .result
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
            .context("Yahoo chart response has no result")?;
        let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

        let mut bars: Vec<Bar> = result
            .timestamp
            .iter()
            .enumerate()
            .filter_map(|(i, &ts)| {
                let field = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
                Some(Bar {
                    time: Utc.timestamp_opt(ts, 0).single()?,
                    open: field(&quote.open)?,
                    high: field(&quote.high)?,
                    low: field(&quote.low)?,
                    close: field(&quote.close)?,
                    volume: field(&quote.volume).unwrap_or(0.0),
                })
            })
            .collect();

        if bars.len() > count {
            bars.drain(..bars.len() - count);
        }
        Ok(bars)
    }
}

#[async_trait]
impl BarProvider for YahooChartClient {
    async fn fetch(
        &self,
        instrument: &Instrument,
        interval: Interval,
        count: usize,
    ) -> Result<Vec<Bar>> {
        let ticker = Self::ticker(instrument);
        let url = format!("{}/{}", self.base_url, urlencoding::encode(&ticker));
        debug!(url = %url, %instrument, "Fetching Yahoo chart");

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("interval", Self::interval_param(interval)),
                ("range", Self::range_param(interval, count)),
            ])
            .send()
            .await
            .with_context(|| format!("Yahoo chart request failed for {instrument}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Yahoo API error {status} for {instrument}: {body}");
        }

        let envelope: ChartEnvelope = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse Yahoo chart for {instrument}"))?;

        Self::parse_chart(envelope, count)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ticker_suffixes() {
        assert_eq!(YahooChartClient::ticker(&Instrument::new("PTT", "SET")), "PTT.BK");
        assert_eq!(YahooChartClient::ticker(&Instrument::new("700", "HKEX")), "0700.HK");
        assert_eq!(YahooChartClient::ticker(&Instrument::new("9988", "HKEX")), "9988.HK");
        assert_eq!(YahooChartClient::ticker(&Instrument::new("600519", "SSE")), "600519.SS");
        assert_eq!(YahooChartClient::ticker(&Instrument::new("000001", "SZSE")), "000001.SZ");
        assert_eq!(YahooChartClient::ticker(&Instrument::new("BRK.B", "NYSE")), "BRK-B");
    }

    #[test]
    fn test_range_covers_hourly_warmup() {
        // 250 hourly bars ≈ 42 trading days
        assert_eq!(YahooChartClient::range_param(Interval::OneHour, 250), "3mo");
        assert_eq!(YahooChartClient::range_param(Interval::OneDay, 250), "1y");
        assert_eq!(YahooChartClient::range_param(Interval::OneMinute, 1), "1d");
    }

    #[test]
    fn test_parse_chart_drops_null_rows_and_trims() {
        let body = json!({
            "chart": {
                "result": [{
                    "timestamp": [1_700_000_000, 1_700_003_600, 1_700_007_200, 1_700_010_800],
                    "indicators": {"quote": [{
                        "open":   [1.0, null, 3.0, 4.0],
                        "high":   [1.5, 2.5, 3.5, 4.5],
                        "low":    [0.5, 1.5, 2.5, 3.5],
                        "close":  [1.2, 2.2, 3.2, 4.2],
                        "volume": [10.0, 20.0, null, 40.0]
                    }]}
                }],
                "error": null
            }
        });
        let env: ChartEnvelope = serde_json::from_value(body).unwrap();
        let bars = YahooChartClient::parse_chart(env, 2).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 3.2);
        assert_eq!(bars[0].volume, 0.0);
        assert_eq!(bars[1].close, 4.2);
    }

    #[test]
    fn test_parse_chart_error() {
        let body = json!({
            "chart": {"result": null, "error": {"code": "Not Found", "description": "No data found"}}
        });
        let env: ChartEnvelope = serde_json::from_value(body).unwrap();
        assert!(YahooChartClient::parse_chart(env, 10).is_err());
    }
}
