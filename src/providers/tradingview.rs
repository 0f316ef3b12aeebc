//! TradingView stock screener.
//!
//! Supplies equity candidate universes for the TH, CN, HK and US
//! markets, ranked by traded volume. The screener pages through results
//! with a `[start, end)` range; this client walks the pages and returns
//! a single uniform list.
//!
//! Endpoint: POST https://scanner.tradingview.com/{region}/scan
//! Auth: Not required.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::CandidateProvider;
use crate::types::{Instrument, Market};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://scanner.tradingview.com";

/// Rows requested per screener page.
const PAGE_SIZE: usize = 1000;

/// Penny stocks below this close are excluded.
const MIN_CLOSE: f64 = 0.1;

/// Column order requested from the screener; `name` and `exchange` are
/// read positionally from each row.
const COLUMNS: &[&str] = &["name", "close", "volume", "change", "exchange"];
const COL_NAME: usize = 0;
const COL_EXCHANGE: usize = 4;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanResponse {
    #[serde(default)]
    total_count: usize,
    #[serde(default)]
    data: Vec<ScanRow>,
}

#[derive(Debug, Deserialize)]
struct ScanRow {
    d: Vec<Value>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct TradingViewScanner {
    http: Client,
    base_url: String,
}

impl TradingViewScanner {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .user_agent("TRENDSCOUT/0.1.0 (market-scanner)")
            .build()
            .context("Failed to build HTTP client for TradingView")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Screener region path segment for a market.
    fn region(market: Market) -> Option<&'static str> {
        match market {
            Market::Thailand => Some("thailand"),
            Market::China => Some("china"),
            Market::HongKong => Some("hongkong"),
            Market::UnitedStates => Some("america"),
            Market::Crypto => None,
        }
    }

    /// Exchange filter narrowing each region to its main boards.
    fn exchange_filter(market: Market) -> Option<Value> {
        match market {
            Market::Thailand => Some(json!({"left": "exchange", "operation": "equal", "right": "SET"})),
            Market::HongKong => Some(json!({"left": "exchange", "operation": "equal", "right": "HKEX"})),
            Market::China => Some(json!({"left": "exchange", "operation": "in_range", "right": ["SSE", "SZSE"]})),
            Market::UnitedStates => Some(json!({"left": "exchange", "operation": "in_range", "right": ["NASDAQ", "NYSE"]})),
            Market::Crypto => None,
        }
    }

    /// Build the screener request body for one page.
    fn payload(market: Market, start: usize, end: usize) -> Value {
        let mut filters = vec![
            json!({"left": "type", "operation": "equal", "right": "stock"}),
            json!({"left": "subtype", "operation": "in_range", "right": ["common", "foreign"]}),
            json!({"left": "volume", "operation": "nempty"}),
            json!({"left": "close", "operation": "greater", "right": MIN_CLOSE}),
        ];
        if let Some(f) = Self::exchange_filter(market) {
            filters.push(f);
        }

        json!({
            "filter": filters,
            "options": {"lang": "en"},
            "symbols": {"query": {"types": []}},
            "columns": COLUMNS,
            "sort": {"sortBy": "volume", "sortOrder": "desc"},
            "range": [start, end],
        })
    }

    /// Extract instruments from screener rows, skipping malformed ones.
    fn parse_rows(rows: Vec<ScanRow>) -> Vec<Instrument> {
        rows.into_iter()
            .filter_map(|row| {
                let name = row.d.get(COL_NAME)?.as_str()?;
                let exchange = row.d.get(COL_EXCHANGE)?.as_str()?;
                if name.is_empty() || exchange.is_empty() {
                    return None;
                }
                Some(Instrument::new(name, exchange))
            })
            .collect()
    }

    async fn fetch_page(&self, region: &str, body: &Value) -> Result<ScanResponse> {
        let url = format!("{}/{region}/scan", self.base_url);

        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .context("TradingView scan request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("TradingView API error {status}: {body}");
        }

        resp.json()
            .await
            .context("Failed to parse TradingView scan response")
    }
}

#[async_trait]
impl CandidateProvider for TradingViewScanner {
    async fn query(&self, market: Market, limit: usize) -> Result<Vec<Instrument>> {
        let Some(region) = Self::region(market) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        let mut start = 0;

        while start < limit {
            let end = (start + PAGE_SIZE).min(limit);
            let page = self
                .fetch_page(region, &Self::payload(market, start, end))
                .await?;
            let rows = page.data.len();
            debug!(market = %market, start, end, rows, total = page.total_count, "Screener page");

            out.extend(Self::parse_rows(page.data));

            if rows < end - start || end >= page.total_count {
                break;
            }
            start = end;
        }

        info!(market = %market, candidates = out.len(), "Screener universe fetched");
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
