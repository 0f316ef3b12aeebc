//! Deterministic in-memory market for integration testing.
//!
//! Acts as both candidate universe and bar source: every symbol is given
//! a price shape, and bar requests are generated from it. A spot price
//! can be set per symbol for alert checks. Call counters let tests
//! assert how much provider traffic a refresh produced.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use trendscout::providers::{BarProvider, CandidateProvider, NotificationSink};
use trendscout::types::{Bar, Instrument, Interval, Market};

/// Price path used to generate a symbol's bar series.
#[derive(Debug, Clone, Copy)]
pub enum Shape {
    Rising,
    Falling,
    Flat,
    /// Fewer bars than the warm-up needs.
    Short,
    /// Every fetch fails.
    Broken,
}

pub struct MockMarket {
    venue: String,
    order: Vec<String>,
    shapes: Mutex<HashMap<String, Shape>>,
    spot: Mutex<HashMap<String, f64>>,
    universe_error: Mutex<Option<String>>,
    pub bar_fetches: AtomicUsize,
    pub universe_queries: AtomicUsize,
}

impl MockMarket {
    /// Universe listed in the given order, all on one venue.
    pub fn new(venue: &str, symbols: &[(&str, Shape)]) -> Self {
        Self {
            venue: venue.to_string(),
            order: symbols.iter().map(|(s, _)| s.to_string()).collect(),
            shapes: Mutex::new(symbols.iter().map(|(s, sh)| (s.to_string(), *sh)).collect()),
            spot: Mutex::new(HashMap::new()),
            universe_error: Mutex::new(None),
            bar_fetches: AtomicUsize::new(0),
            universe_queries: AtomicUsize::new(0),
        }
    }

    pub fn set_shape(&self, symbol: &str, shape: Shape) {
        self.shapes.lock().unwrap().insert(symbol.to_string(), shape);
    }

    pub fn set_spot(&self, symbol: &str, price: f64) {
        self.spot.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub fn fail_universe(&self, msg: &str) {
        *self.universe_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn fetches(&self) -> usize {
        self.bar_fetches.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.universe_queries.load(Ordering::SeqCst)
    }
}

/// Hourly bars with a 1% high/low range and constant volume.
pub fn series(closes: &[f64]) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar {
            time: start + Duration::hours(i as i64),
            open: c,
            high: c * 1.01,
            low: c * 0.99,
            close: c,
            volume: 1000.0,
        })
        .collect()
}

fn closes(shape: Shape, count: usize) -> Vec<f64> {
    match shape {
        Shape::Rising => (0..count).map(|i| 100.0 + i as f64).collect(),
        Shape::Falling => (0..count).map(|i| 100.0 + (count - i) as f64).collect(),
        Shape::Flat => vec![100.0; count],
        Shape::Short => vec![100.0; count.min(20)],
        Shape::Broken => Vec::new(),
    }
}

#[async_trait]
impl CandidateProvider for MockMarket {
    async fn query(&self, _market: Market, limit: usize) -> Result<Vec<Instrument>> {
        self.universe_queries.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.universe_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        Ok(self
            .order
            .iter()
            .take(limit)
            .map(|s| Instrument::new(s, &self.venue))
            .collect())
    }
}

#[async_trait]
impl BarProvider for MockMarket {
    async fn fetch(
        &self,
        instrument: &Instrument,
        interval: Interval,
        count: usize,
    ) -> Result<Vec<Bar>> {
        self.bar_fetches.fetch_add(1, Ordering::SeqCst);

        if interval == Interval::OneMinute {
            let spot = self.spot.lock().unwrap().get(&instrument.symbol).copied();
            return spot
                .map(|p| series(&[p]))
                .ok_or_else(|| anyhow!("no spot price for {instrument}"));
        }

        let shape = self
            .shapes
            .lock()
            .unwrap()
            .get(&instrument.symbol)
            .copied()
            .ok_or_else(|| anyhow!("unknown symbol {instrument}"))?;
        match shape {
            Shape::Broken => Err(anyhow!("connection reset fetching {instrument}")),
            other => Ok(series(&closes(other, count))),
        }
    }
}

/// Sink that records every delivered message.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, owner: i64, message: &str) -> Result<()> {
        self.sent.lock().unwrap().push((owner, message.to_string()));
        Ok(())
    }
}
