//! Technical indicator calculator.
//!
//! Turns a bar series into an augmented series: one [`IndicatorRow`] per
//! bar. Every indicator is computed incrementally in a single forward
//! pass: EMAs are recursive and seeded with the first close, rolling
//! means and deviations use a fixed window.

use std::collections::VecDeque;

use crate::types::{Bar, ScoutError};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

pub const EMA_FAST: usize = 9;
pub const EMA_SLOW: usize = 21;
pub const EMA_BASELINE: usize = 200;
pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const BAND_PERIOD: usize = 20;
pub const BAND_WIDTH: f64 = 2.0;
pub const ATR_PERIOD: usize = 14;
pub const VOLUME_PERIOD: usize = 20;

/// Longest rolling window; a series must be longer than this for the
/// last two rows to carry every value.
pub const LONGEST_WINDOW: usize = BAND_PERIOD;

/// Indicator settings that vary by deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorParams {
    /// Minimum number of bars before a series is considered valid.
    pub warmup_bars: usize,
}

impl IndicatorParams {
    /// Effective minimum length, never below the rolling windows.
    pub fn min_len(&self) -> usize {
        self.warmup_bars.max(LONGEST_WINDOW + 1)
    }
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            warmup_bars: EMA_BASELINE,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One bar plus every indicator value at that bar.
///
/// Rolling values are `None` until their window has filled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorRow {
    pub bar: Bar,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub ema_baseline: f64,
    pub rsi: Option<f64>,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_hist: f64,
    pub bb_mid: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_lower: Option<f64>,
    pub atr: Option<f64>,
    pub volume_ma: Option<f64>,
}

impl IndicatorRow {
    pub fn close(&self) -> f64 {
        self.bar.close
    }
}

// ---------------------------------------------------------------------------
// Incremental building blocks
// ---------------------------------------------------------------------------

/// Recursive EMA seeded with the first observation (`adjust=False`).
#[derive(Debug, Clone)]
struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    fn new(span: usize) -> Self {
        Self {
            alpha: 2.0 / (span as f64 + 1.0),
            value: None,
        }
    }

    fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            None => x,
            Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
        };
        self.value = Some(next);
        next
    }
}

/// Fixed-size window with running sum for simple means and deviations.
#[derive(Debug, Clone)]
struct Rolling {
    window: usize,
    buf: VecDeque<f64>,
    sum: f64,
}

impl Rolling {
    fn new(window: usize) -> Self {
        Self {
            window,
            buf: VecDeque::with_capacity(window + 1),
            sum: 0.0,
        }
    }

    fn push(&mut self, x: f64) {
        self.buf.push_back(x);
        self.sum += x;
        if self.buf.len() > self.window {
            if let Some(old) = self.buf.pop_front() {
                self.sum -= old;
            }
        }
    }

    fn is_full(&self) -> bool {
        self.buf.len() == self.window
    }

    fn mean(&self) -> Option<f64> {
        self.is_full().then(|| self.sum / self.window as f64)
    }

    /// Population standard deviation of the window.
    fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let var = self.buf.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / self.window as f64;
        Some(var.sqrt())
    }
}

/// Wilder-smoothed RSI.
///
/// The first average is the simple mean of the first `period` changes;
/// after that `avg = (avg·(n−1) + x) / n`.
#[derive(Debug, Clone)]
struct Rsi {
    period: usize,
    prev_close: Option<f64>,
    seen: usize,
    gain_sum: f64,
    loss_sum: f64,
    avg_gain: f64,
    avg_loss: f64,
}

impl Rsi {
    fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            seen: 0,
            gain_sum: 0.0,
            loss_sum: 0.0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    fn update(&mut self, close: f64) -> Option<f64> {
        let prev = match self.prev_close.replace(close) {
            Some(p) => p,
            None => return None,
        };
        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let n = self.period as f64;

        self.seen += 1;
        if self.seen < self.period {
            self.gain_sum += gain;
            self.loss_sum += loss;
            return None;
        }
        if self.seen == self.period {
            self.avg_gain = (self.gain_sum + gain) / n;
            self.avg_loss = (self.loss_sum + loss) / n;
        } else {
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        }

        Some(rsi_from_averages(self.avg_gain, self.avg_loss))
    }
}

/// Saturates instead of dividing by zero: no losses → 100, flat → 50.
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

/// Compute the augmented series for `bars`.
///
/// Returns [`ScoutError::InsufficientData`] when the series is shorter
/// than the configured warm-up; never panics on short or flat input.
pub fn compute(
    instrument: &str,
    bars: &[Bar],
    params: &IndicatorParams,
) -> Result<Vec<IndicatorRow>, ScoutError> {
    let need = params.min_len();
    if bars.len() < need {
        return Err(ScoutError::InsufficientData {
            instrument: instrument.to_string(),
            have: bars.len(),
            need,
        });
    }

    let mut ema_fast = Ema::new(EMA_FAST);
    let mut ema_slow = Ema::new(EMA_SLOW);
    let mut ema_base = Ema::new(EMA_BASELINE);
    let mut macd_fast = Ema::new(MACD_FAST);
    let mut macd_slow = Ema::new(MACD_SLOW);
    let mut macd_signal = Ema::new(MACD_SIGNAL);
    let mut rsi = Rsi::new(RSI_PERIOD);
    let mut band = Rolling::new(BAND_PERIOD);
    let mut true_range = Rolling::new(ATR_PERIOD);
    let mut volume = Rolling::new(VOLUME_PERIOD);

    let mut prev_close: Option<f64> = None;
    let mut rows = Vec::with_capacity(bars.len());

    for bar in bars {
        let close = bar.close;

        let macd = macd_fast.update(close) - macd_slow.update(close);
        let signal = macd_signal.update(macd);

        band.push(close);
        let (bb_mid, bb_upper, bb_lower) = match (band.mean(), band.std_dev()) {
            (Some(mid), Some(sd)) => (
                Some(mid),
                Some(mid + BAND_WIDTH * sd),
                Some(mid - BAND_WIDTH * sd),
            ),
            _ => (None, None, None),
        };

        let tr = match prev_close {
            Some(pc) => (bar.high - bar.low)
                .max((bar.high - pc).abs())
                .max((bar.low - pc).abs()),
            None => bar.high - bar.low,
        };
        true_range.push(tr);
        volume.push(bar.volume);
        prev_close = Some(close);

        rows.push(IndicatorRow {
            bar: *bar,
            ema_fast: ema_fast.update(close),
            ema_slow: ema_slow.update(close),
            ema_baseline: ema_base.update(close),
            rsi: rsi.update(close),
            macd,
            macd_signal: signal,
            macd_hist: macd - signal,
            bb_mid,
            bb_upper,
            bb_lower,
            atr: true_range.mean(),
            volume_ma: volume.mean(),
        });
    }

    Ok(rows)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
