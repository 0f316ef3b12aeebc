//! Multi-factor technical scorer.
//!
//! Evaluates a fixed, ordered set of independent rules on the last two
//! rows of an augmented series and sums their signed contributions.
//! Every rule is always evaluated and reasons are appended in rule
//! order, so identical input always yields identical output.

use crate::analysis::indicators::{self, IndicatorParams, IndicatorRow};
use crate::types::{Bar, Direction};

// ---------------------------------------------------------------------------
// Rule weights
// ---------------------------------------------------------------------------

const TREND_FULL_ALIGNMENT: i32 = 3;
const TREND_BASELINE_SIDE: i32 = 2;
/// Effectively disqualifying: no combination of other rules recovers it.
const TREND_AGAINST: i32 = -5;

const BAND_REVERSAL: i32 = 2;
const BAND_OVEREXTENDED: i32 = -1;
/// How close (fraction of price) the prior bar must come to a band.
const BAND_TOUCH_TOLERANCE: f64 = 0.01;

const MACD_FRESH_CROSS: i32 = 2;
const MACD_SUSTAINED: i32 = 1;

const RSI_HEALTHY: i32 = 1;
const RSI_EXTREME: i32 = -1;
const RSI_BUY_HEALTHY: (f64, f64) = (45.0, 65.0);
const RSI_SELL_HEALTHY: (f64, f64) = (35.0, 55.0);
const RSI_OVERBOUGHT: f64 = 75.0;
const RSI_OVERSOLD: f64 = 25.0;

const VOLUME_CONFIRMED: i32 = 1;

/// Default multiple of the volume MA that counts as a volume surge.
pub const DEFAULT_VOLUME_MULTIPLE: f64 = 1.5;

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Result of scoring one series.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub score: i32,
    pub reasons: Vec<String>,
    /// Reference price: latest close.
    pub price: f64,
}

impl ScoreOutcome {
    /// The "not enough data" result.
    pub fn neutral(price: f64) -> Self {
        Self {
            score: 0,
            reasons: Vec::new(),
            price,
        }
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Scorer {
    pub params: IndicatorParams,
    pub volume_multiple: f64,
}

impl Default for Scorer {
    fn default() -> Self {
        Self {
            params: IndicatorParams::default(),
            volume_multiple: DEFAULT_VOLUME_MULTIPLE,
        }
    }
}

impl Scorer {
    pub fn new(params: IndicatorParams, volume_multiple: f64) -> Self {
        Self {
            params,
            volume_multiple,
        }
    }

    /// Score a raw bar series. Short series score neutral, never error.
    pub fn score(&self, bars: &[Bar], direction: Direction) -> ScoreOutcome {
        let price = bars.last().map(|b| b.close).unwrap_or(0.0);
        match indicators::compute("", bars, &self.params) {
            Ok(rows) => self.score_rows(&rows, direction),
            Err(_) => ScoreOutcome::neutral(price),
        }
    }

    /// Score an already-augmented series.
    pub fn score_rows(&self, rows: &[IndicatorRow], direction: Direction) -> ScoreOutcome {
        let (prev, last) = match rows {
            [.., prev, last] => (prev, last),
            [only] => return ScoreOutcome::neutral(only.close()),
            [] => return ScoreOutcome::neutral(0.0),
        };

        let mut score = 0;
        let mut reasons = Vec::new();

        let rules: [fn(&Self, &IndicatorRow, &IndicatorRow, Direction) -> Option<(i32, String)>; 5] = [
            Self::trend_rule,
            Self::band_rule,
            Self::momentum_rule,
            Self::oscillator_rule,
            Self::volume_rule,
        ];
        for rule in rules {
            if let Some((points, reason)) = rule(self, prev, last, direction) {
                score += points;
                reasons.push(reason);
            }
        }

        ScoreOutcome {
            score,
            reasons,
            price: last.close(),
        }
    }

    // -- Rules -----------------------------------------------------------

    fn trend_rule(
        &self,
        _prev: &IndicatorRow,
        last: &IndicatorRow,
        direction: Direction,
    ) -> Option<(i32, String)> {
        let close = last.close();
        match direction {
            Direction::Buy => {
                if close > last.ema_fast
                    && last.ema_fast > last.ema_slow
                    && last.ema_slow > last.ema_baseline
                {
                    Some((TREND_FULL_ALIGNMENT, "EMA 9>21>200 aligned (strong uptrend)".into()))
                } else if close > last.ema_baseline {
                    Some((TREND_BASELINE_SIDE, "Above EMA200 (major uptrend)".into()))
                } else {
                    Some((TREND_AGAINST, "Below EMA200 (against major trend)".into()))
                }
            }
            Direction::Sell => {
                if close < last.ema_fast
                    && last.ema_fast < last.ema_slow
                    && last.ema_slow < last.ema_baseline
                {
                    Some((TREND_FULL_ALIGNMENT, "EMA 9<21<200 aligned (strong downtrend)".into()))
                } else if close < last.ema_baseline {
                    Some((TREND_BASELINE_SIDE, "Below EMA200 (major downtrend)".into()))
                } else {
                    Some((TREND_AGAINST, "Above EMA200 (against major trend)".into()))
                }
            }
        }
    }

    fn band_rule(
        &self,
        prev: &IndicatorRow,
        last: &IndicatorRow,
        direction: Direction,
    ) -> Option<(i32, String)> {
        let (prev_lower, prev_upper) = (prev.bb_lower?, prev.bb_upper?);
        let (mid, upper, lower) = (last.bb_mid?, last.bb_upper?, last.bb_lower?);
        let close = last.close();

        match direction {
            Direction::Buy => {
                if close > upper {
                    return Some((BAND_OVEREXTENDED, "Over-extended above upper band".into()));
                }
                let touched = prev.bar.low <= prev_lower * (1.0 + BAND_TOUCH_TOLERANCE);
                if touched && close > prev.close() && close < mid {
                    return Some((BAND_REVERSAL, "Lower band rebound".into()));
                }
                None
            }
            Direction::Sell => {
                if close < lower {
                    return Some((BAND_OVEREXTENDED, "Over-extended below lower band".into()));
                }
                let touched = prev.bar.high >= prev_upper * (1.0 - BAND_TOUCH_TOLERANCE);
                if touched && close < prev.close() && close > mid {
                    return Some((BAND_REVERSAL, "Upper band rejection".into()));
                }
                None
            }
        }
    }

    fn momentum_rule(
        &self,
        prev: &IndicatorRow,
        last: &IndicatorRow,
        direction: Direction,
    ) -> Option<(i32, String)> {
        match direction {
            Direction::Buy => {
                if last.macd > last.macd_signal {
                    if prev.macd <= prev.macd_signal {
                        Some((MACD_FRESH_CROSS, "MACD bullish cross".into()))
                    } else {
                        Some((MACD_SUSTAINED, "MACD bullish".into()))
                    }
                } else {
                    None
                }
            }
            Direction::Sell => {
                if last.macd < last.macd_signal {
                    if prev.macd >= prev.macd_signal {
                        Some((MACD_FRESH_CROSS, "MACD bearish cross".into()))
                    } else {
                        Some((MACD_SUSTAINED, "MACD bearish".into()))
                    }
                } else {
                    None
                }
            }
        }
    }

    fn oscillator_rule(
        &self,
        _prev: &IndicatorRow,
        last: &IndicatorRow,
        direction: Direction,
    ) -> Option<(i32, String)> {
        let rsi = last.rsi?;
        match direction {
            Direction::Buy => {
                if rsi >= RSI_OVERBOUGHT {
                    Some((RSI_EXTREME, format!("RSI overbought ({rsi:.0})")))
                } else if (RSI_BUY_HEALTHY.0..=RSI_BUY_HEALTHY.1).contains(&rsi) {
                    Some((RSI_HEALTHY, format!("RSI healthy ({rsi:.0})")))
                } else {
                    None
                }
            }
            Direction::Sell => {
                if rsi <= RSI_OVERSOLD {
                    Some((RSI_EXTREME, format!("RSI oversold ({rsi:.0})")))
                } else if (RSI_SELL_HEALTHY.0..=RSI_SELL_HEALTHY.1).contains(&rsi) {
                    Some((RSI_HEALTHY, format!("RSI weak ({rsi:.0})")))
                } else {
                    None
                }
            }
        }
    }

    fn volume_rule(
        &self,
        prev: &IndicatorRow,
        last: &IndicatorRow,
        direction: Direction,
    ) -> Option<(i32, String)> {
        let avg = last.volume_ma?;
        if avg <= 0.0 || last.bar.volume <= avg * self.volume_multiple {
            return None;
        }
        let agrees = match direction {
            Direction::Buy => last.close() > prev.close(),
            Direction::Sell => last.close() < prev.close(),
        };
        agrees.then(|| {
            (
                VOLUME_CONFIRMED,
                format!("Volume confirmation ({:.1}x)", last.bar.volume / avg),
            )
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
