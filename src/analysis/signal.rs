//! Point-in-time signal read-out for a single instrument.
//!
//! Summarises the latest augmented row as a trend verdict, an action
//! zone, and ATR-derived entry / stop / target levels.

use serde::Serialize;

use crate::analysis::indicators::IndicatorRow;

/// Stop distance in ATR multiples.
const STOP_ATR_MULT: f64 = 2.0;
/// Target distance in ATR multiples.
const TARGET_ATR_MULT: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    BuyZone,
    SellZone,
    Wait,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalSnapshot {
    pub price: f64,
    pub trend: Trend,
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub action: Action,
    pub entry: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl SignalSnapshot {
    /// Build a snapshot from the last row of an augmented series.
    pub fn from_rows(rows: &[IndicatorRow]) -> Option<Self> {
        let last = rows.last()?;
        let close = last.close();

        let trend = if close > last.ema_baseline {
            Trend::Bullish
        } else {
            Trend::Bearish
        };

        let action = if close > last.ema_baseline && last.macd > last.macd_signal {
            Action::BuyZone
        } else if close < last.ema_baseline && last.macd < last.macd_signal {
            Action::SellZone
        } else {
            Action::Wait
        };

        let (entry, stop_loss, take_profit) = match (action, last.atr) {
            (Action::BuyZone, Some(atr)) => (
                Some(close),
                Some(close - atr * STOP_ATR_MULT),
                Some(close + atr * TARGET_ATR_MULT),
            ),
            (Action::SellZone, Some(atr)) => (
                Some(close),
                Some(close + atr * STOP_ATR_MULT),
                Some(close - atr * TARGET_ATR_MULT),
            ),
            _ => (None, None, None),
        };

        Some(Self {
            price: close,
            trend,
            rsi: last.rsi,
            atr: last.atr,
            action,
            entry,
            stop_loss,
            take_profit,
        })
    }
}
