//! Pure technical analysis: indicators, scoring, and signal snapshots.
//!
//! Nothing in here performs I/O; the ranking layer feeds bar series in
//! and gets deterministic results back.

pub mod indicators;
pub mod scorer;
pub mod signal;

pub use indicators::{IndicatorParams, IndicatorRow};
pub use scorer::{ScoreOutcome, Scorer};
pub use signal::SignalSnapshot;
