//! Per-instrument evaluation: fetch bars, compute indicators, score.
//!
//! The ranking cache only sees the [`Evaluator`] trait, so refresh logic
//! can be exercised with scripted scores and the technical pipeline can
//! be swapped without touching the cache.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::analysis::{indicators, IndicatorRow, Scorer, SignalSnapshot};
use crate::providers::BarProvider;
use crate::types::{Instrument, Interval, RankingKey, ScoreRecord, ScoutError};

/// Produces a fresh Score Record for one instrument.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, instrument: &Instrument, key: RankingKey)
        -> Result<ScoreRecord, ScoutError>;
}

/// Bar provider + indicator calculator + scorer.
pub struct TechnicalEvaluator {
    bars: Arc<dyn BarProvider>,
    scorer: Scorer,
    interval: Interval,
    bar_count: usize,
    /// Pause before each bar request to stay under provider rate limits.
    pacing: Duration,
}

impl TechnicalEvaluator {
    pub fn new(
        bars: Arc<dyn BarProvider>,
        scorer: Scorer,
        interval: Interval,
        bar_count: usize,
    ) -> Self {
        Self {
            bars,
            scorer,
            interval,
            bar_count,
            pacing: Duration::ZERO,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    async fn rows(&self, instrument: &Instrument) -> Result<Vec<IndicatorRow>, ScoutError> {
        if !self.pacing.is_zero() {
            tokio::time::sleep(self.pacing).await;
        }

        let bars = self
            .bars
            .fetch(instrument, self.interval, self.bar_count)
            .await
            .map_err(|e| ScoutError::TransientFetch {
                target: instrument.to_string(),
                message: format!("{e:#}"),
            })?;

        indicators::compute(&instrument.to_string(), &bars, &self.scorer.params)
    }

    /// Current signal read-out for a single instrument.
    pub async fn snapshot(&self, instrument: &Instrument) -> Result<SignalSnapshot, ScoutError> {
        let rows = self.rows(instrument).await?;
        SignalSnapshot::from_rows(&rows).ok_or_else(|| ScoutError::InsufficientData {
            instrument: instrument.to_string(),
            have: 0,
            need: self.scorer.params.min_len(),
        })
    }
}

#[async_trait]
impl Evaluator for TechnicalEvaluator {
    async fn evaluate(
        &self,
        instrument: &Instrument,
        key: RankingKey,
    ) -> Result<ScoreRecord, ScoutError> {
        let rows = self.rows(instrument).await?;
        let outcome = self.scorer.score_rows(&rows, key.direction);

        debug!(
            %instrument,
            key = %key,
            score = outcome.score,
            reasons = ?outcome.reasons,
            "Instrument scored"
        );

        Ok(ScoreRecord {
            instrument: instrument.clone(),
            price: outcome.price,
            score: outcome.score,
            reasons: outcome.reasons,
            market: key.market,
        })
    }
}
