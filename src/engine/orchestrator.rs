//! Scan orchestration.
//!
//! Runs ranking refreshes on spawned tasks behind a semaphore so callers
//! (the HTTP handlers, the periodic heavy scan) never block on scan work.
//! Progress flows back over an mpsc channel owned by the caller.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::providers::CandidateProvider;
use crate::ranking::{Evaluator, RankingCache, RankingPolicy, RefreshReport, ScanProgress};
use crate::types::{Direction, Market, RankingKey, ScoutError};

/// A scan running in the background.
pub struct ScanHandle {
    pub key: RankingKey,
    pub progress: UnboundedReceiver<ScanProgress>,
    task: JoinHandle<Result<RefreshReport, ScoutError>>,
}

impl ScanHandle {
    /// Wait for the refresh to finish.
    pub async fn wait(self) -> Result<RefreshReport, ScoutError> {
        join_result(self.key, self.task.await)
    }
}

fn join_result(
    key: RankingKey,
    joined: Result<Result<RefreshReport, ScoutError>, tokio::task::JoinError>,
) -> Result<RefreshReport, ScoutError> {
    joined.map_err(|e| ScoutError::Unavailable(format!("scan task for {key} aborted: {e}")))?
}

/// Drives ranking refreshes for every (market, direction).
#[derive(Clone)]
pub struct ScanOrchestrator {
    cache: Arc<RankingCache>,
    universe: Arc<dyn CandidateProvider>,
    evaluator: Arc<dyn Evaluator>,
    policy: RankingPolicy,
    universe_limits: HashMap<Market, usize>,
    workers: Arc<Semaphore>,
}

impl ScanOrchestrator {
    pub fn new(
        cache: Arc<RankingCache>,
        universe: Arc<dyn CandidateProvider>,
        evaluator: Arc<dyn Evaluator>,
        policy: RankingPolicy,
        max_concurrent_scans: usize,
    ) -> Self {
        Self {
            cache,
            universe,
            evaluator,
            policy,
            universe_limits: HashMap::new(),
            workers: Arc::new(Semaphore::new(max_concurrent_scans.max(1))),
        }
    }

    /// Override the universe size for individual markets.
    pub fn with_universe_limits(mut self, limits: HashMap<Market, usize>) -> Self {
        self.universe_limits = limits;
        self
    }

    pub fn cache(&self) -> &Arc<RankingCache> {
        &self.cache
    }

    pub fn policy(&self) -> &RankingPolicy {
        &self.policy
    }

    fn policy_for(&self, market: Market) -> RankingPolicy {
        RankingPolicy {
            universe_limit: self
                .universe_limits
                .get(&market)
                .copied()
                .unwrap_or(self.policy.universe_limit),
            ..self.policy
        }
    }

    fn spawn_refresh(
        &self,
        key: RankingKey,
        progress: Option<UnboundedSender<ScanProgress>>,
    ) -> JoinHandle<Result<RefreshReport, ScoutError>> {
        let this = self.clone();
        tokio::spawn(async move {
            let _permit = this
                .workers
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ScoutError::Unavailable("scan worker pool closed".into()))?;

            let policy = this.policy_for(key.market);
            this.cache
                .refresh(
                    key,
                    this.universe.as_ref(),
                    this.evaluator.as_ref(),
                    &policy,
                    progress.as_ref(),
                )
                .await
        })
    }

    /// Refresh one key and wait for the result.
    pub async fn trigger_scan(
        &self,
        market: Market,
        direction: Direction,
    ) -> Result<RefreshReport, ScoutError> {
        let key = RankingKey::new(market, direction);
        info!(key = %key, "Scan triggered");
        join_result(key, self.spawn_refresh(key, None).await)
    }

    /// Start a refresh in the background, returning its progress stream.
    pub fn start_scan(&self, market: Market, direction: Direction) -> ScanHandle {
        let key = RankingKey::new(market, direction);
        let (tx, rx) = mpsc::unbounded_channel();
        info!(key = %key, "Scan started");
        ScanHandle {
            key,
            progress: rx,
            task: self.spawn_refresh(key, Some(tx)),
        }
    }

    /// Refresh every market and direction. One key's failure never
    /// affects the others.
    pub async fn scan_all(&self) -> Vec<(RankingKey, Result<RefreshReport, ScoutError>)> {
        let keys = RankingKey::all();
        info!(keys = keys.len(), "Starting full scan");

        let handles: Vec<_> = keys.iter().map(|k| self.spawn_refresh(*k, None)).collect();
        let results: Vec<_> = keys
            .into_iter()
            .zip(join_all(handles).await)
            .map(|(k, joined)| (k, join_result(k, joined)))
            .collect();

        let mut held = 0;
        let mut failed = 0;
        for (key, result) in &results {
            match result {
                Ok(report) => held += report.entry.records.len(),
                Err(e) => {
                    failed += 1;
                    warn!(key = %key, error = %e, "Scan failed");
                }
            }
        }
        info!(held, failed, "Full scan complete");

        results
    }
}
