//! Bounded top-N ranking cache per (market, direction).
//!
//! A refresh runs in two phases:
//! 1. **Revalidate** every held record with a fresh evaluation; keep the
//!    ones still at or above the qualifying score.
//! 2. **Backfill** from the candidate universe (minus retained
//!    instruments) in provider order, stopping the moment the entry is
//!    full again.
//!
//! The merged list is stably sorted by score and published atomically,
//! so readers always see either the previous or the new entry. Each key
//! is single-flight; different keys refresh independently.

pub mod evaluator;

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::providers::CandidateProvider;
use crate::types::{
    Direction, Instrument, Market, RankingEntry, RankingKey, ScoreRecord, ScoutError,
};

pub use evaluator::{Evaluator, TechnicalEvaluator};

/// Admission rules for one refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankingPolicy {
    /// Minimum score a record needs to enter or stay in an entry.
    pub min_score: i32,
    /// Maximum records per entry (N).
    pub capacity: usize,
    /// How many candidates to request from the universe provider.
    pub universe_limit: usize,
}

impl RankingPolicy {
    fn validate(&self) -> Result<(), ScoutError> {
        if self.capacity == 0 {
            return Err(ScoutError::Validation("ranking capacity must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for RankingPolicy {
    fn default() -> Self {
        Self {
            min_score: 4,
            capacity: 5,
            universe_limit: 300,
        }
    }
}

/// Backfill progress, sent after every candidate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub key: RankingKey,
    pub processed: usize,
    pub total: usize,
}

/// Outcome of one refresh.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub entry: RankingEntry,
    /// Held records re-evaluated in the revalidate phase.
    pub revalidated: usize,
    /// Held records that still qualify.
    pub retained: usize,
    /// Held records that no longer qualify or failed to evaluate.
    pub dropped: usize,
    /// Candidates evaluated in the backfill phase.
    pub evaluated: usize,
    /// Candidates admitted in the backfill phase.
    pub admitted: usize,
    /// Evaluations that failed on transport.
    pub failures: usize,
    /// Evaluations skipped for too-short bar series.
    pub insufficient: usize,
    /// The universe provider failed and backfill saw no candidates.
    pub universe_unavailable: bool,
}

impl RefreshReport {
    fn new(key: RankingKey) -> Self {
        Self {
            entry: RankingEntry::empty(key),
            revalidated: 0,
            retained: 0,
            dropped: 0,
            evaluated: 0,
            admitted: 0,
            failures: 0,
            insufficient: 0,
            universe_unavailable: false,
        }
    }

    fn record_error(&mut self, key: RankingKey, instrument: &Instrument, err: &ScoutError) {
        match err {
            ScoutError::InsufficientData { .. } => {
                self.insufficient += 1;
                debug!(key = %key, %instrument, error = %err, "Candidate skipped");
            }
            _ => {
                self.failures += 1;
                warn!(key = %key, %instrument, error = %err, "Candidate evaluation failed");
            }
        }
    }
}

struct Shard {
    flight: Mutex<()>,
    published: RwLock<Arc<RankingEntry>>,
}

impl Shard {
    fn new(key: RankingKey) -> Self {
        Self {
            flight: Mutex::new(()),
            published: RwLock::new(Arc::new(RankingEntry::empty(key))),
        }
    }

    fn current(&self) -> Arc<RankingEntry> {
        match self.published.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn publish(&self, entry: Arc<RankingEntry>) {
        match self.published.write() {
            Ok(mut guard) => *guard = entry,
            Err(poisoned) => *poisoned.into_inner() = entry,
        }
    }
}

/// Stable sort by score descending, then enforce the bound and the
/// qualifying score. Equal scores keep their incoming order.
fn rank(records: &mut Vec<ScoreRecord>, policy: &RankingPolicy) {
    records.retain(|r| r.score >= policy.min_score);
    records.sort_by(|a, b| b.score.cmp(&a.score));
    records.truncate(policy.capacity);
}

/// Sharded store of ranking entries, one shard per key.
pub struct RankingCache {
    // every key is inserted in `new`, so lookups never miss
    shards: HashMap<RankingKey, Shard>,
}

impl Default for RankingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RankingCache {
    pub fn new() -> Self {
        Self {
            shards: RankingKey::all()
                .into_iter()
                .map(|k| (k, Shard::new(k)))
                .collect(),
        }
    }

    fn shard(&self, key: RankingKey) -> &Shard {
        &self.shards[&key]
    }

    /// Currently published entry; empty if the key was never refreshed.
    pub fn entry(&self, key: RankingKey) -> Arc<RankingEntry> {
        self.shard(key).current()
    }

    /// Refresh one key: revalidate, backfill, publish.
    pub async fn refresh(
        &self,
        key: RankingKey,
        universe: &dyn CandidateProvider,
        evaluator: &dyn Evaluator,
        policy: &RankingPolicy,
        progress: Option<&UnboundedSender<ScanProgress>>,
    ) -> Result<RefreshReport, ScoutError> {
        policy.validate()?;

        let shard = self.shard(key);
        let _flight = shard.flight.lock().await;
        let held = shard.current();
        let mut report = RefreshReport::new(key);

        // -- Phase A: revalidate held records --------------------------------
        let mut retained: Vec<ScoreRecord> = Vec::with_capacity(policy.capacity);
        for record in &held.records {
            report.revalidated += 1;
            match evaluator.evaluate(&record.instrument, key).await {
                Ok(fresh) if fresh.score >= policy.min_score => retained.push(fresh),
                Ok(fresh) => {
                    debug!(
                        key = %key,
                        instrument = %fresh.instrument,
                        score = fresh.score,
                        "Held record no longer qualifies"
                    );
                    report.dropped += 1;
                }
                Err(e) => {
                    report.record_error(key, &record.instrument, &e);
                    report.dropped += 1;
                }
            }
        }
        report.retained = retained.len();

        // -- Phase B: backfill open slots ------------------------------------
        let mut admitted: Vec<ScoreRecord> = Vec::new();
        if retained.len() < policy.capacity {
            let raw = match universe.query(key.market, policy.universe_limit).await {
                Ok(list) => list,
                Err(e) => {
                    warn!(key = %key, error = %e, "Candidate universe unavailable");
                    report.universe_unavailable = true;
                    Vec::new()
                }
            };

            let held_set: HashSet<&Instrument> = retained.iter().map(|r| &r.instrument).collect();
            let mut seen: HashSet<Instrument> = HashSet::new();
            let candidates: Vec<Instrument> = raw
                .into_iter()
                .filter(|i| !held_set.contains(i) && seen.insert(i.clone()))
                .collect();
            let total = candidates.len();

            for (idx, instrument) in candidates.iter().enumerate() {
                if retained.len() + admitted.len() >= policy.capacity {
                    break;
                }
                report.evaluated += 1;
                match evaluator.evaluate(instrument, key).await {
                    Ok(record) if record.score >= policy.min_score => admitted.push(record),
                    Ok(_) => {}
                    Err(e) => report.record_error(key, instrument, &e),
                }
                if let Some(tx) = progress {
                    // a dropped receiver only means nobody is watching
                    let _ = tx.send(ScanProgress {
                        key,
                        processed: idx + 1,
                        total,
                    });
                }
            }
        }
        report.admitted = admitted.len();

        // -- Finalize ---------------------------------------------------------
        let mut records = retained;
        records.extend(admitted);
        rank(&mut records, policy);

        let entry = RankingEntry {
            market: key.market,
            direction: key.direction,
            records,
            refreshed_at: Some(Utc::now()),
        };
        shard.publish(Arc::new(entry.clone()));

        info!(
            key = %key,
            held = entry.records.len(),
            retained = report.retained,
            dropped = report.dropped,
            evaluated = report.evaluated,
            admitted = report.admitted,
            failures = report.failures,
            "Ranking refreshed"
        );

        report.entry = entry;
        Ok(report)
    }

    /// Best records for `direction` across every market.
    pub fn global_top(&self, direction: Direction, limit: usize) -> Vec<ScoreRecord> {
        let mut all: Vec<ScoreRecord> = Market::ALL
            .iter()
            .flat_map(|m| self.entry(RankingKey::new(*m, direction)).records.clone())
            .collect();
        all.sort_by(|a, b| b.score.cmp(&a.score));
        all.truncate(limit);
        all
    }

    /// Every entry that has been refreshed at least once, in key order.
    pub fn snapshot(&self) -> Vec<RankingEntry> {
        RankingKey::all()
            .into_iter()
            .map(|k| self.entry(k))
            .filter(|e| e.refreshed_at.is_some())
            .map(|e| (*e).clone())
            .collect()
    }

    /// Load previously snapshotted entries, re-applying ordering, bound
    /// and qualifying score. Returns how many entries were restored.
    pub fn restore(&self, entries: Vec<RankingEntry>, policy: &RankingPolicy) -> usize {
        let mut restored = 0;
        for mut entry in entries {
            rank(&mut entry.records, policy);
            self.shard(entry.key()).publish(Arc::new(entry));
            restored += 1;
        }
        info!(restored, "Ranking cache restored");
        restored
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::providers::MockCandidateProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Evaluator with per-symbol scripted outcomes. Unknown symbols score 0.
    #[derive(Default)]
    pub(crate) struct ScriptedEvaluator {
        outcomes: StdMutex<HashMap<String, Result<i32, ScoutError>>>,
        calls: AtomicUsize,
        active: AtomicUsize,
        pub max_active: AtomicUsize,
    }

    impl ScriptedEvaluator {
        pub(crate) fn with_scores(scores: &[(&str, i32)]) -> Self {
            let eval = Self::default();
            for (sym, score) in scores {
                eval.set(sym, *score);
            }
            eval
        }

        pub(crate) fn set(&self, symbol: &str, score: i32) {
            self.outcomes.lock().unwrap().insert(symbol.to_string(), Ok(score));
        }

        pub(crate) fn fail(&self, symbol: &str, err: ScoutError) {
            self.outcomes.lock().unwrap().insert(symbol.to_string(), Err(err));
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Evaluator for ScriptedEvaluator {
        async fn evaluate(
            &self,
            instrument: &Instrument,
            key: RankingKey,
        ) -> Result<ScoreRecord, ScoutError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .get(&instrument.symbol)
                .cloned()
                .unwrap_or(Ok(0));
            outcome.map(|score| ScoreRecord {
                instrument: instrument.clone(),
                price: 1.0,
                score,
                reasons: vec![format!("scripted {score}")],
                market: key.market,
            })
        }
    }

    pub(crate) fn instruments(symbols: &[&str]) -> Vec<Instrument> {
        symbols.iter().map(|s| Instrument::new(s, "NASDAQ")).collect()
    }

    fn universe(symbols: &'static [&'static str]) -> MockCandidateProvider {
        let mut u = MockCandidateProvider::new();
        u.expect_query().returning(move |_, _| Ok(instruments(symbols)));
        u
    }

    fn symbols(entry: &RankingEntry) -> Vec<String> {
        entry.records.iter().map(|r| r.instrument.symbol.clone()).collect()
    }

    fn scores(entry: &RankingEntry) -> Vec<i32> {
        entry.records.iter().map(|r| r.score).collect()
    }

    const KEY: RankingKey = RankingKey {
        market: Market::UnitedStates,
        direction: Direction::Buy,
    };

    const TEN: &[&str] = &["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"];

    fn ten_scored() -> ScriptedEvaluator {
        ScriptedEvaluator::with_scores(&[
            ("A", 9),
            ("B", 8),
            ("C", 7),
            ("D", 6),
            ("E", 5),
            ("F", 4),
            ("G", 4),
            ("H", 3),
            ("I", 2),
            ("J", 1),
        ])
    }

    #[tokio::test]
    async fn test_admission_stops_at_capacity() {
        let cache = RankingCache::new();
        let eval = ten_scored();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let report = cache
            .refresh(KEY, &universe(TEN), &eval, &RankingPolicy::default(), Some(&tx))
            .await
            .unwrap();

        assert_eq!(scores(&report.entry), vec![9, 8, 7, 6, 5]);
        assert_eq!(symbols(&report.entry), vec!["A", "B", "C", "D", "E"]);
        assert_eq!(report.evaluated, 5);
        assert_eq!(report.admitted, 5);
        assert_eq!(eval.calls(), 5);

        drop(tx);
        let mut seen = Vec::new();
        while let Some(p) = rx.recv().await {
            seen.push((p.processed, p.total));
        }
        assert_eq!(seen, vec![(1, 10), (2, 10), (3, 10), (4, 10), (5, 10)]);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let cache = RankingCache::new();
        let eval = ten_scored();
        let u = universe(TEN);
        let policy = RankingPolicy::default();

        let first = cache.refresh(KEY, &u, &eval, &policy, None).await.unwrap();
        let second = cache.refresh(KEY, &u, &eval, &policy, None).await.unwrap();
        assert_eq!(symbols(&first.entry), symbols(&second.entry));
        assert_eq!(scores(&first.entry), scores(&second.entry));
    }

    #[tokio::test]
    async fn test_full_revalidation_skips_backfill() {
        let cache = RankingCache::new();
        let eval = ten_scored();
        let mut u = MockCandidateProvider::new();
        u.expect_query().times(1).returning(|_, _| Ok(instruments(TEN)));
        let policy = RankingPolicy::default();

        cache.refresh(KEY, &u, &eval, &policy, None).await.unwrap();
        let before = eval.calls();

        let report = cache.refresh(KEY, &u, &eval, &policy, None).await.unwrap();
        assert_eq!(report.revalidated, 5);
        assert_eq!(report.retained, 5);
        assert_eq!(report.evaluated, 0);
        assert_eq!(eval.calls() - before, 5);
    }

    #[tokio::test]
    async fn test_dropped_record_is_backfilled() {
        let cache = RankingCache::new();
        let eval = ten_scored();
        let u = universe(TEN);
        let policy = RankingPolicy::default();

        cache.refresh(KEY, &u, &eval, &policy, None).await.unwrap();
        eval.set("C", 2);

        let report = cache.refresh(KEY, &u, &eval, &policy, None).await.unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(report.retained, 4);
        // C is re-evaluated and rejected, then F fills the slot
        assert_eq!(symbols(&report.entry), vec!["A", "B", "D", "E", "F"]);
        assert_eq!(report.evaluated, 2);
    }

    #[tokio::test]
    async fn test_ties_keep_first_encountered_order() {
        let cache = RankingCache::new();
        let eval = ScriptedEvaluator::with_scores(&[("P", 5), ("Q", 7), ("R", 5), ("S", 5)]);
        let policy = RankingPolicy {
            capacity: 3,
            ..RankingPolicy::default()
        };

        let report = cache
            .refresh(KEY, &universe(&["P", "Q", "R", "S"]), &eval, &policy, None)
            .await
            .unwrap();
        assert_eq!(symbols(&report.entry), vec!["Q", "P", "R"]);
    }

    #[tokio::test]
    async fn test_failed_candidates_are_skipped() {
        let cache = RankingCache::new();
        let eval = ten_scored();
        eval.fail(
            "A",
            ScoutError::TransientFetch {
                target: "NASDAQ:A".into(),
                message: "timeout".into(),
            },
        );
        eval.fail(
            "B",
            ScoutError::InsufficientData {
                instrument: "NASDAQ:B".into(),
                have: 12,
                need: 200,
            },
        );

        let report = cache
            .refresh(KEY, &universe(TEN), &eval, &RankingPolicy::default(), None)
            .await
            .unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(report.insufficient, 1);
        assert_eq!(symbols(&report.entry), vec!["C", "D", "E", "F", "G"]);
    }

    #[tokio::test]
    async fn test_universe_failure_is_reported() {
        let cache = RankingCache::new();
        let eval = ten_scored();
        let mut u = MockCandidateProvider::new();
        u.expect_query()
            .returning(|_, _| Err(anyhow::anyhow!("scanner 503")));

        let report = cache
            .refresh(KEY, &u, &eval, &RankingPolicy::default(), None)
            .await
            .unwrap();
        assert!(report.universe_unavailable);
        assert!(report.entry.is_empty());
        assert!(report.entry.refreshed_at.is_some());
        assert_eq!(eval.calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_is_single_flight_per_key() {
        let cache = RankingCache::new();
        let eval = ten_scored();
        let u = universe(TEN);
        let policy = RankingPolicy::default();

        let (a, b) = tokio::join!(
            cache.refresh(KEY, &u, &eval, &policy, None),
            cache.refresh(KEY, &u, &eval, &policy, None),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(eval.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(symbols(&cache.entry(KEY)), vec!["A", "B", "C", "D", "E"]);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_rejected() {
        let cache = RankingCache::new();
        let policy = RankingPolicy {
            capacity: 0,
            ..RankingPolicy::default()
        };
        let err = cache
            .refresh(KEY, &MockCandidateProvider::new(), &ten_scored(), &policy, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScoutError::Validation(_)));
    }

    #[test]
    fn test_unrefreshed_entry_is_empty() {
        let cache = RankingCache::new();
        let entry = cache.entry(KEY);
        assert!(entry.is_empty());
        assert!(entry.refreshed_at.is_none());
        assert!(cache.snapshot().is_empty());
    }

    fn record(sym: &str, market: Market, score: i32) -> ScoreRecord {
        ScoreRecord {
            instrument: Instrument::new(sym, "X"),
            price: 1.0,
            score,
            reasons: vec![],
            market,
        }
    }

    #[test]
    fn test_restore_reapplies_invariants() {
        let cache = RankingCache::new();
        let mut entry = RankingEntry::empty(KEY);
        entry.refreshed_at = Some(Utc::now());
        entry.records = vec![
            record("LOW", Market::UnitedStates, 2),
            record("M1", Market::UnitedStates, 6),
            record("M2", Market::UnitedStates, 9),
            record("M3", Market::UnitedStates, 5),
            record("M4", Market::UnitedStates, 7),
        ];
        let policy = RankingPolicy {
            capacity: 3,
            ..RankingPolicy::default()
        };

        assert_eq!(cache.restore(vec![entry], &policy), 1);
        assert_eq!(scores(&cache.entry(KEY)), vec![9, 7, 6]);

        let snap = cache.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].key(), KEY);
    }

    #[test]
    fn test_global_top_merges_markets() {
        let cache = RankingCache::new();
        let now = Some(Utc::now());
        let entries = vec![
            RankingEntry {
                market: Market::Thailand,
                direction: Direction::Buy,
                records: vec![record("PTT", Market::Thailand, 6), record("AOT", Market::Thailand, 5)],
                refreshed_at: now,
            },
            RankingEntry {
                market: Market::Crypto,
                direction: Direction::Buy,
                records: vec![record("BTCUSDT", Market::Crypto, 8), record("ETHUSDT", Market::Crypto, 5)],
                refreshed_at: now,
            },
            RankingEntry {
                market: Market::Crypto,
                direction: Direction::Sell,
                records: vec![record("DOGEUSDT", Market::Crypto, 9)],
                refreshed_at: now,
            },
        ];
        cache.restore(entries, &RankingPolicy::default());

        let top: Vec<String> = cache
            .global_top(Direction::Buy, 3)
            .into_iter()
            .map(|r| r.instrument.symbol)
            .collect();
        assert_eq!(top, vec!["BTCUSDT", "PTT", "AOT"]);
    }
}
