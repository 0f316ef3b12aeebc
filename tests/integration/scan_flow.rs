//! Ranking refresh through the real indicator and scoring pipeline.

use std::sync::Arc;

use trendscout::analysis::Scorer;
use trendscout::engine::ScanOrchestrator;
use trendscout::ranking::{RankingCache, RankingPolicy, TechnicalEvaluator};
use trendscout::storage::{CollectionStore, JsonFileStore, SqliteStore};
use trendscout::types::{Direction, Interval, Market, RankingEntry, RankingKey};

use crate::mock_market::{MockMarket, Shape};

const US_BUY: RankingKey = RankingKey {
    market: Market::UnitedStates,
    direction: Direction::Buy,
};

fn market() -> Arc<MockMarket> {
    Arc::new(MockMarket::new(
        "NASDAQ",
        &[
            ("UP1", Shape::Rising),
            ("UP2", Shape::Rising),
            ("FLAT", Shape::Flat),
            ("DOWN", Shape::Falling),
            ("SHORT", Shape::Short),
            ("ERR", Shape::Broken),
        ],
    ))
}

fn evaluator(market: &Arc<MockMarket>) -> TechnicalEvaluator {
    TechnicalEvaluator::new(market.clone(), Scorer::default(), Interval::OneHour, 250)
}

fn policy(capacity: usize) -> RankingPolicy {
    RankingPolicy {
        min_score: 3,
        capacity,
        universe_limit: 100,
    }
}

fn symbols(entry: &RankingEntry) -> Vec<&str> {
    entry.records.iter().map(|r| r.instrument.symbol.as_str()).collect()
}

#[tokio::test]
async fn test_refresh_ranks_trending_instruments() {
    let market = market();
    let eval = evaluator(&market);
    let cache = RankingCache::new();

    let buy = cache
        .refresh(US_BUY, market.as_ref(), &eval, &policy(5), None)
        .await
        .unwrap();
    assert_eq!(symbols(&buy.entry), vec!["UP1", "UP2"]);
    assert_eq!(buy.evaluated, 6);
    assert_eq!(buy.failures, 1);
    assert_eq!(buy.insufficient, 1);
    let top = &buy.entry.records[0];
    assert_eq!(top.score, 3);
    assert_eq!(top.market, Market::UnitedStates);
    assert_eq!(top.reasons[0], "EMA 9>21>200 aligned (strong uptrend)");

    let sell_key = RankingKey::new(Market::UnitedStates, Direction::Sell);
    let sell = cache
        .refresh(sell_key, market.as_ref(), &eval, &policy(5), None)
        .await
        .unwrap();
    assert_eq!(symbols(&sell.entry), vec!["DOWN"]);
    assert_eq!(sell.entry.records[0].reasons[0], "EMA 9<21<200 aligned (strong downtrend)");
}

#[tokio::test]
async fn test_full_entry_skips_universe_and_backfill() {
    let market = market();
    let eval = evaluator(&market);
    let cache = RankingCache::new();

    cache
        .refresh(US_BUY, market.as_ref(), &eval, &policy(2), None)
        .await
        .unwrap();
    assert_eq!(market.fetches(), 2);
    assert_eq!(market.queries(), 1);

    let report = cache
        .refresh(US_BUY, market.as_ref(), &eval, &policy(2), None)
        .await
        .unwrap();
    assert_eq!(report.retained, 2);
    assert_eq!(report.evaluated, 0);
    assert_eq!(market.fetches(), 4);
    assert_eq!(market.queries(), 1);
}

#[tokio::test]
async fn test_decayed_record_is_dropped() {
    let market = market();
    let eval = evaluator(&market);
    let cache = RankingCache::new();

    cache
        .refresh(US_BUY, market.as_ref(), &eval, &policy(2), None)
        .await
        .unwrap();
    market.set_shape("UP1", Shape::Falling);

    let report = cache
        .refresh(US_BUY, market.as_ref(), &eval, &policy(2), None)
        .await
        .unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(symbols(&report.entry), vec!["UP2"]);
}

#[tokio::test]
async fn test_universe_outage_keeps_revalidated_records() {
    let market = market();
    let eval = evaluator(&market);
    let cache = RankingCache::new();

    cache
        .refresh(US_BUY, market.as_ref(), &eval, &policy(5), None)
        .await
        .unwrap();
    market.fail_universe("scanner returned 503");

    let report = cache
        .refresh(US_BUY, market.as_ref(), &eval, &policy(5), None)
        .await
        .unwrap();
    assert!(report.universe_unavailable);
    assert_eq!(symbols(&report.entry), vec!["UP1", "UP2"]);
}

#[tokio::test]
async fn test_snapshot_survives_restart_json() {
    let market = market();
    let cache = RankingCache::new();
    cache
        .refresh(US_BUY, market.as_ref(), &evaluator(&market), &policy(5), None)
        .await
        .unwrap();

    let mut path = std::env::temp_dir();
    path.push(format!("trendscout_it_{}", uuid::Uuid::new_v4()));
    path.push("rankings.json");
    let store = JsonFileStore::<RankingEntry>::new(&path);
    store.save_all(&cache.snapshot()).await.unwrap();

    let restored = RankingCache::new();
    restored.restore(store.load_all().await.unwrap(), &policy(5));
    assert_eq!(*restored.entry(US_BUY), *cache.entry(US_BUY));

    store.delete().await.unwrap();
}

#[tokio::test]
async fn test_snapshot_survives_restart_sqlite() {
    let market = market();
    let cache = RankingCache::new();
    cache
        .refresh(US_BUY, market.as_ref(), &evaluator(&market), &policy(5), None)
        .await
        .unwrap();

    let store = SqliteStore::<RankingEntry>::connect("sqlite::memory:", "rankings")
        .await
        .unwrap();
    store.save_all(&cache.snapshot()).await.unwrap();

    let restored = RankingCache::new();
    assert_eq!(restored.restore(store.load_all().await.unwrap(), &policy(5)), 1);
    assert_eq!(symbols(&restored.entry(US_BUY)), vec!["UP1", "UP2"]);
}

#[tokio::test]
async fn test_orchestrated_scan_reports_progress() {
    let market = market();
    let orchestrator = ScanOrchestrator::new(
        Arc::new(RankingCache::new()),
        market.clone(),
        Arc::new(evaluator(&market)),
        policy(5),
        2,
    );

    let mut handle = orchestrator.start_scan(Market::UnitedStates, Direction::Buy);
    let mut updates = Vec::new();
    while let Some(p) = handle.progress.recv().await {
        updates.push(p.processed);
        assert_eq!(p.total, 6);
    }
    assert_eq!(updates, vec![1, 2, 3, 4, 5, 6]);

    let report = handle.wait().await.unwrap();
    assert_eq!(report.admitted, 2);

    let top = orchestrator.cache().global_top(Direction::Buy, 15);
    assert_eq!(top.len(), 2);
}
