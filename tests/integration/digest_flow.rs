//! Top digest over a real scan and a persisted subscriber file.

use std::sync::Arc;

use trendscout::analysis::Scorer;
use trendscout::engine::TopDigest;
use trendscout::ranking::{RankingCache, RankingPolicy, TechnicalEvaluator};
use trendscout::storage::JsonFileStore;
use trendscout::types::{Direction, Interval, Market, RankingKey};

use crate::mock_market::{MockMarket, RecordingSink, Shape};

#[tokio::test]
async fn test_digest_reaches_subscribers_after_restart() {
    let market = Arc::new(MockMarket::new(
        "NASDAQ",
        &[("UP1", Shape::Rising), ("DOWN", Shape::Falling)],
    ));
    let eval = TechnicalEvaluator::new(market.clone(), Scorer::default(), Interval::OneHour, 250);
    let policy = RankingPolicy {
        min_score: 3,
        capacity: 5,
        universe_limit: 100,
    };
    let cache = Arc::new(RankingCache::new());
    for direction in [Direction::Buy, Direction::Sell] {
        cache
            .refresh(
                RankingKey::new(Market::UnitedStates, direction),
                market.as_ref(),
                &eval,
                &policy,
                None,
            )
            .await
            .unwrap();
    }

    let mut path = std::env::temp_dir();
    path.push(format!("trendscout_it_{}", uuid::Uuid::new_v4()));
    path.push("digest_subscribers.json");
    let store = Arc::new(JsonFileStore::<i64>::new(&path));
    let sink = Arc::new(RecordingSink::default());

    let digest = TopDigest::new(cache.clone(), store.clone(), sink.clone(), 15);
    assert!(digest.subscribe(7).await.unwrap());
    assert!(digest.subscribe(8).await.unwrap());

    // subscriptions survive a restart
    let restarted = TopDigest::new(cache, store.clone(), sink.clone(), 15);
    assert_eq!(restarted.subscribers().await.unwrap(), vec![7, 8]);

    let report = restarted.broadcast().await.unwrap();
    assert_eq!(report.delivered, 2);

    let sent = sink.messages();
    assert_eq!(sent.iter().map(|(chat, _)| *chat).collect::<Vec<_>>(), vec![7, 8]);
    assert!(sent[0].1.starts_with("*DAILY GLOBAL MARKET*"));
    assert!(sent[0].1.contains("1. `UP1` (US)"));
    assert!(sent[0].1.contains("*GLOBAL TOP SELL*\n1. `DOWN` (US)"));

    store.delete().await.unwrap();
}
