//! Alert watcher against a persisted store and a recording sink.

use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use trendscout::engine::AlertWatcher;
use trendscout::storage::{CollectionStore, JsonFileStore};
use trendscout::types::Alert;

use crate::mock_market::{MockMarket, RecordingSink};

fn temp_store() -> (PathBuf, Arc<JsonFileStore<Alert>>) {
    let mut path = std::env::temp_dir();
    path.push(format!("trendscout_it_{}", uuid::Uuid::new_v4()));
    path.push("alerts.json");
    (path.clone(), Arc::new(JsonFileStore::new(path)))
}

#[tokio::test]
async fn test_alert_fires_once_and_is_gone_after_restart() {
    let (_, store) = temp_store();
    store
        .save_all(&[Alert::new(42, "BTCUSDT", "BINANCE", "above", dec!(50000)).unwrap()])
        .await
        .unwrap();

    let market = Arc::new(MockMarket::new("BINANCE", &[]));
    let sink = Arc::new(RecordingSink::default());
    let mut watcher = AlertWatcher::new(store.clone(), market.clone(), sink.clone(), Duration::from_secs(120));
    watcher.load().await.unwrap();

    market.set_spot("BTCUSDT", 49000.0);
    assert_eq!(watcher.tick().await.fired, 0);
    assert!(sink.messages().is_empty());

    market.set_spot("BTCUSDT", 50500.0);
    let report = watcher.tick().await;
    assert_eq!(report.fired, 1);
    assert!(report.persisted);

    market.set_spot("BTCUSDT", 51000.0);
    assert_eq!(watcher.tick().await.fired, 0);

    let sent = sink.messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 42);
    assert!(sent[0].1.contains("BTCUSDT"));
    assert!(sent[0].1.contains("+1.00%"));

    // a fresh watcher over the same file sees nothing left to fire
    let mut restarted = AlertWatcher::new(store.clone(), market, sink.clone(), Duration::from_secs(120));
    assert_eq!(restarted.load().await.unwrap(), 0);
    assert_eq!(restarted.tick().await.evaluated, 0);

    store.delete().await.unwrap();
}

#[tokio::test]
async fn test_background_watcher_fires_added_alert() {
    let (path, store) = temp_store();
    let market = Arc::new(MockMarket::new("SET", &[]));
    market.set_spot("PTT", 36.0);
    let sink = Arc::new(RecordingSink::default());

    let watcher = AlertWatcher::new(store.clone(), market.clone(), sink.clone(), Duration::from_millis(20));
    let (handle, task) = watcher.spawn();

    let alert = handle.add(9, "ptt", "set", "below", dec!(35)).await.unwrap();
    assert_eq!(handle.list(Some(9)).await.unwrap(), vec![alert]);
    assert!(path.exists());

    market.set_spot("PTT", 34.5);
    let mut fired = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if !sink.messages().is_empty() {
            fired = true;
            break;
        }
    }
    assert!(fired, "alert did not fire");
    assert!(sink.messages()[0].1.contains("BREAKDOWN"));
    assert!(handle.list(None).await.unwrap().is_empty());
    assert!(store.load_all().await.unwrap().is_empty());

    drop(handle);
    task.await.unwrap();
    store.delete().await.unwrap();
}
