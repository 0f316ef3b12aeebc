//! TRENDSCOUT: multi-market technical opportunity scanner
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the ranking cache from storage, starts the alert watcher and
//! dashboard, and runs the periodic every-market scan with graceful
//! shutdown.

use anyhow::Result;
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use trendscout::config::{self, StorageBackend};
use trendscout::dashboard::{self, DashboardState};
use trendscout::engine::{AlertWatcher, ScanOrchestrator, TopDigest};
use trendscout::providers::binance::BinanceClient;
use trendscout::providers::telegram::{LogSink, TelegramSink};
use trendscout::providers::tradingview::TradingViewScanner;
use trendscout::providers::yahoo::YahooChartClient;
use trendscout::providers::{MarketUniverse, NotificationSink, VenueRouter};
use trendscout::ranking::{RankingCache, TechnicalEvaluator};
use trendscout::storage::{CollectionStore, JsonFileStore, SqliteStore};
use trendscout::types::{Alert, RankingEntry};

const BANNER: &str = r#"
 _____ ____  _____ _   _ ____  ____   ____ ___  _   _ _____
|_   _|  _ \| ____| \ | |  _ \/ ___| / ___/ _ \| | | |_   _|
  | | | |_) |  _| |  \| | | | \___ \| |  | | | | | | | | |
  | | |  _ <| |___| |\  | |_| |___) | |__| |_| | |_| | | |
  |_| |_| \_\_____|_| \_|____/|____/ \____\___/ \___/  |_|

  Multi-market technical opportunity scanner
  v0.1.0
"#;

type AlertStore = Arc<dyn CollectionStore<Alert>>;
type RankingStore = Arc<dyn CollectionStore<RankingEntry>>;
type SubscriberStore = Arc<dyn CollectionStore<i64>>;

struct Stores {
    alerts: AlertStore,
    rankings: RankingStore,
    subscribers: SubscriberStore,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        scan_interval_secs = cfg.agent.scan_interval_secs,
        interval = %cfg.scanner.interval,
        min_score = cfg.ranking.min_score,
        capacity = cfg.ranking.capacity,
        "TRENDSCOUT starting up"
    );

    // -- Storage ---------------------------------------------------------

    let Stores {
        alerts: alert_store,
        rankings: ranking_store,
        subscribers: subscriber_store,
    } = open_stores(&cfg.storage).await?;

    // -- Providers -------------------------------------------------------

    let binance = Arc::new(BinanceClient::new()?);
    let universe = Arc::new(MarketUniverse::new(
        Arc::new(TradingViewScanner::new()?),
        binance.clone(),
    ));
    let bars = Arc::new(VenueRouter::new(Arc::new(YahooChartClient::new()?), binance));
    let sink = notification_sink(&cfg.notifications)?;

    // -- Ranking ---------------------------------------------------------

    let policy = cfg.ranking_policy();
    let cache = Arc::new(RankingCache::new());
    match ranking_store.load_all().await {
        Ok(entries) if !entries.is_empty() => {
            cache.restore(entries, &policy);
        }
        Ok(_) => info!("No saved rankings, starting cold"),
        Err(e) => warn!(error = %e, "Failed to load saved rankings, starting cold"),
    }

    let evaluator = Arc::new(
        TechnicalEvaluator::new(
            bars.clone(),
            cfg.scorer(),
            cfg.scanner.interval,
            cfg.scanner.bar_count,
        )
        .with_pacing(std::time::Duration::from_millis(cfg.scanner.request_delay_ms)),
    );
    let orchestrator = ScanOrchestrator::new(
        cache.clone(),
        universe,
        evaluator.clone(),
        policy,
        cfg.scanner.max_concurrent_scans,
    )
    .with_universe_limits(cfg.markets.universe_limits.clone());

    // -- Alerts & dashboard ----------------------------------------------

    let watcher = AlertWatcher::new(alert_store, bars, sink.clone(), cfg.alert_poll_interval());
    let (alerts, watcher_task) = watcher.spawn();
    let digest = Arc::new(TopDigest::new(
        cache.clone(),
        subscriber_store,
        sink,
        cfg.ranking.global_top,
    ));

    let state = Arc::new(DashboardState::new(
        orchestrator.clone(),
        evaluator,
        alerts.clone(),
        digest,
        cfg.ranking.global_top,
    ));
    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(state.clone(), cfg.dashboard.port).await?;
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(cfg.scan_interval());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.agent.scan_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_full_scan(&orchestrator, &state, &ranking_store).await;
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    if let Err(e) = ranking_store.save_all(&cache.snapshot()).await {
        error!(error = %e, "Failed to save rankings on shutdown");
    }
    // let a running alert tick finish so fired alerts are persisted as removed
    match alerts.shutdown().await {
        Ok(()) => {
            if let Err(e) = watcher_task.await {
                error!(error = %e, "Alert watcher task failed");
            }
        }
        Err(e) => warn!(error = %e, "Alert watcher already stopped"),
    }
    info!("TRENDSCOUT shut down cleanly.");

    Ok(())
}

/// Refresh every market and direction, then persist the warm cache.
async fn run_full_scan(
    orchestrator: &ScanOrchestrator,
    state: &DashboardState,
    ranking_store: &RankingStore,
) {
    let results = orchestrator.scan_all().await;
    for (key, result) in &results {
        state.record_scan(*key, result).await;
    }

    let snapshot = orchestrator.cache().snapshot();
    match ranking_store.save_all(&snapshot).await {
        Ok(()) => info!(entries = snapshot.len(), "Rankings saved"),
        Err(e) => error!(error = %e, "Failed to save rankings"),
    }
}

async fn open_stores(cfg: &config::StorageConfig) -> Result<Stores> {
    match cfg.backend {
        StorageBackend::Json => {
            let dir = PathBuf::from(&cfg.data_dir);
            info!(dir = %dir.display(), "Using JSON file storage");
            let alerts: AlertStore = Arc::new(JsonFileStore::<Alert>::new(dir.join("alerts.json")));
            let rankings: RankingStore = Arc::new(JsonFileStore::<RankingEntry>::new(dir.join("rankings.json")));
            let subscribers: SubscriberStore =
                Arc::new(JsonFileStore::<i64>::new(dir.join("digest_subscribers.json")));
            Ok(Stores {
                alerts,
                rankings,
                subscribers,
            })
        }
        StorageBackend::Sqlite => {
            info!(url = %cfg.database_url, "Using SQLite storage");
            let alerts = SqliteStore::<Alert>::connect(&cfg.database_url, "alerts").await?;
            let pool = alerts.pool().clone();
            let rankings = SqliteStore::<RankingEntry>::with_pool(pool.clone(), "rankings").await?;
            let subscribers = SqliteStore::<i64>::with_pool(pool, "digest_subscribers").await?;
            let alerts: AlertStore = Arc::new(alerts);
            let rankings: RankingStore = Arc::new(rankings);
            let subscribers: SubscriberStore = Arc::new(subscribers);
            Ok(Stores {
                alerts,
                rankings,
                subscribers,
            })
        }
    }
}

fn notification_sink(cfg: &config::NotificationsConfig) -> Result<Arc<dyn NotificationSink>> {
    let token = cfg
        .telegram_bot_token_env
        .as_deref()
        .and_then(|env| config::AppConfig::resolve_env(env).ok());

    let sink: Arc<dyn NotificationSink> = match token {
        Some(token) => {
            info!("Telegram notifications enabled");
            Arc::new(TelegramSink::new(SecretString::new(token))?)
        }
        None => {
            warn!("No Telegram bot token configured, alerts will only be logged");
            Arc::new(LogSink)
        }
    };
    Ok(sink)
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("trendscout=info"));

    let json_logging = std::env::var("TRENDSCOUT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
