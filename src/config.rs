//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (bot tokens) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use crate::analysis::indicators::LONGEST_WINDOW;
use crate::analysis::{IndicatorParams, Scorer};
use crate::ranking::RankingPolicy;
use crate::types::{Interval, Market, ScoutError};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub markets: MarketsConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Period of the every-market heavy scan.
    pub scan_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    pub interval: Interval,
    /// Bars requested per instrument.
    pub bar_count: usize,
    pub max_concurrent_scans: usize,
    /// Pause before each bar request.
    pub request_delay_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval: Interval::OneHour,
            bar_count: 250,
            max_concurrent_scans: 4,
            request_delay_ms: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RankingConfig {
    pub min_score: i32,
    pub capacity: usize,
    pub global_top: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            min_score: 4,
            capacity: 5,
            global_top: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScoringConfig {
    pub warmup_bars: usize,
    pub volume_multiple: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            warmup_bars: 200,
            volume_multiple: crate::analysis::scorer::DEFAULT_VOLUME_MULTIPLE,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketsConfig {
    pub universe_limit: usize,
    /// Per-market overrides keyed by tag (`TH`, `CN`, `HK`, `US`, `CRYPTO`).
    pub universe_limits: HashMap<Market, usize>,
}

impl Default for MarketsConfig {
    fn default() -> Self {
        Self {
            universe_limit: 300,
            universe_limits: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertsConfig {
    pub poll_interval_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Json,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for JSON collections.
    pub data_dir: String,
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Json,
            data_dir: "data".into(),
            database_url: "sqlite://data/trendscout.db".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NotificationsConfig {
    pub telegram_bot_token_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ScoutError> {
        let fail = |msg: String| Err(ScoutError::Config(msg));

        if self.ranking.capacity == 0 {
            return fail("ranking.capacity must be > 0".into());
        }
        if self.agent.scan_interval_secs == 0 {
            return fail("agent.scan_interval_secs must be > 0".into());
        }
        if self.alerts.poll_interval_secs == 0 {
            return fail("alerts.poll_interval_secs must be > 0".into());
        }
        if self.scanner.max_concurrent_scans == 0 {
            return fail("scanner.max_concurrent_scans must be > 0".into());
        }
        if self.scoring.warmup_bars <= LONGEST_WINDOW {
            return fail(format!(
                "scoring.warmup_bars must exceed the longest indicator window ({LONGEST_WINDOW})"
            ));
        }
        if self.scanner.bar_count < self.scoring.warmup_bars {
            return fail(format!(
                "scanner.bar_count ({}) is below scoring.warmup_bars ({})",
                self.scanner.bar_count, self.scoring.warmup_bars
            ));
        }
        Ok(())
    }

    pub fn ranking_policy(&self) -> RankingPolicy {
        RankingPolicy {
            min_score: self.ranking.min_score,
            capacity: self.ranking.capacity,
            universe_limit: self.markets.universe_limit,
        }
    }

    pub fn scorer(&self) -> Scorer {
        Scorer::new(
            IndicatorParams {
                warmup_bars: self.scoring.warmup_bars,
            },
            self.scoring.volume_multiple,
        )
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.agent.scan_interval_secs)
    }

    pub fn alert_poll_interval(&self) -> Duration {
        Duration::from_secs(self.alerts.poll_interval_secs)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
