//! Price alert watcher.
//!
//! The watcher task owns the alert collection outright: it loads it once,
//! mutates it in memory, and writes it back wholesale. Everyone else goes
//! through an [`AlertHandle`], whose commands are applied between ticks,
//! so there is exactly one writer and no lost updates.
//!
//! Per tick every alert is checked against the latest 1-minute close.
//! A triggered alert is notified once and removed, whether or not the
//! notification was delivered.
//!
//! Stop the task with [`AlertHandle::shutdown`], never by aborting it: a
//! tick that has already notified must be allowed to persist the removal.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::providers::{BarProvider, NotificationSink};
use crate::storage::CollectionStore;
use crate::types::{Alert, AlertDirection, Instrument, Interval, ScoutError};

/// Commands accepted by the watcher task.
#[derive(Debug)]
enum AlertCommand {
    Add {
        alert: Alert,
        reply: oneshot::Sender<Result<Alert, ScoutError>>,
    },
    Remove {
        owner: i64,
        id: String,
        reply: oneshot::Sender<Result<bool, ScoutError>>,
    },
    List {
        owner: Option<i64>,
        reply: oneshot::Sender<Vec<Alert>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Counters for one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub evaluated: usize,
    pub fired: usize,
    pub fetch_failures: usize,
    pub delivery_failures: usize,
    pub persisted: bool,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable front door to the watcher task.
#[derive(Clone)]
pub struct AlertHandle {
    tx: mpsc::Sender<AlertCommand>,
}

fn stopped() -> ScoutError {
    ScoutError::Unavailable("alert watcher is not running".into())
}

impl AlertHandle {
    /// Validate and register a new alert. Fails with `Persistence` (and
    /// registers nothing) when the store rejects the write.
    pub async fn add(
        &self,
        owner: i64,
        symbol: &str,
        venue: &str,
        direction: &str,
        threshold: Decimal,
    ) -> Result<Alert, ScoutError> {
        let alert = Alert::new(owner, symbol, venue, direction, threshold)?;
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AlertCommand::Add { alert, reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    /// Delete one of `owner`'s alerts. Returns whether anything was removed.
    pub async fn remove(&self, owner: i64, id: &str) -> Result<bool, ScoutError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AlertCommand::Remove {
                owner,
                id: id.to_string(),
                reply,
            })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    /// Active alerts, optionally for a single owner.
    pub async fn list(&self, owner: Option<i64>) -> Result<Vec<Alert>, ScoutError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AlertCommand::List { owner, reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Stop the watcher once any in-progress tick has finished and the
    /// collection has been flushed. Resolves when the task has stopped
    /// taking commands.
    pub async fn shutdown(&self) -> Result<(), ScoutError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AlertCommand::Shutdown { reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Notification text for a triggered alert.
pub fn format_alert_message(alert: &Alert, price: Decimal) -> String {
    let distance = if alert.threshold.is_zero() {
        Decimal::ZERO
    } else {
        ((price - alert.threshold) / alert.threshold * Decimal::ONE_HUNDRED).round_dp(2)
    };
    let (condition, sign) = match alert.direction {
        AlertDirection::Above => ("BREAKOUT above target", if distance >= Decimal::ZERO { "+" } else { "" }),
        AlertDirection::Below => ("BREAKDOWN below target", ""),
    };

    format!(
        "*PRICE ALERT TRIGGERED*\n\
         Asset: `{}`\n\
         Exchange: {}\n\
         Target: {:.2}\n\
         Current: *{:.2}* ({sign}{distance:.2}%)\n\
         Condition: {condition}",
        alert.instrument.symbol, alert.instrument.venue, alert.threshold, price,
    )
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

pub struct AlertWatcher {
    store: Arc<dyn CollectionStore<Alert>>,
    bars: Arc<dyn BarProvider>,
    sink: Arc<dyn NotificationSink>,
    poll_interval: Duration,
    alerts: Vec<Alert>,
    loaded: bool,
    /// In-memory set differs from the store.
    dirty: bool,
}

impl AlertWatcher {
    pub fn new(
        store: Arc<dyn CollectionStore<Alert>>,
        bars: Arc<dyn BarProvider>,
        sink: Arc<dyn NotificationSink>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            bars,
            sink,
            poll_interval,
            alerts: Vec::new(),
            loaded: false,
            dirty: false,
        }
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    /// Read the persisted collection into memory.
    pub async fn load(&mut self) -> Result<usize, ScoutError> {
        self.alerts = self.store.load_all().await?;
        self.loaded = true;
        self.dirty = false;
        info!(count = self.alerts.len(), "Alerts loaded");
        Ok(self.alerts.len())
    }

    async fn persist(&mut self) -> Result<(), ScoutError> {
        self.store.save_all(&self.alerts).await?;
        self.dirty = false;
        Ok(())
    }

    /// Apply `change` and persist it, or put everything back if the store
    /// rejects the write.
    async fn commit<R>(
        &mut self,
        change: impl FnOnce(&mut Vec<Alert>) -> R,
    ) -> Result<R, ScoutError> {
        let before = self.alerts.clone();
        let was_dirty = self.dirty;
        let out = change(&mut self.alerts);
        self.dirty = true;
        if let Err(e) = self.persist().await {
            warn!(error = %e, "Failed to persist alert change, rolled back");
            self.alerts = before;
            self.dirty = was_dirty;
            return Err(e);
        }
        Ok(out)
    }

    async fn latest_price(&self, instrument: &Instrument) -> Result<Decimal, ScoutError> {
        let fetch_error = |message: String| ScoutError::TransientFetch {
            target: instrument.to_string(),
            message,
        };
        let bars = self
            .bars
            .fetch(instrument, Interval::OneMinute, 1)
            .await
            .map_err(|e| fetch_error(format!("{e:#}")))?;
        let close = bars
            .last()
            .map(|b| b.close)
            .ok_or_else(|| fetch_error("no bars returned".into()))?;
        Decimal::from_f64(close).ok_or_else(|| fetch_error(format!("unrepresentable price {close}")))
    }

    /// Evaluate every alert once. Prices are fetched once per instrument.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let mut prices: HashMap<Instrument, Result<Decimal, ScoutError>> = HashMap::new();
        let mut remaining = Vec::with_capacity(self.alerts.len());

        for alert in std::mem::take(&mut self.alerts) {
            report.evaluated += 1;

            let price = match prices.get(&alert.instrument) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched = self.latest_price(&alert.instrument).await;
                    prices.insert(alert.instrument.clone(), fetched.clone());
                    fetched
                }
            };
            let price = match price {
                Ok(p) => p,
                Err(e) => {
                    report.fetch_failures += 1;
                    warn!(alert = %alert.id, error = %e, "Alert price fetch failed");
                    remaining.push(alert);
                    continue;
                }
            };

            if !alert.is_triggered(price) {
                debug!(alert = %alert.id, %price, threshold = %alert.threshold, "Alert not triggered");
                remaining.push(alert);
                continue;
            }

            report.fired += 1;
            self.dirty = true;
            let message = format_alert_message(&alert, price);
            match self.sink.deliver(alert.owner, &message).await {
                Ok(()) => info!(
                    alert = %alert.id,
                    owner = alert.owner,
                    instrument = %alert.instrument,
                    %price,
                    "Alert fired"
                ),
                Err(e) => {
                    report.delivery_failures += 1;
                    warn!(alert = %alert.id, owner = alert.owner, error = %e, "Alert fired but delivery failed");
                }
            }
        }

        self.alerts = remaining;
        if self.dirty {
            report.persisted = match self.persist().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Failed to persist alerts, will retry next tick");
                    false
                }
            };
        }
        report
    }

    async fn handle(&mut self, command: AlertCommand) {
        match command {
            AlertCommand::Add { alert, reply } => {
                let added = alert.clone();
                let result = self.commit(|alerts| alerts.push(added)).await;
                if result.is_ok() {
                    info!(alert = %alert.id, owner = alert.owner, instrument = %alert.instrument, "Alert added");
                }
                let _ = reply.send(result.map(|()| alert));
            }
            AlertCommand::Remove { owner, id, reply } => {
                let owned = |a: &Alert| a.owner == owner && a.id == id;
                let result = if self.alerts.iter().any(owned) {
                    let removed = self
                        .commit(|alerts| alerts.retain(|a| !owned(a)))
                        .await
                        .map(|()| true);
                    if removed.is_ok() {
                        info!(alert = %id, owner, "Alert removed");
                    }
                    removed
                } else {
                    Ok(false)
                };
                let _ = reply.send(result);
            }
            AlertCommand::List { owner, reply } => {
                let alerts = self
                    .alerts
                    .iter()
                    .filter(|a| owner.map_or(true, |o| a.owner == o))
                    .cloned()
                    .collect();
                let _ = reply.send(alerts);
            }
            // intercepted by `run`
            AlertCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Write back anything still unsaved before the task exits.
    async fn flush(&mut self) {
        if self.dirty {
            if let Err(e) = self.persist().await {
                error!(error = %e, "Failed to persist alerts on shutdown");
            }
        }
    }

    /// Run the poll loop on a background task.
    pub fn spawn(self) -> (AlertHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(self.run(rx));
        (AlertHandle { tx }, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<AlertCommand>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.poll_interval.as_secs(), "Alert watcher started");

        if let Err(e) = self.load().await {
            error!(error = %e, "Failed to load alerts, retrying next tick");
        }

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.loaded {
                        if let Err(e) = self.load().await {
                            error!(error = %e, "Failed to load alerts, retrying next tick");
                            continue;
                        }
                    }
                    let report = self.tick().await;
                    if report.evaluated > 0 {
                        debug!(?report, "Alert tick complete");
                    }
                }
                command = commands.recv() => match command {
                    Some(AlertCommand::Shutdown { reply }) => {
                        self.flush().await;
                        info!("Alert watcher stopped");
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) if self.loaded => self.handle(command).await,
                    // replies are dropped, so callers see `Unavailable`
                    Some(_) => warn!("Alert command rejected, alerts not loaded yet"),
                    None => {
                        info!("All alert handles dropped, watcher stopping");
                        self.flush().await;
                        break;
                    }
                },
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
