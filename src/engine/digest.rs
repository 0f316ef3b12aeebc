//! Global top digest.
//!
//! Chats opt in to a summary of the global BUY and SELL tops. The
//! subscriber list is a persisted set of chat ids. A broadcast builds one
//! message from the warm cache and delivers it to every subscriber
//! independently, so one failed delivery never stops the rest.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::providers::NotificationSink;
use crate::ranking::RankingCache;
use crate::storage::CollectionStore;
use crate::types::{Direction, ScoreRecord, ScoutError};

const SECTION_SEPARATOR: &str = "\n\n━━━━━━━━━━━━━━\n\n";

/// Counters for one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DigestReport {
    pub recipients: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Both tops were empty, so nothing was sent.
    pub skipped: bool,
}

/// One titled, numbered block of records.
fn format_section(title: &str, records: &[ScoreRecord]) -> String {
    let mut out = format!("*{title}*");
    for (i, r) in records.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. `{}` ({}) score *{}* @ {:.2}",
            i + 1,
            r.instrument.symbol,
            r.market,
            r.score,
            r.price
        ));
    }
    out
}

/// Digest text, or `None` when there is nothing to report.
pub fn format_digest(buy: &[ScoreRecord], sell: &[ScoreRecord]) -> Option<String> {
    if buy.is_empty() && sell.is_empty() {
        return None;
    }
    let mut parts = vec!["*DAILY GLOBAL MARKET*".to_string()];
    if !buy.is_empty() {
        parts.push(format_section("GLOBAL TOP BUY", buy));
    }
    if !sell.is_empty() {
        parts.push(format_section("GLOBAL TOP SELL", sell));
    }
    Some(parts.join(SECTION_SEPARATOR))
}

pub struct TopDigest {
    cache: Arc<RankingCache>,
    store: Arc<dyn CollectionStore<i64>>,
    sink: Arc<dyn NotificationSink>,
    limit: usize,
    // held across load-modify-save so concurrent updates are not lost
    write: Mutex<()>,
}

impl TopDigest {
    pub fn new(
        cache: Arc<RankingCache>,
        store: Arc<dyn CollectionStore<i64>>,
        sink: Arc<dyn NotificationSink>,
        limit: usize,
    ) -> Self {
        Self {
            cache,
            store,
            sink,
            limit,
            write: Mutex::new(()),
        }
    }

    pub async fn subscribers(&self) -> Result<Vec<i64>, ScoutError> {
        self.store.load_all().await
    }

    /// Add `chat`. Returns `false` if it was already subscribed.
    pub async fn subscribe(&self, chat: i64) -> Result<bool, ScoutError> {
        let _guard = self.write.lock().await;
        let mut chats = self.store.load_all().await?;
        if chats.contains(&chat) {
            return Ok(false);
        }
        chats.push(chat);
        self.store.save_all(&chats).await?;
        info!(chat, "Digest subscriber added");
        Ok(true)
    }

    /// Remove `chat`. Returns `false` if it was not subscribed.
    pub async fn unsubscribe(&self, chat: i64) -> Result<bool, ScoutError> {
        let _guard = self.write.lock().await;
        let mut chats = self.store.load_all().await?;
        let before = chats.len();
        chats.retain(|c| *c != chat);
        if chats.len() == before {
            return Ok(false);
        }
        self.store.save_all(&chats).await?;
        info!(chat, "Digest subscriber removed");
        Ok(true)
    }

    /// Send the current global tops to every subscriber.
    pub async fn broadcast(&self) -> Result<DigestReport, ScoutError> {
        let chats = self.subscribers().await?;
        let mut report = DigestReport {
            recipients: chats.len(),
            ..Default::default()
        };
        if chats.is_empty() {
            debug!("No digest subscribers");
            return Ok(report);
        }

        let buy = self.cache.global_top(Direction::Buy, self.limit);
        let sell = self.cache.global_top(Direction::Sell, self.limit);
        let message = match format_digest(&buy, &sell) {
            Some(m) => m,
            None => {
                info!(recipients = report.recipients, "Rankings empty, digest skipped");
                report.skipped = true;
                return Ok(report);
            }
        };

        for chat in chats {
            match self.sink.deliver(chat, &message).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(chat, error = %e, "Digest delivery failed");
                }
            }
        }
        info!(
            delivered = report.delivered,
            failed = report.failed,
            "Top digest sent"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
