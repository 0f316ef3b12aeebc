//! Notification sinks.
//!
//! `TelegramSink` posts to the Bot API `sendMessage` endpoint, using the
//! alert owner id as the chat id. `LogSink` only logs and is used when
//! no bot token is configured.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{debug, info};

use super::NotificationSink;

const BASE_URL: &str = "https://api.telegram.org";

pub struct TelegramSink {
    http: Client,
    token: SecretString,
    base_url: String,
}

impl TelegramSink {
    pub fn new(token: SecretString) -> Result<Self> {
        Self::with_base_url(token, BASE_URL)
    }

    pub fn with_base_url(token: SecretString, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client for Telegram")?;

        Ok(Self {
            http,
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn send_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.token.expose_secret())
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn deliver(&self, owner: i64, message: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.send_url())
            .json(&json!({
                "chat_id": owner,
                "text": message,
                "parse_mode": "Markdown",
            }))
            .send()
            .await
            // reqwest errors carry the URL, which embeds the token
            .map_err(|e| anyhow::anyhow!("Telegram request failed (timeout: {})", e.is_timeout()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error {status}: {body}");
        }

        debug!(owner, "Telegram message delivered");
        Ok(())
    }
}

/// Sink that writes notifications to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, owner: i64, message: &str) -> Result<()> {
        info!(owner, message, "Notification (log sink)");
        Ok(())
    }
}
