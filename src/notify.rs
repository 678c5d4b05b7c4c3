//! Best-effort outcome notifications to users.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use crate::models::CopyJob;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Delivers a text message to a user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, user_id: i64, text: &str) -> Result<()>;
}

pub fn success_message(job: &CopyJob) -> String {
    format!(
        "Trade copied: {} ${:.2} in market {}",
        job.side, job.amount, job.market_id
    )
}

pub fn failure_message(job: &CopyJob, error: &str) -> String {
    format!(
        "Trade failed: could not copy {} in market {}: {}",
        job.side, job.market_id, error
    )
}

/// Telegram Bot API sink. The user id doubles as the chat id.
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

impl TelegramNotifier {
    pub fn new(token: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: TELEGRAM_API_BASE.to_string(),
            token,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, user_id: i64, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);

        let response = self
            .client
            .post(&url)
            .json(&SendMessage { chat_id: user_id, text })
            .send()
            .await
            .context("Failed to send Telegram message")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendMessage failed: {} - {}", status, body);
        }

        Ok(())
    }
}

/// Writes notifications to the log when no bot token is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, user_id: i64, text: &str) -> Result<()> {
        info!(user_id, message = %text, "Notification");
        Ok(())
    }
}
