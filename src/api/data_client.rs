//! Polymarket Data API client for source-wallet trade activity.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{TradeEvent, TradeSide, WalletAddress};

use super::types::*;
use super::ActivityFeed;

pub const DATA_API_BASE: &str = "https://data-api.polymarket.com";
const MAX_LIMIT: u32 = 500;

/// Client for Polymarket Data API (read-only operations).
pub struct DataClient {
    client: Client,
    base_url: String,
}

impl DataClient {
    /// Create with custom base URL.
    pub fn with_base_url(base_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch raw TRADE activity for a wallet.
    pub async fn get_activity(&self, address: &str, limit: u32) -> Result<Vec<ActivityResponse>> {
        let url = format!(
            "{}/activity?user={}&type=TRADE&limit={}",
            self.base_url,
            address,
            limit.clamp(1, MAX_LIMIT)
        );

        debug!(url = %url, "Fetching activity");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch activity")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Activity request failed: {} - {}", status, body);
        }

        let payload: ActivityPayload = response
            .json()
            .await
            .context("Failed to parse activity response")?;

        Ok(payload.into_entries())
    }
}

/// Turn raw activity into trade events, preserving feed order. Entries that
/// are not trades, or lack a hash, market or known side, are dropped.
pub(crate) fn parse_trades(address: &WalletAddress, entries: Vec<ActivityResponse>) -> Vec<TradeEvent> {
    entries
        .into_iter()
        .filter_map(|a| {
            if !a.activity_type.is_empty() && !a.activity_type.eq_ignore_ascii_case("TRADE") {
                return None;
            }

            let side = match a.side.parse::<TradeSide>() {
                Ok(side) => side,
                Err(_) => {
                    warn!(address = %address, side = %a.side, tx = %a.transaction_hash, "Unknown trade side, skipping");
                    return None;
                }
            };

            if a.transaction_hash.is_empty() {
                warn!(address = %address, "Trade without transaction hash, skipping");
                return None;
            }

            let market_id = a
                .asset
                .filter(|s| !s.is_empty())
                .or(a.condition_id.filter(|s| !s.is_empty()));
            let Some(market_id) = market_id else {
                warn!(address = %address, tx = %a.transaction_hash, "Trade without market id, skipping");
                return None;
            };

            Some(TradeEvent {
                tx_hash: a.transaction_hash,
                market_id,
                outcome_index: a.outcome_index,
                side,
                timestamp: a.timestamp,
            })
        })
        .collect()
}

#[async_trait]
impl ActivityFeed for DataClient {
    async fn recent_trades(&self, address: &WalletAddress, limit: u32) -> Result<Vec<TradeEvent>> {
        let entries = self.get_activity(address.as_str(), limit).await?;
        Ok(parse_trades(address, entries))
    }
}
