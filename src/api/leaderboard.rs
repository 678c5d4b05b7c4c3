//! Dune client for the top-PNL leaderboard query.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::types::DuneResultsResponse;
use super::LeaderboardOracle;

pub const DUNE_API_BASE: &str = "https://api.dune.com/api/v1/query";

/// Reads the first row of a saved Dune query.
pub struct DuneClient {
    client: Client,
    base_url: String,
    api_key: String,
    query_id: String,
}

impl DuneClient {
    pub fn new(api_key: String, query_id: String, timeout: Duration) -> Result<Self> {
        Self::with_base_url(DUNE_API_BASE.to_string(), api_key, query_id, timeout)
    }

    pub fn with_base_url(
        base_url: String,
        api_key: String,
        query_id: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            query_id,
        })
    }

    /// Fetch the latest results of the configured query.
    pub async fn get_results(&self) -> Result<DuneResultsResponse> {
        let url = format!("{}/{}/results", self.base_url, self.query_id);

        debug!(url = %url, "Fetching leaderboard query results");

        let response = self
            .client
            .get(&url)
            .header("x-dune-api-key", &self.api_key)
            .send()
            .await
            .context("Failed to fetch leaderboard")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Leaderboard request failed: {} - {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse leaderboard response")
    }
}

/// Wallet field of the first result row.
pub(crate) fn first_wallet(resp: DuneResultsResponse) -> Result<String> {
    let row = resp
        .result
        .and_then(|r| r.rows.into_iter().next())
        .ok_or_else(|| anyhow!("leaderboard query returned no rows"))?;

    row.wallet_address
        .filter(|w| !w.trim().is_empty())
        .ok_or_else(|| anyhow!("first leaderboard row has no wallet_address"))
}

#[async_trait]
impl LeaderboardOracle for DuneClient {
    async fn top_wallet(&self) -> Result<String> {
        first_wallet(self.get_results().await?)
    }
}
