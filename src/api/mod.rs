//! Clients for the trade feed, the leaderboard oracle and the exchange.

mod clob_client;
mod data_client;
mod leaderboard;
mod types;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{TradeEvent, WalletAddress};
use crate::security::ApiCredentials;

pub use clob_client::{ClobConnector, CLOB_URL, POLYGON_CHAIN_ID};
pub use data_client::{DataClient, DATA_API_BASE};
pub use leaderboard::DuneClient;
pub use types::*;

/// Source of a wallet's recent trades, newest first.
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    async fn recent_trades(&self, address: &WalletAddress, limit: u32) -> Result<Vec<TradeEvent>>;
}

/// Ranking oracle naming the current top-PNL wallet. The returned value is
/// unvalidated.
#[async_trait]
pub trait LeaderboardOracle: Send + Sync {
    async fn top_wallet(&self) -> Result<String>;
}

/// Price and order API of the exchange, bound to one user's credentials.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn get_order_book(&self, market_id: &str) -> Result<OrderBook>;

    async fn place_order(&self, order: &OrderRequest) -> Result<PlacedOrder>;
}

/// Builds an exchange session from decrypted credentials.
pub trait ExchangeConnector: Send + Sync {
    fn connect(&self, credentials: &ApiCredentials) -> Result<Box<dyn Exchange>>;
}
