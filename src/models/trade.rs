//! Trade events observed on a source wallet's activity feed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(TradeSide::Buy),
            "SELL" => Ok(TradeSide::Sell),
            other => Err(format!("unknown trade side: {}", other)),
        }
    }
}

/// A single trade parsed from a feed entry. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeEvent {
    /// On-chain transaction hash of the source trade
    pub tx_hash: String,

    /// Tradable market identifier (outcome token id)
    pub market_id: String,

    pub outcome_index: i64,

    pub side: TradeSide,

    /// Unix seconds
    pub timestamp: i64,
}
