//! Trade log rows: one per (subscription, source trade).

use chrono::{DateTime, Utc};

use super::TradeSide;

/// Lifecycle of a replicated trade. `Success` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeStatus {
    Pending,
    Success,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Success => "SUCCESS",
            TradeStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TradeStatus::Pending),
            "SUCCESS" => Some(TradeStatus::Success),
            "FAILED" => Some(TradeStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Pending)
    }

    /// Marker used in status listings.
    pub fn marker(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "[..]",
            TradeStatus::Success => "[ok]",
            TradeStatus::Failed => "[x]",
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one replication attempt.
#[derive(Debug, Clone)]
pub struct TradeLog {
    pub id: i64,
    pub subscription_id: i64,
    pub source_trade_hash: String,
    pub market_id: String,
    pub outcome_index: i64,
    pub side: TradeSide,
    pub status: TradeStatus,
    pub order_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
