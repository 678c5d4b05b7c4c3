//! Tracked sources and user subscriptions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::WalletAddress;

/// Role key under which the top-PNL leader is cached.
pub const TOP_PNL_ROLE: &str = "top_pnl_1";

/// The currently elected top-PNL wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicLeader {
    pub address: WalletAddress,
    pub last_updated: DateTime<Utc>,
    /// Processing watermark, only set when it was recorded for this address.
    pub last_seen_trade_ts: Option<i64>,
}

/// A wallet explicitly chosen by at least one user to copy from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedSource {
    pub id: i64,
    pub address: WalletAddress,
    /// Watermark: timestamp of the most recently processed trade.
    pub last_seen_trade_ts: Option<i64>,
}

/// What a subscription follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionTarget {
    /// A specific tracked wallet.
    Wallet { source_id: i64, address: WalletAddress },
    /// Whoever currently tops the PNL leaderboard.
    TopPnl,
}

impl SubscriptionTarget {
    pub fn mode(&self) -> SubscriptionMode {
        match self {
            SubscriptionTarget::Wallet { .. } => SubscriptionMode::Wallet,
            SubscriptionTarget::TopPnl => SubscriptionMode::TopPnl,
        }
    }
}

/// Persisted tag of a subscription target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionMode {
    Wallet,
    TopPnl,
}

impl SubscriptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionMode::Wallet => "WALLET",
            SubscriptionMode::TopPnl => "TOP_PNL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WALLET" => Some(SubscriptionMode::Wallet),
            "TOP_PNL" => Some(SubscriptionMode::TopPnl),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's standing order to replicate a target's trades.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub target: SubscriptionTarget,
    /// USDC spent per replicated trade
    pub amount_per_trade: Decimal,
    pub active: bool,
}

impl Subscription {
    pub fn mode(&self) -> SubscriptionMode {
        self.target.mode()
    }

    /// Human label for listings.
    pub fn describe(&self) -> String {
        match &self.target {
            SubscriptionTarget::Wallet { address, .. } => {
                format!("{} (${:.2} per trade)", address.short(), self.amount_per_trade)
            }
            SubscriptionTarget::TopPnl => {
                format!("Top #1 PNL trader (${:.2} per trade)", self.amount_per_trade)
            }
        }
    }
}
