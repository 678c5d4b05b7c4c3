//! Data models for sources, subscriptions, trade events and trade logs.

mod address;
mod job;
mod subscription;
mod trade;
mod trade_log;

pub use address::WalletAddress;
pub use job::CopyJob;
pub use subscription::{
    DynamicLeader, Subscription, SubscriptionMode, SubscriptionTarget, TrackedSource, TOP_PNL_ROLE,
};
pub use trade::{TradeEvent, TradeSide};
pub use trade_log::{TradeLog, TradeStatus};
