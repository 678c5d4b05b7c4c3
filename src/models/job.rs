//! Work item handed from the poller to the executor pool.

use rust_decimal::Decimal;

use super::{SubscriptionMode, TradeEvent, TradeSide};

/// One replication to perform for one subscription. Lives only in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyJob {
    pub subscription_id: i64,
    pub user_id: i64,
    pub amount: Decimal,
    pub market_id: String,
    pub outcome_index: i64,
    pub side: TradeSide,
    pub trade_hash: String,
    pub mode: SubscriptionMode,
}

impl CopyJob {
    pub fn new(
        subscription_id: i64,
        user_id: i64,
        amount: Decimal,
        mode: SubscriptionMode,
        trade: &TradeEvent,
    ) -> Self {
        Self {
            subscription_id,
            user_id,
            amount,
            market_id: trade.market_id.clone(),
            outcome_index: trade.outcome_index,
            side: trade.side,
            trade_hash: trade.tx_hash.clone(),
            mode,
        }
    }
}
