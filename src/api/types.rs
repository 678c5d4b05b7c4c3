//! Wire types shared by the data-api, Dune and CLOB clients.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::TradeSide;

/// Activity entry from the data-api `/activity` endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResponse {
    #[serde(rename = "type", default)]
    pub activity_type: String,
    #[serde(default)]
    pub transaction_hash: String,
    /// Outcome token id
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub outcome_index: i64,
    #[serde(default)]
    pub side: String,
    pub timestamp: i64,
}

/// `/activity` answers with either a bare list or an envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ActivityPayload {
    List(Vec<ActivityResponse>),
    Envelope {
        #[serde(default)]
        activity: Vec<ActivityResponse>,
    },
}

impl ActivityPayload {
    pub fn into_entries(self) -> Vec<ActivityResponse> {
        match self {
            ActivityPayload::List(entries) => entries,
            ActivityPayload::Envelope { activity } => activity,
        }
    }
}

/// Dune query results envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct DuneResultsResponse {
    #[serde(default)]
    pub result: Option<DuneResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DuneResult {
    #[serde(default)]
    pub rows: Vec<DuneRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DuneRow {
    #[serde(default)]
    pub wallet_address: Option<String>,
}

/// Order book level. The CLOB sends prices and sizes as strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Order book snapshot for one token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Lowest ask price, whatever order the levels arrive in.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.iter().map(|l| l.price).min()
    }

    /// Highest bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.iter().map(|l| l.price).max()
    }
}

/// A replica order ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    /// Outcome token id
    pub market_id: String,
    pub side: TradeSide,
    pub price: Decimal,
    pub size: Decimal,
}

/// Exchange acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedOrder {
    pub order_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_activity_payload_shapes() {
        let bare = r#"[{"transactionHash":"0x1","asset":"42","side":"BUY","timestamp":10}]"#;
        let wrapped = r#"{"activity":[{"transactionHash":"0x1","conditionId":"0xc","side":"SELL","timestamp":10}]}"#;

        let a: ActivityPayload = serde_json::from_str(bare).unwrap();
        let b: ActivityPayload = serde_json::from_str(wrapped).unwrap();
        assert_eq!(a.into_entries()[0].asset.as_deref(), Some("42"));
        assert_eq!(b.into_entries()[0].condition_id.as_deref(), Some("0xc"));
    }

    #[test]
    fn test_order_book_best_levels_ignore_ordering() {
        let json = r#"{
            "bids": [{"price":"0.40","size":"10"},{"price":"0.45","size":"3"}],
            "asks": [{"price":"0.60","size":"5"},{"price":"0.52","size":"8"}]
        }"#;
        let book: OrderBook = serde_json::from_str(json).unwrap();

        assert_eq!(book.best_bid(), Some(dec!(0.45)));
        assert_eq!(book.best_ask(), Some(dec!(0.52)));
        assert_eq!(OrderBook::default().best_ask(), None);
    }

    #[test]
    fn test_dune_rows() {
        let json = r#"{"result":{"rows":[{"wallet_address":"0xabc","pnl":1.0}]}}"#;
        let resp: DuneResultsResponse = serde_json::from_str(json).unwrap();
        let rows = resp.result.unwrap().rows;
        assert_eq!(rows[0].wallet_address.as_deref(), Some("0xabc"));
    }
}
