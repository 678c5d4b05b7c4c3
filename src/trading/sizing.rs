//! Execution price discovery and order sizing.

use rust_decimal::Decimal;

use crate::api::OrderBook;
use crate::error::{CopyError, Result};
use crate::models::TradeSide;

/// Price that crosses the book with the given slippage.
///
/// BUY pays the best ask plus slippage, capped at 1.0. SELL accepts the best
/// bid minus slippage, floored at 0.0. An empty side, or a price that ends up
/// at zero, means there is nothing to trade against.
pub fn execution_price(
    book: &OrderBook,
    side: TradeSide,
    slippage: Decimal,
    market_id: &str,
) -> Result<Decimal> {
    let (best, side_name) = match side {
        TradeSide::Buy => (book.best_ask(), "ask"),
        TradeSide::Sell => (book.best_bid(), "bid"),
    };

    let empty = || CopyError::EmptyBook {
        market_id: market_id.to_string(),
        side: side_name,
    };

    let best = best.ok_or_else(empty)?;
    let price = match side {
        TradeSide::Buy => (Decimal::ONE + slippage)
            .checked_mul(best)
            .map(|p| p.min(Decimal::ONE)),
        TradeSide::Sell => (Decimal::ONE - slippage)
            .checked_mul(best)
            .map(|p| p.max(Decimal::ZERO)),
    }
    .ok_or_else(|| CopyError::InvalidAmount(format!("price {} out of range", best)))?;

    if price <= Decimal::ZERO {
        return Err(empty());
    }

    Ok(price)
}

/// Shares bought or sold for a USDC amount at a price.
pub fn order_size(amount: Decimal, price: Decimal) -> Result<Decimal> {
    if price <= Decimal::ZERO {
        return Err(CopyError::InvalidAmount(format!("price must be positive, got {}", price)));
    }
    amount.checked_div(price).ok_or_else(|| {
        CopyError::InvalidAmount(format!("{} at price {} is out of range", amount, price))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BookLevel;
    use rust_decimal_macros::dec;

    fn book(bids: &[Decimal], asks: &[Decimal]) -> OrderBook {
        let level = |p: &Decimal| BookLevel { price: *p, size: dec!(100) };
        OrderBook {
            bids: bids.iter().map(level).collect(),
            asks: asks.iter().map(level).collect(),
        }
    }

    #[test]
    fn test_buy_price_and_size() {
        let b = book(&[dec!(0.48)], &[dec!(0.50)]);
        let price = execution_price(&b, TradeSide::Buy, dec!(0.01), "m").unwrap();
        assert_eq!(price, dec!(0.505));

        let size = order_size(dec!(10), price).unwrap();
        assert_eq!(size.round_dp(2), dec!(19.80));
    }

    #[test]
    fn test_buy_price_capped_at_one() {
        let b = book(&[], &[dec!(0.999)]);
        assert_eq!(execution_price(&b, TradeSide::Buy, dec!(0.01), "m").unwrap(), Decimal::ONE);
    }

    #[test]
    fn test_sell_uses_highest_bid() {
        let b = book(&[dec!(0.30), dec!(0.40), dec!(0.35)], &[]);
        let price = execution_price(&b, TradeSide::Sell, dec!(0.01), "m").unwrap();
        assert_eq!(price, dec!(0.396));
    }

    #[test]
    fn test_buy_uses_lowest_ask() {
        let b = book(&[], &[dec!(0.70), dec!(0.60)]);
        let price = execution_price(&b, TradeSide::Buy, dec!(0), "m").unwrap();
        assert_eq!(price, dec!(0.60));
    }

    #[test]
    fn test_empty_side_has_no_price() {
        let b = book(&[dec!(0.4)], &[]);
        let err = execution_price(&b, TradeSide::Buy, dec!(0.01), "m").unwrap_err();
        assert!(err.to_string().contains("no price available"));

        let b = book(&[], &[dec!(0.4)]);
        assert!(matches!(
            execution_price(&b, TradeSide::Sell, dec!(0.01), "m"),
            Err(CopyError::EmptyBook { .. })
        ));
    }

    #[test]
    fn test_zero_price_is_no_price() {
        let b = book(&[dec!(0)], &[]);
        assert!(matches!(
            execution_price(&b, TradeSide::Sell, dec!(0.01), "m"),
            Err(CopyError::EmptyBook { .. })
        ));
        assert!(order_size(dec!(10), dec!(0)).is_err());
    }

    #[test]
    fn test_oversized_amount_is_an_error() {
        let err = order_size(Decimal::MAX, dec!(0.5)).unwrap_err();
        assert!(matches!(err, CopyError::InvalidAmount(_)));

        let b = book(&[], &[Decimal::MAX]);
        assert!(matches!(
            execution_price(&b, TradeSide::Buy, dec!(0.01), "m"),
            Err(CopyError::InvalidAmount(_))
        ));
    }
}
