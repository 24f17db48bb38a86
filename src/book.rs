//! Order Books
//!
//! Per-instrument market state. The L1 variant keeps top-of-book only; the
//! depth variant (L2/L3) keeps sorted price levels with aggregate volume.
//! `simulate_order_fills` walks the opposite side under price priority and
//! returns the (price, quantity) legs a submitted order would consume.

use crate::data::{
    BookLevel, BookOp, OrderBookDelta, OrderBookSnapshot, OrderSide, QuoteTick, TradeTick,
};
use crate::instrument::Instrument;
use crate::types::{Price, Quantity};
use std::collections::BTreeMap;

/// Book depth granularity for a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BookLevelKind {
    /// Top-of-book only.
    L1,
    /// Aggregated depth per price level.
    L2,
    /// Order-level depth; aggregated here like L2 for matching purposes.
    L3,
}

/// Top-of-book state for L1 replay.
#[derive(Debug, Clone, Default)]
pub struct TopOfBook {
    pub bid: Option<BookLevel>,
    pub ask: Option<BookLevel>,
}

/// Aggregated depth keyed by raw price. Bids iterate descending via
/// `last_key_value`, asks ascending via `first_key_value`.
#[derive(Debug, Clone, Default)]
pub struct DepthBook {
    bids: BTreeMap<i64, Quantity>,
    asks: BTreeMap<i64, Quantity>,
    price_precision: u8,
}

/// Per-instrument order book.
#[derive(Debug, Clone)]
pub enum OrderBook {
    Top(TopOfBook),
    Depth(DepthBook),
}

impl OrderBook {
    pub fn new(kind: BookLevelKind, price_precision: u8) -> Self {
        match kind {
            BookLevelKind::L1 => OrderBook::Top(TopOfBook::default()),
            BookLevelKind::L2 | BookLevelKind::L3 => OrderBook::Depth(DepthBook {
                bids: BTreeMap::new(),
                asks: BTreeMap::new(),
                price_precision,
            }),
        }
    }

    #[inline]
    pub fn best_bid_price(&self) -> Option<Price> {
        match self {
            OrderBook::Top(top) => top.bid.map(|l| l.price),
            OrderBook::Depth(depth) => depth
                .bids
                .last_key_value()
                .map(|(&raw, _)| Price::from_raw(raw, depth.price_precision)),
        }
    }

    #[inline]
    pub fn best_ask_price(&self) -> Option<Price> {
        match self {
            OrderBook::Top(top) => top.ask.map(|l| l.price),
            OrderBook::Depth(depth) => depth
                .asks
                .first_key_value()
                .map(|(&raw, _)| Price::from_raw(raw, depth.price_precision)),
        }
    }

    pub fn best_bid_size(&self) -> Option<Quantity> {
        match self {
            OrderBook::Top(top) => top.bid.map(|l| l.size),
            OrderBook::Depth(depth) => depth.bids.last_key_value().map(|(_, &size)| size),
        }
    }

    pub fn best_ask_size(&self) -> Option<Quantity> {
        match self {
            OrderBook::Top(top) => top.ask.map(|l| l.size),
            OrderBook::Depth(depth) => depth.asks.first_key_value().map(|(_, &size)| size),
        }
    }

    /// Update from a quote tick (both book variants accept quotes; a depth
    /// book treats them as top-level refreshes).
    pub fn apply_quote(&mut self, quote: &QuoteTick) {
        match self {
            OrderBook::Top(top) => {
                top.bid = Some(BookLevel::new(quote.bid, quote.bid_size));
                top.ask = Some(BookLevel::new(quote.ask, quote.ask_size));
            }
            OrderBook::Depth(depth) => {
                depth.bids.insert(quote.bid.raw, quote.bid_size);
                depth.asks.insert(quote.ask.raw, quote.ask_size);
                // Drop levels that would cross the refreshed top.
                depth.bids.retain(|&raw, _| raw <= quote.bid.raw);
                depth.asks.retain(|&raw, _| raw >= quote.ask.raw);
            }
        }
    }

    /// Update from a trade tick: a SELL aggressor hits the bid, a BUY lifts
    /// the offer. An unset opposite side initializes to the trade price.
    pub fn apply_trade(&mut self, trade: &TradeTick) {
        let level = BookLevel::new(trade.price, trade.size);
        match self {
            OrderBook::Top(top) => match trade.aggressor_side {
                OrderSide::Sell => {
                    top.bid = Some(level);
                    if top.ask.is_none() {
                        top.ask = Some(level);
                    }
                }
                OrderSide::Buy => {
                    top.ask = Some(level);
                    if top.bid.is_none() {
                        top.bid = Some(level);
                    }
                }
            },
            OrderBook::Depth(depth) => match trade.aggressor_side {
                OrderSide::Sell => {
                    depth.bids.insert(trade.price.raw, trade.size);
                    depth.bids.retain(|&raw, _| raw <= trade.price.raw);
                    if depth.asks.is_empty() {
                        depth.asks.insert(trade.price.raw, trade.size);
                    }
                }
                OrderSide::Buy => {
                    depth.asks.insert(trade.price.raw, trade.size);
                    depth.asks.retain(|&raw, _| raw >= trade.price.raw);
                    if depth.bids.is_empty() {
                        depth.bids.insert(trade.price.raw, trade.size);
                    }
                }
            },
        }
    }

    /// Replace full depth from a snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &OrderBookSnapshot) {
        match self {
            OrderBook::Top(top) => {
                top.bid = snapshot.bids.first().copied();
                top.ask = snapshot.asks.first().copied();
            }
            OrderBook::Depth(depth) => {
                depth.bids.clear();
                depth.asks.clear();
                for level in &snapshot.bids {
                    if !level.size.is_zero() {
                        depth.bids.insert(level.price.raw, level.size);
                    }
                }
                for level in &snapshot.asks {
                    if !level.size.is_zero() {
                        depth.asks.insert(level.price.raw, level.size);
                    }
                }
            }
        }
    }

    /// Apply an incremental delta.
    pub fn apply_delta(&mut self, delta: &OrderBookDelta) {
        match self {
            OrderBook::Top(top) => {
                // An L1 book only tracks the top; a delta at or better than
                // the current top refreshes it.
                let level = BookLevel::new(delta.price, delta.size);
                match delta.side {
                    OrderSide::Buy => {
                        let replace = top.bid.map_or(true, |b| delta.price >= b.price);
                        if delta.op == BookOp::Delete {
                            if top.bid.map_or(false, |b| b.price == delta.price) {
                                top.bid = None;
                            }
                        } else if replace {
                            top.bid = Some(level);
                        }
                    }
                    OrderSide::Sell => {
                        let replace = top.ask.map_or(true, |a| delta.price <= a.price);
                        if delta.op == BookOp::Delete {
                            if top.ask.map_or(false, |a| a.price == delta.price) {
                                top.ask = None;
                            }
                        } else if replace {
                            top.ask = Some(level);
                        }
                    }
                }
            }
            OrderBook::Depth(depth) => {
                let levels = match delta.side {
                    OrderSide::Buy => &mut depth.bids,
                    OrderSide::Sell => &mut depth.asks,
                };
                match delta.op {
                    BookOp::Add | BookOp::Update => {
                        if delta.size.is_zero() {
                            levels.remove(&delta.price.raw);
                        } else {
                            levels.insert(delta.price.raw, delta.size);
                        }
                    }
                    BookOp::Delete => {
                        levels.remove(&delta.price.raw);
                    }
                }
            }
        }
    }

    /// Walk the opposite side for a submitted order, consuming size level
    /// by level under price priority. `limit_price` bounds how deep a limit
    /// order may take; market orders pass `None`.
    ///
    /// The L1 model fills at the top and places any residual one tick past
    /// it - a temporary single-level approximation kept until real depth is
    /// available.
    pub fn simulate_order_fills(
        &self,
        side: OrderSide,
        quantity: Quantity,
        limit_price: Option<Price>,
        instrument: &Instrument,
    ) -> Vec<(Price, Quantity)> {
        match self {
            OrderBook::Top(top) => {
                let Some(level) = (match side {
                    OrderSide::Buy => top.ask,
                    OrderSide::Sell => top.bid,
                }) else {
                    return Vec::new();
                };
                if let Some(limit) = limit_price {
                    let beyond = match side {
                        OrderSide::Buy => level.price > limit,
                        OrderSide::Sell => level.price < limit,
                    };
                    if beyond {
                        return Vec::new();
                    }
                }
                let mut fills = Vec::new();
                if level.size.is_zero() || quantity.raw <= level.size.raw {
                    fills.push((level.price, quantity));
                } else {
                    fills.push((level.price, level.size));
                    let residual = quantity - level.size;
                    let tick = instrument.price_increment;
                    let next = match side {
                        OrderSide::Buy => level.price + tick,
                        OrderSide::Sell => level.price - tick,
                    };
                    fills.push((next, residual));
                }
                fills
            }
            OrderBook::Depth(depth) => {
                let mut fills = Vec::new();
                let mut remaining = quantity;
                let levels: Vec<(i64, Quantity)> = match side {
                    OrderSide::Buy => depth.asks.iter().map(|(&p, &s)| (p, s)).collect(),
                    OrderSide::Sell => depth.bids.iter().rev().map(|(&p, &s)| (p, s)).collect(),
                };
                for (raw, size) in levels {
                    if remaining.is_zero() {
                        break;
                    }
                    let price = Price::from_raw(raw, depth.price_precision);
                    if let Some(limit) = limit_price {
                        let beyond = match side {
                            OrderSide::Buy => price > limit,
                            OrderSide::Sell => price < limit,
                        };
                        if beyond {
                            break;
                        }
                    }
                    let take = remaining.min(size);
                    fills.push((price, take));
                    remaining -= take;
                }
                fills
            }
        }
    }

    pub fn clear(&mut self) {
        match self {
            OrderBook::Top(top) => {
                top.bid = None;
                top.ask = None;
            }
            OrderBook::Depth(depth) => {
                depth.bids.clear();
                depth.asks.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::{InstrumentId, TradeId, Venue};
    use crate::types::Currency;

    fn instrument() -> Instrument {
        Instrument::equity(
            InstrumentId::new("AAPL", Venue::new("NASDAQ")),
            2,
            0.01,
            Currency::usd(),
        )
    }

    fn quote(bid: f64, ask: f64, bid_size: f64, ask_size: f64) -> QuoteTick {
        QuoteTick {
            instrument_id: instrument().id,
            bid: Price::new(bid, 2),
            ask: Price::new(ask, 2),
            bid_size: Quantity::new(bid_size, 0),
            ask_size: Quantity::new(ask_size, 0),
            ts_event: 0,
            ts_init: 0,
        }
    }

    #[test]
    fn test_l1_quote_update() {
        let mut book = OrderBook::new(BookLevelKind::L1, 2);
        book.apply_quote(&quote(100.00, 100.02, 50.0, 60.0));
        assert_eq!(book.best_bid_price(), Some(Price::new(100.00, 2)));
        assert_eq!(book.best_ask_price(), Some(Price::new(100.02, 2)));
        assert_eq!(book.best_ask_size(), Some(Quantity::new(60.0, 0)));
    }

    #[test]
    fn test_l1_trade_update_sell_hits_bid() {
        let mut book = OrderBook::new(BookLevelKind::L1, 2);
        let trade = TradeTick {
            instrument_id: instrument().id,
            price: Price::new(99.98, 2),
            size: Quantity::new(10.0, 0),
            aggressor_side: OrderSide::Sell,
            trade_id: TradeId::new("T-1"),
            ts_event: 0,
            ts_init: 0,
        };
        book.apply_trade(&trade);
        assert_eq!(book.best_bid_price(), Some(Price::new(99.98, 2)));
        // Opposite side initialized from the trade.
        assert_eq!(book.best_ask_price(), Some(Price::new(99.98, 2)));
    }

    #[test]
    fn test_l1_fill_with_residual_at_next_tick() {
        let book = {
            let mut b = OrderBook::new(BookLevelKind::L1, 2);
            b.apply_quote(&quote(100.00, 100.02, 50.0, 30.0));
            b
        };
        let fills = book.simulate_order_fills(
            OrderSide::Buy,
            Quantity::new(50.0, 0),
            None,
            &instrument(),
        );
        assert_eq!(
            fills,
            vec![
                (Price::new(100.02, 2), Quantity::new(30.0, 0)),
                (Price::new(100.03, 2), Quantity::new(20.0, 0)),
            ]
        );
    }

    #[test]
    fn test_l2_walks_depth_in_price_order() {
        let mut book = OrderBook::new(BookLevelKind::L2, 2);
        book.apply_snapshot(&OrderBookSnapshot {
            instrument_id: instrument().id,
            bids: vec![],
            asks: vec![
                BookLevel::new(Price::new(100.02, 2), Quantity::new(10.0, 0)),
                BookLevel::new(Price::new(100.03, 2), Quantity::new(20.0, 0)),
                BookLevel::new(Price::new(100.05, 2), Quantity::new(100.0, 0)),
            ],
            ts_event: 0,
            ts_init: 0,
        });
        let fills = book.simulate_order_fills(
            OrderSide::Buy,
            Quantity::new(25.0, 0),
            None,
            &instrument(),
        );
        assert_eq!(
            fills,
            vec![
                (Price::new(100.02, 2), Quantity::new(10.0, 0)),
                (Price::new(100.03, 2), Quantity::new(15.0, 0)),
            ]
        );
    }

    #[test]
    fn test_l2_limit_bounds_depth_walk() {
        let mut book = OrderBook::new(BookLevelKind::L2, 2);
        book.apply_snapshot(&OrderBookSnapshot {
            instrument_id: instrument().id,
            bids: vec![],
            asks: vec![
                BookLevel::new(Price::new(100.02, 2), Quantity::new(10.0, 0)),
                BookLevel::new(Price::new(100.05, 2), Quantity::new(20.0, 0)),
            ],
            ts_event: 0,
            ts_init: 0,
        });
        let fills = book.simulate_order_fills(
            OrderSide::Buy,
            Quantity::new(25.0, 0),
            Some(Price::new(100.03, 2)),
            &instrument(),
        );
        assert_eq!(
            fills,
            vec![(Price::new(100.02, 2), Quantity::new(10.0, 0))]
        );
    }

    #[test]
    fn test_l2_delta_lifecycle() {
        let mut book = OrderBook::new(BookLevelKind::L2, 2);
        let mut delta = OrderBookDelta {
            instrument_id: instrument().id,
            side: OrderSide::Buy,
            price: Price::new(99.99, 2),
            size: Quantity::new(40.0, 0),
            op: BookOp::Add,
            ts_event: 0,
            ts_init: 0,
        };
        book.apply_delta(&delta);
        assert_eq!(book.best_bid_price(), Some(Price::new(99.99, 2)));

        delta.op = BookOp::Update;
        delta.size = Quantity::new(15.0, 0);
        book.apply_delta(&delta);
        assert_eq!(book.best_bid_size(), Some(Quantity::new(15.0, 0)));

        delta.op = BookOp::Delete;
        book.apply_delta(&delta);
        assert_eq!(book.best_bid_price(), None);
    }
}
