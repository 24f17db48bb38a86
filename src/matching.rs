//! Matching Core
//!
//! The per-venue working-order arena and the match/trigger predicates the
//! engine evaluates against top-of-book. Orders live here by value; every
//! cross-reference (OCO partner, bracket child, position link) is an id in
//! a lookup table owned by the venue.

use crate::book::OrderBook;
use crate::data::OrderSide;
use crate::identifiers::{ClientOrderId, InstrumentId};
use crate::orders::Order;
use crate::types::Price;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Working orders for one venue, bucketed per instrument for matching
/// iteration.
#[derive(Debug, Default)]
pub struct WorkingOrders {
    orders: HashMap<ClientOrderId, Order>,
    by_instrument: HashMap<InstrumentId, Vec<ClientOrderId>>,
}

impl WorkingOrders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, order: Order) {
        let id = order.client_order_id.clone();
        self.by_instrument
            .entry(order.instrument_id.clone())
            .or_default()
            .push(id.clone());
        self.orders.insert(id, order);
    }

    pub fn remove(&mut self, id: &ClientOrderId) -> Option<Order> {
        let order = self.orders.remove(id)?;
        if let Some(bucket) = self.by_instrument.get_mut(&order.instrument_id) {
            bucket.retain(|other| other != id);
        }
        Some(order)
    }

    #[inline]
    pub fn get(&self, id: &ClientOrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: &ClientOrderId) -> Option<&mut Order> {
        self.orders.get_mut(id)
    }

    #[inline]
    pub fn contains(&self, id: &ClientOrderId) -> bool {
        self.orders.contains_key(id)
    }

    /// Snapshot of the instrument's order ids in insertion order. Matching
    /// iterates this clone so terminations during the pass cannot invalidate
    /// the walk; stale ids are skipped by the working check.
    pub fn snapshot_ids(&self, instrument_id: &InstrumentId) -> Vec<ClientOrderId> {
        self.by_instrument
            .get(instrument_id)
            .cloned()
            .unwrap_or_default()
    }

    /// All working-order ids across instruments, in insertion order.
    pub fn all_ids(&self) -> Vec<ClientOrderId> {
        let mut ids = Vec::with_capacity(self.orders.len());
        let mut instruments: Vec<&InstrumentId> = self.by_instrument.keys().collect();
        instruments.sort();
        for instrument in instruments {
            ids.extend(self.by_instrument[instrument].iter().cloned());
        }
        ids
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn clear(&mut self) {
        self.orders.clear();
        self.by_instrument.clear();
    }
}

/// Matching statistics for run diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingStats {
    pub orders_submitted: u64,
    pub orders_accepted: u64,
    pub orders_rejected: u64,
    pub orders_canceled: u64,
    pub orders_expired: u64,
    pub orders_triggered: u64,
    pub orders_updated: u64,
    pub fills: u64,
}

// =============================================================================
// PREDICATES
// =============================================================================
// Evaluated against top-of-book (bid B, ask A) and an order price P. The
// market's displayed book never contains our simulated orders, so "the bid
// dropped below our buy price" reads as the market trading through us.

/// Would a limit order take liquidity right now?
#[inline]
pub fn limit_marketable(side: OrderSide, price: Price, book: &OrderBook) -> bool {
    match side {
        OrderSide::Buy => book.best_ask_price().map_or(false, |ask| price >= ask),
        OrderSide::Sell => book.best_bid_price().map_or(false, |bid| price <= bid),
    }
}

/// Has the market traded through a resting limit? Equal-price touches are
/// settled by the fill model.
#[inline]
pub fn limit_matched(
    side: OrderSide,
    price: Price,
    book: &OrderBook,
    equal_price_fill: &mut dyn FnMut() -> bool,
) -> bool {
    match side {
        OrderSide::Buy => match book.best_bid_price() {
            Some(bid) => bid < price || (bid == price && equal_price_fill()),
            None => false,
        },
        OrderSide::Sell => match book.best_ask_price() {
            Some(ask) => ask > price || (ask == price && equal_price_fill()),
            None => false,
        },
    }
}

/// Is a stop trigger already marketable (used to reject stops "in the
/// market" at submit time)?
#[inline]
pub fn stop_marketable(side: OrderSide, trigger: Price, book: &OrderBook) -> bool {
    match side {
        OrderSide::Buy => book.best_ask_price().map_or(false, |ask| ask >= trigger),
        OrderSide::Sell => book.best_bid_price().map_or(false, |bid| bid <= trigger),
    }
}

/// Has a resting stop triggered? Equal-price touches are settled by the
/// fill model.
#[inline]
pub fn stop_triggered(
    side: OrderSide,
    trigger: Price,
    book: &OrderBook,
    equal_price_fill: &mut dyn FnMut() -> bool,
) -> bool {
    match side {
        OrderSide::Buy => match book.best_ask_price() {
            Some(ask) => ask > trigger || (ask == trigger && equal_price_fill()),
            None => false,
        },
        OrderSide::Sell => match book.best_bid_price() {
            Some(bid) => bid < trigger || (bid == trigger && equal_price_fill()),
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::BookLevelKind;
    use crate::data::QuoteTick;
    use crate::identifiers::{StrategyId, Venue};
    use crate::types::Quantity;

    fn book(bid: f64, ask: f64) -> OrderBook {
        let mut book = OrderBook::new(BookLevelKind::L1, 2);
        book.apply_quote(&QuoteTick {
            instrument_id: InstrumentId::new("AAPL", Venue::new("NASDAQ")),
            bid: Price::new(bid, 2),
            ask: Price::new(ask, 2),
            bid_size: Quantity::new(100.0, 0),
            ask_size: Quantity::new(100.0, 0),
            ts_event: 0,
            ts_init: 0,
        });
        book
    }

    fn yes() -> impl FnMut() -> bool {
        || true
    }

    fn no() -> impl FnMut() -> bool {
        || false
    }

    #[test]
    fn test_limit_marketable() {
        let book = book(100.00, 100.02);
        assert!(limit_marketable(OrderSide::Buy, Price::new(100.02, 2), &book));
        assert!(limit_marketable(OrderSide::Buy, Price::new(100.05, 2), &book));
        assert!(!limit_marketable(OrderSide::Buy, Price::new(100.01, 2), &book));
        assert!(limit_marketable(OrderSide::Sell, Price::new(100.00, 2), &book));
        assert!(!limit_marketable(OrderSide::Sell, Price::new(100.01, 2), &book));
    }

    #[test]
    fn test_limit_matched_buy() {
        let book = book(99.99, 100.02);
        // Bid below our price: market traded through.
        assert!(limit_matched(OrderSide::Buy, Price::new(100.00, 2), &book, &mut yes()));
        assert!(limit_matched(OrderSide::Buy, Price::new(100.00, 2), &book, &mut no()));
        // Equal price defers to the fill model.
        assert!(limit_matched(OrderSide::Buy, Price::new(99.99, 2), &book, &mut yes()));
        assert!(!limit_matched(OrderSide::Buy, Price::new(99.99, 2), &book, &mut no()));
        // Bid above our price: still queued behind better bids.
        assert!(!limit_matched(OrderSide::Buy, Price::new(99.98, 2), &book, &mut yes()));
    }

    #[test]
    fn test_stop_triggered_sell() {
        let book = book(49.99, 50.01);
        assert!(stop_triggered(OrderSide::Sell, Price::new(50.00, 2), &book, &mut no()));
        assert!(stop_triggered(OrderSide::Sell, Price::new(49.99, 2), &book, &mut yes()));
        assert!(!stop_triggered(OrderSide::Sell, Price::new(49.99, 2), &book, &mut no()));
        assert!(!stop_triggered(OrderSide::Sell, Price::new(49.50, 2), &book, &mut no()));
    }

    #[test]
    fn test_stop_marketable_buy() {
        let book = book(50.00, 50.02);
        assert!(stop_marketable(OrderSide::Buy, Price::new(50.02, 2), &book));
        assert!(stop_marketable(OrderSide::Buy, Price::new(50.01, 2), &book));
        assert!(!stop_marketable(OrderSide::Buy, Price::new(50.03, 2), &book));
    }

    #[test]
    fn test_working_orders_snapshot_iteration() {
        let mut working = WorkingOrders::new();
        let instrument = InstrumentId::new("AAPL", Venue::new("NASDAQ"));
        for i in 0..3 {
            working.insert(Order::limit(
                ClientOrderId::new(format!("O-{i}")),
                instrument.clone(),
                StrategyId::new("S-1"),
                OrderSide::Buy,
                Quantity::new(1.0, 0),
                Price::new(100.0, 2),
                0,
            ));
        }
        let snapshot = working.snapshot_ids(&instrument);
        assert_eq!(snapshot.len(), 3);
        // Removing during the "pass" leaves the snapshot intact.
        working.remove(&snapshot[1]);
        assert_eq!(snapshot.len(), 3);
        assert_eq!(working.snapshot_ids(&instrument).len(), 2);
        assert!(!working.contains(&snapshot[1]));
    }
}
