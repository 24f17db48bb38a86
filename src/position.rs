//! Positions
//!
//! Net position bookkeeping per (strategy, instrument). Signed quantity is
//! kept as a raw fixed-point integer; average prices are size-weighted over
//! the opening and closing legs. A position closes when the net quantity
//! reaches zero.

use crate::clock::Nanos;
use crate::data::OrderSide;
use crate::identifiers::{InstrumentId, PositionId, StrategyId};
use crate::instrument::Instrument;
use crate::types::{Currency, Money, Price, Quantity, FIXED_SCALE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Direction of a net position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Flat,
    Long,
    Short,
}

/// Immutable view of a position, embedded in position events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub id: PositionId,
    pub instrument_id: InstrumentId,
    pub strategy_id: StrategyId,
    pub side: PositionSide,
    pub quantity: Quantity,
    pub entry: OrderSide,
    pub avg_px_open: f64,
    pub avg_px_close: Option<f64>,
    pub realized_pnl: Money,
    pub ts_opened: Nanos,
    pub ts_closed: Option<Nanos>,
}

/// Mutable position state owned by the venue's bookkeeping.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: PositionId,
    pub instrument_id: InstrumentId,
    pub strategy_id: StrategyId,
    /// Side the position was entered on.
    pub entry: OrderSide,
    /// Net signed quantity in raw fixed-point units (long > 0).
    signed_raw: i64,
    size_precision: u8,
    /// Size-weighted average of opening fills.
    pub avg_px_open: f64,
    /// Size-weighted average of closing fills.
    pub avg_px_close: Option<f64>,
    opened_qty: f64,
    closed_qty: f64,
    pub realized_pnl: Money,
    /// Commissions accumulated per currency code.
    pub commissions: BTreeMap<String, Money>,
    pub multiplier: f64,
    pub is_inverse: bool,
    pub settlement_currency: Currency,
    pub ts_opened: Nanos,
    pub ts_last: Nanos,
    pub ts_closed: Option<Nanos>,
}

impl Position {
    /// Open a position from its first fill.
    pub fn new(
        instrument: &Instrument,
        id: PositionId,
        strategy_id: StrategyId,
        side: OrderSide,
        quantity: Quantity,
        price: Price,
        ts: Nanos,
    ) -> Self {
        let signed = match side {
            OrderSide::Buy => quantity.raw as i64,
            OrderSide::Sell => -(quantity.raw as i64),
        };
        Self {
            id,
            instrument_id: instrument.id.clone(),
            strategy_id,
            entry: side,
            signed_raw: signed,
            size_precision: instrument.size_precision,
            avg_px_open: price.as_f64(),
            avg_px_close: None,
            opened_qty: quantity.as_f64(),
            closed_qty: 0.0,
            realized_pnl: Money::zero(instrument.settlement_currency.clone()),
            commissions: BTreeMap::new(),
            multiplier: instrument.multiplier,
            is_inverse: instrument.is_inverse,
            settlement_currency: instrument.settlement_currency.clone(),
            ts_opened: ts,
            ts_last: ts,
            ts_closed: None,
        }
    }

    #[inline]
    pub fn side(&self) -> PositionSide {
        if self.signed_raw > 0 {
            PositionSide::Long
        } else if self.signed_raw < 0 {
            PositionSide::Short
        } else {
            PositionSide::Flat
        }
    }

    /// Net absolute quantity.
    #[inline]
    pub fn quantity(&self) -> Quantity {
        Quantity::from_raw(self.signed_raw.unsigned_abs(), self.size_precision)
    }

    #[inline]
    pub fn signed_qty(&self) -> f64 {
        self.signed_raw as f64 / FIXED_SCALE as f64
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.signed_raw != 0
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.signed_raw == 0
    }

    /// Quantity a fill on `side` would close against this position.
    pub fn closing_qty(&self, side: OrderSide) -> Quantity {
        let closes = match side {
            OrderSide::Buy => self.signed_raw < 0,
            OrderSide::Sell => self.signed_raw > 0,
        };
        if closes {
            self.quantity()
        } else {
            Quantity::zero(self.size_precision)
        }
    }

    /// PnL for closing `quantity` against an `avg_open` entry at `price`,
    /// signed from the perspective of the entry side.
    pub fn calculate_pnl(&self, avg_open: f64, price: f64, quantity: Quantity) -> Money {
        let qty = quantity.as_f64();
        let points = if self.is_inverse {
            // Inverse contracts settle in base currency.
            match self.entry {
                OrderSide::Buy => 1.0 / avg_open - 1.0 / price,
                OrderSide::Sell => 1.0 / price - 1.0 / avg_open,
            }
        } else {
            match self.entry {
                OrderSide::Buy => price - avg_open,
                OrderSide::Sell => avg_open - price,
            }
        };
        Money::new(points * qty * self.multiplier, self.settlement_currency.clone())
    }

    /// Apply a fill, realizing PnL on any closing portion. Returns the
    /// realized PnL delta in the settlement currency.
    pub fn apply_fill(
        &mut self,
        side: OrderSide,
        quantity: Quantity,
        price: Price,
        ts: Nanos,
    ) -> Money {
        let signed_fill = match side {
            OrderSide::Buy => quantity.raw as i64,
            OrderSide::Sell => -(quantity.raw as i64),
        };
        let old = self.signed_raw;
        let px = price.as_f64();
        let mut realized = Money::zero(self.settlement_currency.clone());

        let same_direction = old == 0 || (old > 0) == (signed_fill > 0);
        if same_direction {
            // Opening or adding.
            let qty = quantity.as_f64();
            let total = self.opened_qty + qty;
            if total > 0.0 {
                self.avg_px_open = (self.avg_px_open * self.opened_qty + px * qty) / total;
            }
            self.opened_qty = total;
            self.signed_raw = old + signed_fill;
        } else {
            // Closing, possibly flipping.
            let closing_raw = quantity.raw.min(old.unsigned_abs());
            let closing = Quantity::from_raw(closing_raw, self.size_precision);
            realized = self.calculate_pnl(self.avg_px_open, px, closing);
            self.realized_pnl = self.realized_pnl.add(&realized);

            let qty = closing.as_f64();
            let total = self.closed_qty + qty;
            self.avg_px_close = Some(match self.avg_px_close {
                Some(avg) if total > 0.0 => (avg * self.closed_qty + px * qty) / total,
                _ => px,
            });
            self.closed_qty = total;
            self.signed_raw = old + signed_fill;

            // A flip re-opens on the other side at the fill price.
            if old.signum() != 0 && self.signed_raw.signum() == -old.signum() {
                self.entry = side;
                self.avg_px_open = px;
                self.opened_qty = self.quantity().as_f64();
                self.closed_qty = 0.0;
            }
        }

        self.ts_last = ts;
        if self.signed_raw == 0 {
            self.ts_closed = Some(ts);
        } else {
            self.ts_closed = None;
        }
        realized
    }

    /// Record a commission against this position (always accumulated, even
    /// for frozen accounts).
    pub fn add_commission(&mut self, commission: &Money) {
        let entry = self
            .commissions
            .entry(commission.currency.code.clone())
            .or_insert_with(|| Money::zero(commission.currency.clone()));
        *entry = entry.add(commission);
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            id: self.id.clone(),
            instrument_id: self.instrument_id.clone(),
            strategy_id: self.strategy_id.clone(),
            side: self.side(),
            quantity: self.quantity(),
            entry: self.entry,
            avg_px_open: self.avg_px_open,
            avg_px_close: self.avg_px_close,
            realized_pnl: self.realized_pnl.clone(),
            ts_opened: self.ts_opened,
            ts_closed: self.ts_closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::Venue;
    use crate::instrument::Instrument;

    fn instrument() -> Instrument {
        Instrument::equity(
            InstrumentId::new("AAPL", Venue::new("NASDAQ")),
            2,
            0.01,
            Currency::usd(),
        )
    }

    fn open_long(qty: f64, px: f64) -> Position {
        Position::new(
            &instrument(),
            PositionId::new("P-1"),
            StrategyId::new("S-1"),
            OrderSide::Buy,
            Quantity::new(qty, 0),
            Price::new(px, 2),
            1_000,
        )
    }

    #[test]
    fn test_open_long() {
        let pos = open_long(10.0, 100.0);
        assert_eq!(pos.side(), PositionSide::Long);
        assert_eq!(pos.quantity(), Quantity::new(10.0, 0));
        assert_eq!(pos.avg_px_open, 100.0);
        assert!(pos.is_open());
    }

    #[test]
    fn test_add_to_position_updates_weighted_avg() {
        let mut pos = open_long(10.0, 100.0);
        pos.apply_fill(OrderSide::Buy, Quantity::new(10.0, 0), Price::new(102.0, 2), 2_000);
        assert_eq!(pos.quantity(), Quantity::new(20.0, 0));
        assert!((pos.avg_px_open - 101.0).abs() < 1e-9);
    }

    #[test]
    fn test_close_realizes_pnl() {
        let mut pos = open_long(10.0, 100.0);
        let realized =
            pos.apply_fill(OrderSide::Sell, Quantity::new(10.0, 0), Price::new(101.0, 2), 2_000);
        assert!(pos.is_closed());
        assert_eq!(pos.side(), PositionSide::Flat);
        assert_eq!(realized, Money::new(10.0, Currency::usd()));
        assert_eq!(pos.realized_pnl, Money::new(10.0, Currency::usd()));
        assert_eq!(pos.ts_closed, Some(2_000));
    }

    #[test]
    fn test_partial_close() {
        let mut pos = open_long(10.0, 100.0);
        let realized =
            pos.apply_fill(OrderSide::Sell, Quantity::new(4.0, 0), Price::new(102.0, 2), 2_000);
        assert!(pos.is_open());
        assert_eq!(pos.quantity(), Quantity::new(6.0, 0));
        assert_eq!(realized, Money::new(8.0, Currency::usd()));
        assert_eq!(pos.avg_px_close, Some(102.0));
    }

    #[test]
    fn test_short_pnl_sign() {
        let inst = instrument();
        let mut pos = Position::new(
            &inst,
            PositionId::new("P-2"),
            StrategyId::new("S-1"),
            OrderSide::Sell,
            Quantity::new(5.0, 0),
            Price::new(50.0, 2),
            0,
        );
        assert_eq!(pos.side(), PositionSide::Short);
        let realized =
            pos.apply_fill(OrderSide::Buy, Quantity::new(5.0, 0), Price::new(49.0, 2), 1);
        assert_eq!(realized, Money::new(5.0, Currency::usd()));
    }

    #[test]
    fn test_flip_reopens_other_side() {
        let mut pos = open_long(10.0, 100.0);
        pos.apply_fill(OrderSide::Sell, Quantity::new(15.0, 0), Price::new(101.0, 2), 2_000);
        assert_eq!(pos.side(), PositionSide::Short);
        assert_eq!(pos.quantity(), Quantity::new(5.0, 0));
        assert_eq!(pos.entry, OrderSide::Sell);
        assert_eq!(pos.avg_px_open, 101.0);
        // Realized PnL covers only the closed 10.
        assert_eq!(pos.realized_pnl, Money::new(10.0, Currency::usd()));
    }

    #[test]
    fn test_commission_accumulates_per_currency() {
        let mut pos = open_long(10.0, 100.0);
        pos.add_commission(&Money::new(1.0, Currency::usd()));
        pos.add_commission(&Money::new(0.5, Currency::usd()));
        assert_eq!(
            pos.commissions.get("USD"),
            Some(&Money::new(1.5, Currency::usd()))
        );
    }
}
