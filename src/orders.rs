//! Orders
//!
//! The order record (tagged union over Market/Limit/StopMarket/StopLimit)
//! and its lifecycle state machine. Invalid transitions are programmer
//! errors and abort with a diagnostic; command-level refusals are rejection
//! events, not transitions.

use crate::clock::Nanos;
use crate::data::OrderSide;
use crate::identifiers::{ClientOrderId, InstrumentId, PositionId, StrategyId, VenueOrderId};
use crate::types::{Price, Quantity};
use serde::{Deserialize, Serialize};

/// Order type tag. Dispatch in the matching engine is an exhaustive match
/// over this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    StopLimit,
}

/// Order lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Initialized,
    Submitted,
    Accepted,
    Rejected,
    PendingUpdate,
    PendingCancel,
    Triggered,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
}

impl OrderStatus {
    /// Terminal states admit no further transitions.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    /// Working orders participate in matching iteration. Orders parked in a
    /// pending update/cancel are skipped until the command resolves.
    #[inline]
    pub fn is_working(&self) -> bool {
        matches!(
            self,
            OrderStatus::Accepted | OrderStatus::Triggered | OrderStatus::PartiallyFilled
        )
    }
}

/// Allowed state-machine transitions.
fn transition_valid(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    match from {
        Initialized => matches!(to, Submitted),
        Submitted => matches!(to, Accepted | Rejected),
        Accepted => matches!(
            to,
            PendingUpdate
                | PendingCancel
                | Triggered
                | PartiallyFilled
                | Filled
                | Canceled
                | Expired
        ),
        PendingUpdate => matches!(to, Accepted | Rejected),
        PendingCancel => matches!(to, Canceled | Rejected),
        // Rejected covers a triggered post-only stop-limit whose limit
        // would take liquidity: the venue deletes and rejects it.
        Triggered => matches!(to, PartiallyFilled | Filled | Canceled | Expired | Rejected),
        PartiallyFilled => matches!(to, PartiallyFilled | Filled | Canceled | Expired),
        Filled | Canceled | Rejected | Expired => false,
    }
}

/// A strategy-issued order. Prices and quantities always conform to the
/// instrument precision (constructors take already-conformed values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: ClientOrderId,
    pub instrument_id: InstrumentId,
    pub strategy_id: StrategyId,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Quantity,
    /// Limit price (Limit / StopLimit).
    pub price: Option<Price>,
    /// Trigger price (StopMarket / StopLimit).
    pub trigger_price: Option<Price>,
    pub is_post_only: bool,
    /// StopLimit only: set once the stop has triggered.
    pub is_triggered: bool,
    /// GTD expiry; `None` means good-til-canceled.
    pub expire_time: Option<Nanos>,
    /// Assigned by the venue on accept.
    pub venue_order_id: Option<VenueOrderId>,
    /// Set on first fill (or pre-assigned for bracket children).
    pub position_id: Option<PositionId>,
    pub status: OrderStatus,
    pub filled_qty: Quantity,
    /// Size-weighted average fill price.
    pub avg_px: Option<f64>,
    pub ts_init: Nanos,
    pub ts_last: Nanos,
}

impl Order {
    fn base(
        client_order_id: ClientOrderId,
        instrument_id: InstrumentId,
        strategy_id: StrategyId,
        side: OrderSide,
        order_type: OrderType,
        quantity: Quantity,
        ts_init: Nanos,
    ) -> Self {
        debug_assert!(!quantity.is_zero(), "order quantity must be positive");
        let size_precision = quantity.precision;
        Self {
            client_order_id,
            instrument_id,
            strategy_id,
            side,
            order_type,
            quantity,
            price: None,
            trigger_price: None,
            is_post_only: false,
            is_triggered: false,
            expire_time: None,
            venue_order_id: None,
            position_id: None,
            status: OrderStatus::Initialized,
            filled_qty: Quantity::zero(size_precision),
            avg_px: None,
            ts_init,
            ts_last: ts_init,
        }
    }

    pub fn market(
        client_order_id: ClientOrderId,
        instrument_id: InstrumentId,
        strategy_id: StrategyId,
        side: OrderSide,
        quantity: Quantity,
        ts_init: Nanos,
    ) -> Self {
        Self::base(
            client_order_id,
            instrument_id,
            strategy_id,
            side,
            OrderType::Market,
            quantity,
            ts_init,
        )
    }

    pub fn limit(
        client_order_id: ClientOrderId,
        instrument_id: InstrumentId,
        strategy_id: StrategyId,
        side: OrderSide,
        quantity: Quantity,
        price: Price,
        ts_init: Nanos,
    ) -> Self {
        let mut order = Self::base(
            client_order_id,
            instrument_id,
            strategy_id,
            side,
            OrderType::Limit,
            quantity,
            ts_init,
        );
        order.price = Some(price);
        order
    }

    pub fn stop_market(
        client_order_id: ClientOrderId,
        instrument_id: InstrumentId,
        strategy_id: StrategyId,
        side: OrderSide,
        quantity: Quantity,
        trigger_price: Price,
        ts_init: Nanos,
    ) -> Self {
        let mut order = Self::base(
            client_order_id,
            instrument_id,
            strategy_id,
            side,
            OrderType::StopMarket,
            quantity,
            ts_init,
        );
        order.trigger_price = Some(trigger_price);
        order
    }

    pub fn stop_limit(
        client_order_id: ClientOrderId,
        instrument_id: InstrumentId,
        strategy_id: StrategyId,
        side: OrderSide,
        quantity: Quantity,
        trigger_price: Price,
        price: Price,
        ts_init: Nanos,
    ) -> Self {
        let mut order = Self::base(
            client_order_id,
            instrument_id,
            strategy_id,
            side,
            OrderType::StopLimit,
            quantity,
            ts_init,
        );
        order.trigger_price = Some(trigger_price);
        order.price = Some(price);
        order
    }

    pub fn post_only(mut self) -> Self {
        self.is_post_only = true;
        self
    }

    pub fn expires_at(mut self, expire_time: Nanos) -> Self {
        self.expire_time = Some(expire_time);
        self
    }

    pub fn with_position_id(mut self, position_id: PositionId) -> Self {
        self.position_id = Some(position_id);
        self
    }

    /// Apply a state transition. Panics on an invalid transition: the venue
    /// only drives the machine along legal edges, so a violation is a bug.
    pub fn apply(&mut self, to: OrderStatus, ts: Nanos) {
        assert!(
            transition_valid(self.status, to),
            "invalid order state transition {:?} -> {:?} for {}",
            self.status,
            to,
            self.client_order_id
        );
        self.status = to;
        self.ts_last = ts;
    }

    /// Record a fill, updating filled quantity, weighted average price, and
    /// status. `fill_qty` must not exceed the open quantity.
    pub fn fill(&mut self, fill_qty: Quantity, fill_px: Price, ts: Nanos) {
        debug_assert!(fill_qty.raw <= self.leaves_qty().raw, "overfill");
        let prev_filled = self.filled_qty.as_f64();
        let fill = fill_qty.as_f64();
        let total = prev_filled + fill;
        self.avg_px = Some(match self.avg_px {
            Some(avg) if total > 0.0 => (avg * prev_filled + fill_px.as_f64() * fill) / total,
            _ => fill_px.as_f64(),
        });
        self.filled_qty += fill_qty;

        let to = if self.filled_qty.raw >= self.quantity.raw {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.apply(to, ts);
    }

    /// Open (unfilled) quantity.
    #[inline]
    pub fn leaves_qty(&self) -> Quantity {
        Quantity::from_raw(
            self.quantity.raw.saturating_sub(self.filled_qty.raw),
            self.quantity.precision,
        )
    }

    #[inline]
    pub fn is_working(&self) -> bool {
        self.status.is_working()
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Stop orders carry their trigger; limit orders their price.
    #[inline]
    pub fn effective_trigger(&self) -> Option<Price> {
        self.trigger_price
    }
}
