//! Execution Events
//!
//! Lifecycle events emitted by simulated venues and the bookkeeping layer,
//! delivered to strategies and published on the message bus. Every event
//! carries enough identity to route without back-pointers.

use crate::clock::Nanos;
use crate::data::OrderSide;
use crate::identifiers::{
    AccountId, ClientOrderId, InstrumentId, PositionId, StrategyId, TradeId, VenueOrderId,
};
use crate::instrument::LiquiditySide;
use crate::position::PositionSnapshot;
use crate::types::{Money, Price, Quantity};
use serde::{Deserialize, Serialize};

/// One currency balance inside an ACCOUNT_STATE event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub total: Money,
    pub locked: Money,
    pub free: Money,
}

/// Venue and bookkeeping events, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
    OrderSubmitted {
        client_order_id: ClientOrderId,
        instrument_id: InstrumentId,
        strategy_id: StrategyId,
        ts: Nanos,
    },
    OrderAccepted {
        client_order_id: ClientOrderId,
        venue_order_id: VenueOrderId,
        strategy_id: StrategyId,
        ts: Nanos,
    },
    OrderRejected {
        client_order_id: ClientOrderId,
        strategy_id: StrategyId,
        reason: String,
        ts: Nanos,
    },
    OrderPendingReplace {
        client_order_id: ClientOrderId,
        strategy_id: StrategyId,
        ts: Nanos,
    },
    OrderUpdated {
        client_order_id: ClientOrderId,
        strategy_id: StrategyId,
        quantity: Quantity,
        price: Option<Price>,
        trigger_price: Option<Price>,
        ts: Nanos,
    },
    OrderUpdateRejected {
        client_order_id: ClientOrderId,
        strategy_id: StrategyId,
        reason: String,
        ts: Nanos,
    },
    OrderPendingCancel {
        client_order_id: ClientOrderId,
        strategy_id: StrategyId,
        ts: Nanos,
    },
    OrderCanceled {
        client_order_id: ClientOrderId,
        strategy_id: StrategyId,
        reason: Option<String>,
        ts: Nanos,
    },
    OrderCancelRejected {
        client_order_id: ClientOrderId,
        strategy_id: StrategyId,
        reason: String,
        ts: Nanos,
    },
    OrderTriggered {
        client_order_id: ClientOrderId,
        strategy_id: StrategyId,
        ts: Nanos,
    },
    OrderExpired {
        client_order_id: ClientOrderId,
        strategy_id: StrategyId,
        ts: Nanos,
    },
    OrderFilled {
        client_order_id: ClientOrderId,
        venue_order_id: VenueOrderId,
        trade_id: TradeId,
        instrument_id: InstrumentId,
        strategy_id: StrategyId,
        /// Hidden (None) under NETTING; populated under HEDGING.
        position_id: Option<PositionId>,
        side: OrderSide,
        last_qty: Quantity,
        last_px: Price,
        liquidity_side: LiquiditySide,
        commission: Money,
        ts: Nanos,
    },
    PositionOpened {
        position: PositionSnapshot,
        ts: Nanos,
    },
    PositionChanged {
        position: PositionSnapshot,
        ts: Nanos,
    },
    PositionClosed {
        position: PositionSnapshot,
        ts: Nanos,
    },
    AccountState {
        account_id: AccountId,
        balances: Vec<BalanceSnapshot>,
        /// Monotone per-account sequence.
        version: u64,
        ts: Nanos,
    },
}

impl ExecutionEvent {
    /// Strategy the event routes to. Account state broadcasts to all.
    pub fn strategy_id(&self) -> Option<&StrategyId> {
        use ExecutionEvent::*;
        match self {
            OrderSubmitted { strategy_id, .. }
            | OrderAccepted { strategy_id, .. }
            | OrderRejected { strategy_id, .. }
            | OrderPendingReplace { strategy_id, .. }
            | OrderUpdated { strategy_id, .. }
            | OrderUpdateRejected { strategy_id, .. }
            | OrderPendingCancel { strategy_id, .. }
            | OrderCanceled { strategy_id, .. }
            | OrderCancelRejected { strategy_id, .. }
            | OrderTriggered { strategy_id, .. }
            | OrderExpired { strategy_id, .. }
            | OrderFilled { strategy_id, .. } => Some(strategy_id),
            PositionOpened { position, .. }
            | PositionChanged { position, .. }
            | PositionClosed { position, .. } => Some(&position.strategy_id),
            AccountState { .. } => None,
        }
    }

    /// Client order id for order-scoped events.
    pub fn client_order_id(&self) -> Option<&ClientOrderId> {
        use ExecutionEvent::*;
        match self {
            OrderSubmitted {
                client_order_id, ..
            }
            | OrderAccepted {
                client_order_id, ..
            }
            | OrderRejected {
                client_order_id, ..
            }
            | OrderPendingReplace {
                client_order_id, ..
            }
            | OrderUpdated {
                client_order_id, ..
            }
            | OrderUpdateRejected {
                client_order_id, ..
            }
            | OrderPendingCancel {
                client_order_id, ..
            }
            | OrderCanceled {
                client_order_id, ..
            }
            | OrderCancelRejected {
                client_order_id, ..
            }
            | OrderTriggered {
                client_order_id, ..
            }
            | OrderExpired {
                client_order_id, ..
            }
            | OrderFilled {
                client_order_id, ..
            } => Some(client_order_id),
            _ => None,
        }
    }

    /// Event timestamp.
    pub fn ts(&self) -> Nanos {
        use ExecutionEvent::*;
        match self {
            OrderSubmitted { ts, .. }
            | OrderAccepted { ts, .. }
            | OrderRejected { ts, .. }
            | OrderPendingReplace { ts, .. }
            | OrderUpdated { ts, .. }
            | OrderUpdateRejected { ts, .. }
            | OrderPendingCancel { ts, .. }
            | OrderCanceled { ts, .. }
            | OrderCancelRejected { ts, .. }
            | OrderTriggered { ts, .. }
            | OrderExpired { ts, .. }
            | OrderFilled { ts, .. }
            | PositionOpened { ts, .. }
            | PositionChanged { ts, .. }
            | PositionClosed { ts, .. }
            | AccountState { ts, .. } => *ts,
        }
    }

    /// Message-bus topic the engine publishes this event under.
    pub fn topic(&self) -> &'static str {
        use ExecutionEvent::*;
        match self {
            OrderSubmitted { .. } => "events.order.submitted",
            OrderAccepted { .. } => "events.order.accepted",
            OrderRejected { .. } => "events.order.rejected",
            OrderPendingReplace { .. } => "events.order.pending_replace",
            OrderUpdated { .. } => "events.order.updated",
            OrderUpdateRejected { .. } => "events.order.update_rejected",
            OrderPendingCancel { .. } => "events.order.pending_cancel",
            OrderCanceled { .. } => "events.order.canceled",
            OrderCancelRejected { .. } => "events.order.cancel_rejected",
            OrderTriggered { .. } => "events.order.triggered",
            OrderExpired { .. } => "events.order.expired",
            OrderFilled { .. } => "events.order.filled",
            PositionOpened { .. } => "events.position.opened",
            PositionChanged { .. } => "events.position.changed",
            PositionClosed { .. } => "events.position.closed",
            AccountState { .. } => "events.account.state",
        }
    }
}
