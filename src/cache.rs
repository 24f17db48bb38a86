//! Cache
//!
//! In-memory store of instruments, orders, positions, and account state,
//! materialized from the execution event stream. Strategies receive this
//! as a read-only view; only the engine's event application path mutates
//! it.

use crate::data::QuoteTick;
use crate::events::{BalanceSnapshot, ExecutionEvent};
use crate::identifiers::{AccountId, ClientOrderId, InstrumentId, PositionId, StrategyId};
use crate::instrument::Instrument;
use crate::orders::{Order, OrderStatus};
use crate::position::PositionSnapshot;
use std::collections::HashMap;

/// Read-model of the run's trading state.
#[derive(Debug, Default)]
pub struct Cache {
    instruments: HashMap<InstrumentId, Instrument>,
    orders: HashMap<ClientOrderId, Order>,
    orders_by_strategy: HashMap<StrategyId, Vec<ClientOrderId>>,
    positions: HashMap<PositionId, PositionSnapshot>,
    accounts: HashMap<AccountId, Vec<BalanceSnapshot>>,
    quotes: HashMap<InstrumentId, QuoteTick>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    // --- registration (engine only) ---

    pub(crate) fn add_instrument(&mut self, instrument: Instrument) {
        self.instruments.insert(instrument.id.clone(), instrument);
    }

    pub(crate) fn add_order(&mut self, order: Order) {
        self.orders_by_strategy
            .entry(order.strategy_id.clone())
            .or_default()
            .push(order.client_order_id.clone());
        self.orders.insert(order.client_order_id.clone(), order);
    }

    pub(crate) fn update_quote(&mut self, quote: &QuoteTick) {
        self.quotes.insert(quote.instrument_id.clone(), quote.clone());
    }

    /// Fold an execution event into the read-model. Statuses are assigned
    /// directly: the venue already validated every transition, and a read
    /// model must never abort the run.
    pub(crate) fn apply(&mut self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::OrderSubmitted { client_order_id, ts, .. } => {
                self.set_status(client_order_id, OrderStatus::Submitted, *ts);
            }
            ExecutionEvent::OrderAccepted {
                client_order_id,
                venue_order_id,
                ts,
                ..
            } => {
                self.with_order(client_order_id, |o| {
                    o.venue_order_id = Some(venue_order_id.clone());
                });
                self.set_status(client_order_id, OrderStatus::Accepted, *ts);
            }
            ExecutionEvent::OrderRejected { client_order_id, ts, .. } => {
                self.set_status(client_order_id, OrderStatus::Rejected, *ts);
            }
            ExecutionEvent::OrderPendingReplace { client_order_id, ts, .. } => {
                self.set_status(client_order_id, OrderStatus::PendingUpdate, *ts);
            }
            ExecutionEvent::OrderUpdated {
                client_order_id,
                quantity,
                price,
                trigger_price,
                ts,
                ..
            } => {
                self.with_order(client_order_id, |o| {
                    o.quantity = *quantity;
                    o.price = *price;
                    o.trigger_price = *trigger_price;
                    o.status = if o.filled_qty.is_zero() {
                        OrderStatus::Accepted
                    } else {
                        OrderStatus::PartiallyFilled
                    };
                    o.ts_last = *ts;
                });
            }
            ExecutionEvent::OrderUpdateRejected { client_order_id, ts, .. } => {
                self.with_order(client_order_id, |o| {
                    if o.status == OrderStatus::PendingUpdate {
                        o.status = if o.filled_qty.is_zero() {
                            OrderStatus::Accepted
                        } else {
                            OrderStatus::PartiallyFilled
                        };
                        o.ts_last = *ts;
                    }
                });
            }
            ExecutionEvent::OrderPendingCancel { client_order_id, ts, .. } => {
                self.set_status(client_order_id, OrderStatus::PendingCancel, *ts);
            }
            ExecutionEvent::OrderCanceled { client_order_id, ts, .. } => {
                self.set_status(client_order_id, OrderStatus::Canceled, *ts);
            }
            ExecutionEvent::OrderCancelRejected { .. } => {}
            ExecutionEvent::OrderTriggered { client_order_id, ts, .. } => {
                self.with_order(client_order_id, |o| o.is_triggered = true);
                self.set_status(client_order_id, OrderStatus::Triggered, *ts);
            }
            ExecutionEvent::OrderExpired { client_order_id, ts, .. } => {
                self.set_status(client_order_id, OrderStatus::Expired, *ts);
            }
            ExecutionEvent::OrderFilled {
                client_order_id,
                position_id,
                last_qty,
                last_px,
                ts,
                ..
            } => {
                self.with_order(client_order_id, |o| {
                    if o.position_id.is_none() {
                        o.position_id = position_id.clone();
                    }
                    let prev = o.filled_qty.as_f64();
                    let fill = last_qty.as_f64();
                    let total = prev + fill;
                    o.avg_px = Some(match o.avg_px {
                        Some(avg) if total > 0.0 => {
                            (avg * prev + last_px.as_f64() * fill) / total
                        }
                        _ => last_px.as_f64(),
                    });
                    o.filled_qty += *last_qty;
                    o.status = if o.filled_qty.raw >= o.quantity.raw {
                        OrderStatus::Filled
                    } else {
                        OrderStatus::PartiallyFilled
                    };
                    o.ts_last = *ts;
                });
            }
            ExecutionEvent::PositionOpened { position, .. }
            | ExecutionEvent::PositionChanged { position, .. }
            | ExecutionEvent::PositionClosed { position, .. } => {
                self.positions.insert(position.id.clone(), position.clone());
            }
            ExecutionEvent::AccountState {
                account_id,
                balances,
                ..
            } => {
                self.accounts.insert(account_id.clone(), balances.clone());
            }
        }
    }

    fn with_order(&mut self, id: &ClientOrderId, apply: impl FnOnce(&mut Order)) {
        if let Some(order) = self.orders.get_mut(id) {
            apply(order);
        }
    }

    fn set_status(&mut self, id: &ClientOrderId, status: OrderStatus, ts: crate::clock::Nanos) {
        self.with_order(id, |o| {
            o.status = status;
            o.ts_last = ts;
        });
    }

    // --- read surface ---

    pub fn instrument(&self, id: &InstrumentId) -> Option<&Instrument> {
        self.instruments.get(id)
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.values()
    }

    pub fn order(&self, id: &ClientOrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn orders_for_strategy(&self, strategy_id: &StrategyId) -> Vec<&Order> {
        self.orders_by_strategy
            .get(strategy_id)
            .map(|ids| ids.iter().filter_map(|id| self.orders.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values().filter(|o| o.is_working())
    }

    pub fn position(&self, id: &PositionId) -> Option<&PositionSnapshot> {
        self.positions.get(id)
    }

    pub fn positions(&self) -> impl Iterator<Item = &PositionSnapshot> {
        self.positions.values()
    }

    pub fn account_balances(&self, id: &AccountId) -> Option<&Vec<BalanceSnapshot>> {
        self.accounts.get(id)
    }

    pub fn quote(&self, id: &InstrumentId) -> Option<&QuoteTick> {
        self.quotes.get(id)
    }

    /// Clear run state; registered instruments survive a reset.
    pub(crate) fn reset(&mut self) {
        self.orders.clear();
        self.orders_by_strategy.clear();
        self.positions.clear();
        self.accounts.clear();
        self.quotes.clear();
    }
}
