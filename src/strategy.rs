//! Strategy Harness
//!
//! The trait strategies implement and the per-callback context they act
//! through. Commands are buffered on the context and routed by the engine
//! after the callback returns; effects come back as events. Strategies
//! must never block or consult wall-clock time - `ctx.ts` is the only
//! clock.

use crate::cache::Cache;
use crate::clock::{Nanos, TestClock, TimeEvent};
use crate::data::{
    Bar, GenericData, OrderBookDelta, OrderBookSnapshot, QuoteTick, TradeTick,
};
use crate::events::ExecutionEvent;
use crate::identifiers::{ClientOrderId, StrategyId};
use crate::orders::Order;
use crate::types::{Price, Quantity};
use crate::venue::TradingCommand;

/// Bracket composite: entry plus protective stop and optional target.
#[derive(Debug, Clone)]
pub struct BracketOrder {
    pub entry: Order,
    pub stop_loss: Order,
    pub take_profit: Option<Order>,
}

/// Per-callback strategy context.
pub struct StrategyContext<'a> {
    /// Read-only view of orders, positions, balances, and instruments.
    pub cache: &'a Cache,
    /// The strategy's own clock, for alerts and timers.
    pub clock: &'a mut TestClock,
    pub strategy_id: StrategyId,
    /// Current simulation time.
    pub ts: Nanos,
    pub(crate) commands: Vec<TradingCommand>,
}

impl<'a> StrategyContext<'a> {
    pub(crate) fn new(
        cache: &'a Cache,
        clock: &'a mut TestClock,
        strategy_id: StrategyId,
        ts: Nanos,
    ) -> Self {
        Self {
            cache,
            clock,
            strategy_id,
            ts,
            commands: Vec::new(),
        }
    }

    /// Submit a single order to its instrument's venue.
    pub fn submit_order(&mut self, order: Order) {
        self.commands.push(TradingCommand::SubmitOrder {
            order,
            position_id: None,
        });
    }

    /// Submit a bracket; the exits stay latent until the entry fills.
    pub fn submit_bracket(&mut self, bracket: BracketOrder) {
        self.commands.push(TradingCommand::SubmitBracket {
            entry: bracket.entry,
            stop_loss: bracket.stop_loss,
            take_profit: bracket.take_profit,
        });
    }

    /// Submit two orders linked one-cancels-other.
    pub fn submit_oco_pair(&mut self, first: Order, second: Order) {
        self.commands
            .push(TradingCommand::SubmitOcoPair { first, second });
    }

    /// Amend a working order's quantity and/or prices.
    pub fn update_order(
        &mut self,
        client_order_id: ClientOrderId,
        quantity: Option<Quantity>,
        price: Option<Price>,
        trigger_price: Option<Price>,
    ) {
        self.commands.push(TradingCommand::UpdateOrder {
            client_order_id,
            strategy_id: self.strategy_id.clone(),
            quantity,
            price,
            trigger_price,
        });
    }

    /// Cancel a working order.
    pub fn cancel_order(&mut self, client_order_id: ClientOrderId) {
        self.commands.push(TradingCommand::CancelOrder {
            client_order_id,
            strategy_id: self.strategy_id.clone(),
        });
    }

    /// Register a one-shot alert at an absolute instant.
    pub fn set_time_alert_ns(&mut self, name: impl Into<String>, alert_time: Nanos) {
        self.clock.set_time_alert_ns(name, alert_time);
    }

    /// Register a periodic timer.
    pub fn set_timer_ns(
        &mut self,
        name: impl Into<String>,
        interval_ns: Nanos,
        stop_time: Option<Nanos>,
    ) {
        let start = self.ts;
        self.clock.set_timer_ns(name, interval_ns, start, stop_time);
    }

    pub fn cancel_timer(&mut self, name: &str) -> bool {
        self.clock.cancel_timer(name)
    }
}

/// Trading logic driven by the replay loop. All handlers default to
/// no-ops; implement the ones the strategy cares about.
pub trait Strategy {
    /// Stable identifier used for event routing.
    fn id(&self) -> StrategyId;

    fn on_start(&mut self, _ctx: &mut StrategyContext) {}

    fn on_stop(&mut self, _ctx: &mut StrategyContext) {}

    /// Return internal state to its pre-run values (engine reset).
    fn on_reset(&mut self) {}

    fn on_quote(&mut self, _ctx: &mut StrategyContext, _quote: &QuoteTick) {}

    fn on_trade(&mut self, _ctx: &mut StrategyContext, _trade: &TradeTick) {}

    fn on_bar(&mut self, _ctx: &mut StrategyContext, _bar: &Bar) {}

    fn on_book_delta(&mut self, _ctx: &mut StrategyContext, _delta: &OrderBookDelta) {}

    fn on_book_snapshot(&mut self, _ctx: &mut StrategyContext, _snapshot: &OrderBookSnapshot) {}

    fn on_data(&mut self, _ctx: &mut StrategyContext, _data: &GenericData) {}

    /// Order, position, and account events.
    fn on_event(&mut self, _ctx: &mut StrategyContext, _event: &ExecutionEvent) {}

    /// A registered alert or timer fired.
    fn on_time_event(&mut self, _ctx: &mut StrategyContext, _event: &TimeEvent) {}
}
