//! Simulated Venue
//!
//! One virtual exchange: per-instrument books, the working-order arena,
//! command intake (optionally latency-delayed), match/trigger/expire
//! iteration, OCO and bracket linkage, and fill settlement through the
//! execution ledger. Lifecycle events accumulate in an output buffer the
//! engine drains after each step.

use crate::accounting::ExecutionLedger;
use crate::book::{BookLevelKind, OrderBook};
use crate::clock::Nanos;
use crate::config::{OmsType, VenueConfig};
use crate::data::{
    Bar, InstrumentStatusUpdate, MarketStatus, OrderBookDelta, OrderBookSnapshot, OrderSide,
    QuoteTick, TradeTick, VenueStatusUpdate,
};
use crate::errors::BacktestError;
use crate::events::ExecutionEvent;
use crate::identifiers::{ClientOrderId, InstrumentId, PositionId, StrategyId, TradeId, VenueOrderId};
use crate::instrument::{Instrument, LiquiditySide};
use crate::matching::{
    limit_marketable, limit_matched, stop_marketable, stop_triggered, MatchingStats, WorkingOrders,
};
use crate::fill_model::FillModel;
use crate::orders::{Order, OrderStatus, OrderType};
use crate::types::{Price, Quantity};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::{debug, warn};

/// Strategy-issued trading commands.
#[derive(Debug, Clone)]
pub enum TradingCommand {
    SubmitOrder {
        order: Order,
        position_id: Option<PositionId>,
    },
    SubmitBracket {
        entry: Order,
        stop_loss: Order,
        take_profit: Option<Order>,
    },
    /// Two standalone orders linked one-cancels-other.
    SubmitOcoPair {
        first: Order,
        second: Order,
    },
    UpdateOrder {
        client_order_id: ClientOrderId,
        strategy_id: StrategyId,
        quantity: Option<Quantity>,
        price: Option<Price>,
        trigger_price: Option<Price>,
    },
    CancelOrder {
        client_order_id: ClientOrderId,
        strategy_id: StrategyId,
    },
}

/// A latency-delayed command awaiting delivery.
#[derive(Debug)]
struct QueuedCommand {
    delivery_ts: Nanos,
    seq: u64,
    command: TradingCommand,
}

impl PartialEq for QueuedCommand {
    fn eq(&self, other: &Self) -> bool {
        self.delivery_ts == other.delivery_ts && self.seq == other.seq
    }
}

impl Eq for QueuedCommand {}

impl PartialOrd for QueuedCommand {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedCommand {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.delivery_ts
            .cmp(&other.delivery_ts)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// A simulated exchange with its own matching state and account.
pub struct SimulatedVenue {
    config: VenueConfig,
    instruments: HashMap<InstrumentId, Instrument>,
    books: HashMap<InstrumentId, OrderBook>,
    working: WorkingOrders,
    /// Bracket children awaiting the entry fill, by entry order id.
    latent_children: HashMap<ClientOrderId, Vec<ClientOrderId>>,
    latent_orders: HashMap<ClientOrderId, Order>,
    /// Symmetric OCO partner table.
    oco_partners: HashMap<ClientOrderId, ClientOrderId>,
    /// OCO members whose partner terminated before they were processed;
    /// rejected on arrival with the recorded reason.
    oco_orphans: HashMap<ClientOrderId, String>,
    /// Orders linked to a venue position id, canceled when it closes.
    position_links: HashMap<PositionId, Vec<ClientOrderId>>,
    inflight: BinaryHeap<Reverse<QueuedCommand>>,
    command_seq: u64,
    fill_model: FillModel,
    ledger: ExecutionLedger,
    events_out: Vec<ExecutionEvent>,
    seen_order_ids: HashSet<ClientOrderId>,
    order_id_count: u64,
    trade_id_count: u64,
    status: MarketStatus,
    instrument_status: HashMap<InstrumentId, MarketStatus>,
    pub stats: MatchingStats,
    ts_now: Nanos,
}

impl SimulatedVenue {
    pub fn new(config: VenueConfig) -> Result<Self, BacktestError> {
        let fill_model = FillModel::new(config.fill_model)?;
        let ledger = ExecutionLedger::new(
            config.venue.clone(),
            config.oms_type,
            config.account_type,
            config.base_currency.clone(),
            config.starting_balances.clone(),
            config.frozen_account,
        )?;
        Ok(Self {
            config,
            instruments: HashMap::new(),
            books: HashMap::new(),
            working: WorkingOrders::new(),
            latent_children: HashMap::new(),
            latent_orders: HashMap::new(),
            oco_partners: HashMap::new(),
            oco_orphans: HashMap::new(),
            position_links: HashMap::new(),
            inflight: BinaryHeap::new(),
            command_seq: 0,
            fill_model,
            ledger,
            events_out: Vec::new(),
            seen_order_ids: HashSet::new(),
            order_id_count: 0,
            trade_id_count: 0,
            status: MarketStatus::Open,
            instrument_status: HashMap::new(),
            stats: MatchingStats::default(),
            ts_now: 0,
        })
    }

    #[inline]
    pub fn venue(&self) -> &crate::identifiers::Venue {
        &self.config.venue
    }

    #[inline]
    pub fn oms_type(&self) -> OmsType {
        self.config.oms_type
    }

    pub fn ledger(&self) -> &ExecutionLedger {
        &self.ledger
    }

    pub fn working_orders(&self) -> &WorkingOrders {
        &self.working
    }

    pub fn add_instrument(&mut self, instrument: Instrument) -> Result<(), BacktestError> {
        if self.instruments.contains_key(&instrument.id) {
            return Err(BacktestError::DuplicateInstrument(instrument.id.to_string()));
        }
        self.books.insert(
            instrument.id.clone(),
            OrderBook::new(self.config.book_level, instrument.price_precision),
        );
        self.instruments.insert(instrument.id.clone(), instrument);
        Ok(())
    }

    pub fn instrument(&self, id: &InstrumentId) -> Option<&Instrument> {
        self.instruments.get(id)
    }

    pub fn best_bid(&self, id: &InstrumentId) -> Option<Price> {
        self.books.get(id).and_then(|b| b.best_bid_price())
    }

    pub fn best_ask(&self, id: &InstrumentId) -> Option<Price> {
        self.books.get(id).and_then(|b| b.best_ask_price())
    }

    /// Take everything emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<ExecutionEvent> {
        std::mem::take(&mut self.events_out)
    }

    pub fn has_pending_commands(&self, ts: Nanos) -> bool {
        self.inflight
            .peek()
            .map_or(false, |Reverse(cmd)| cmd.delivery_ts <= ts)
    }

    /// Emit the opening account state.
    pub fn emit_initial_account_state(&mut self, ts: Nanos) {
        let event = self.ledger.initial_state_event(ts);
        self.events_out.push(event);
    }

    // =========================================================================
    // MARKET DATA
    // =========================================================================

    pub fn process_quote_tick(&mut self, quote: &QuoteTick) -> Result<(), BacktestError> {
        self.ts_now = quote.ts_init;
        if let Some(book) = self.books.get_mut(&quote.instrument_id) {
            book.apply_quote(quote);
        }
        self.iterate_matching(&quote.instrument_id.clone())
    }

    pub fn process_trade_tick(&mut self, trade: &TradeTick) -> Result<(), BacktestError> {
        self.ts_now = trade.ts_init;
        if let Some(book) = self.books.get_mut(&trade.instrument_id) {
            book.apply_trade(trade);
        }
        self.iterate_matching(&trade.instrument_id.clone())
    }

    /// Replay a bar as its O -> H -> L -> C legs so resting orders can
    /// trigger intra-bar. Each leg refreshes top-of-book at the leg price
    /// with a quarter of the bar volume.
    pub fn process_bar(&mut self, bar: &Bar) -> Result<(), BacktestError> {
        self.ts_now = bar.ts_init;
        let instrument_id = bar.bar_type.instrument_id.clone();
        let leg_size = Quantity::from_raw(bar.volume.raw / 4, bar.volume.precision);
        for px in [bar.open, bar.high, bar.low, bar.close] {
            if let Some(book) = self.books.get_mut(&instrument_id) {
                book.apply_quote(&QuoteTick {
                    instrument_id: instrument_id.clone(),
                    bid: px,
                    ask: px,
                    bid_size: leg_size,
                    ask_size: leg_size,
                    ts_event: bar.ts_event,
                    ts_init: bar.ts_init,
                });
            }
            self.iterate_matching(&instrument_id)?;
        }
        Ok(())
    }

    pub fn process_order_book_delta(&mut self, delta: &OrderBookDelta) -> Result<(), BacktestError> {
        self.ts_now = delta.ts_init;
        if let Some(book) = self.books.get_mut(&delta.instrument_id) {
            book.apply_delta(delta);
        }
        self.iterate_matching(&delta.instrument_id.clone())
    }

    pub fn process_order_book_snapshot(
        &mut self,
        snapshot: &OrderBookSnapshot,
    ) -> Result<(), BacktestError> {
        self.ts_now = snapshot.ts_init;
        if let Some(book) = self.books.get_mut(&snapshot.instrument_id) {
            book.apply_snapshot(snapshot);
        }
        self.iterate_matching(&snapshot.instrument_id.clone())
    }

    pub fn process_venue_status(&mut self, update: &VenueStatusUpdate) {
        self.ts_now = update.ts_init;
        self.status = update.status;
    }

    pub fn process_instrument_status(&mut self, update: &InstrumentStatusUpdate) {
        self.ts_now = update.ts_init;
        self.instrument_status
            .insert(update.instrument_id.clone(), update.status);
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Queue a command for delivery after its configured latency.
    pub fn send_command(&mut self, command: TradingCommand, ts_now: Nanos) {
        let latency = match (&self.config.latency_model, &command) {
            (None, _) => 0,
            (Some(model), TradingCommand::SubmitOrder { .. })
            | (Some(model), TradingCommand::SubmitBracket { .. })
            | (Some(model), TradingCommand::SubmitOcoPair { .. }) => model.insert_latency(),
            (Some(model), TradingCommand::UpdateOrder { .. }) => model.update_latency(),
            (Some(model), TradingCommand::CancelOrder { .. }) => model.cancel_latency(),
        };
        let seq = self.command_seq;
        self.command_seq += 1;
        self.inflight.push(Reverse(QueuedCommand {
            delivery_ts: ts_now + latency,
            seq,
            command,
        }));
    }

    /// Drain and execute every command due at or before `ts_now`.
    pub fn process(&mut self, ts_now: Nanos) -> Result<(), BacktestError> {
        self.ts_now = self.ts_now.max(ts_now);
        while let Some(Reverse(queued)) = self.inflight.peek() {
            if queued.delivery_ts > ts_now {
                break;
            }
            let Reverse(queued) = self.inflight.pop().expect("peeked");
            self.execute_command(queued.command)?;
        }
        Ok(())
    }

    fn execute_command(&mut self, command: TradingCommand) -> Result<(), BacktestError> {
        match command {
            TradingCommand::SubmitOrder { mut order, position_id } => {
                if order.position_id.is_none() {
                    order.position_id = position_id;
                }
                self.process_order(order, true)
            }
            TradingCommand::SubmitBracket {
                entry,
                stop_loss,
                take_profit,
            } => self.process_bracket(entry, stop_loss, take_profit),
            TradingCommand::SubmitOcoPair { first, second } => {
                self.oco_partners
                    .insert(first.client_order_id.clone(), second.client_order_id.clone());
                self.oco_partners
                    .insert(second.client_order_id.clone(), first.client_order_id.clone());
                self.process_order(first, true)?;
                self.process_order(second, true)
            }
            TradingCommand::UpdateOrder {
                client_order_id,
                strategy_id,
                quantity,
                price,
                trigger_price,
            } => self.update_order(client_order_id, strategy_id, quantity, price, trigger_price),
            TradingCommand::CancelOrder {
                client_order_id,
                strategy_id,
            } => {
                self.client_cancel(client_order_id, strategy_id);
                Ok(())
            }
        }
    }

    // =========================================================================
    // SUBMIT
    // =========================================================================

    fn process_order(&mut self, mut order: Order, emit_submitted: bool) -> Result<(), BacktestError> {
        let ts = self.ts_now;
        if emit_submitted {
            // Client order ids are the strategy's uniqueness contract; a
            // duplicate is a programming error and the command is dropped.
            if self.seen_order_ids.contains(&order.client_order_id) {
                warn!(
                    order = %order.client_order_id,
                    "duplicate client order id, command dropped"
                );
                return Ok(());
            }
            self.stats.orders_submitted += 1;
            self.seen_order_ids.insert(order.client_order_id.clone());
            order.apply(OrderStatus::Submitted, ts);
            self.events_out.push(ExecutionEvent::OrderSubmitted {
                client_order_id: order.client_order_id.clone(),
                instrument_id: order.instrument_id.clone(),
                strategy_id: order.strategy_id.clone(),
                ts,
            });
        }

        if let Some(reason) = self.oco_orphans.remove(&order.client_order_id) {
            self.reject_order(&mut order, reason);
            return Ok(());
        }
        if self.status != MarketStatus::Open {
            self.reject_order(&mut order, format!("venue {} is not open", self.config.venue));
            return Ok(());
        }
        if self
            .instrument_status
            .get(&order.instrument_id)
            .map_or(false, |s| *s != MarketStatus::Open)
        {
            let reason = format!("instrument {} is not open for trading", order.instrument_id);
            self.reject_order(&mut order, reason);
            return Ok(());
        }

        let Some(instrument) = self.instruments.get(&order.instrument_id) else {
            let reason = format!("instrument {} not registered with venue", order.instrument_id);
            self.reject_order(&mut order, reason);
            return Ok(());
        };
        if let Err(reason) = instrument.quantity_in_limits(order.quantity) {
            self.reject_order(&mut order, reason);
            return Ok(());
        }

        let book = self
            .books
            .get(&order.instrument_id)
            .expect("book exists for every registered instrument");
        let best_bid = book.best_bid_price();
        let best_ask = book.best_ask_price();

        match order.order_type {
            OrderType::Market => {
                let has_market = match order.side {
                    OrderSide::Buy => best_ask.is_some(),
                    OrderSide::Sell => best_bid.is_some(),
                };
                if !has_market {
                    let reason = format!("no market for {}", order.instrument_id);
                    self.reject_order(&mut order, reason);
                    return Ok(());
                }
                self.accept_order(&mut order);
                self.fill_as_taker(&mut order, None)?;
                if !order.is_terminal() {
                    // Depth dried up; a market order cannot rest.
                    self.venue_cancel(&mut order, Some("insufficient depth".to_string()));
                    self.on_order_terminated(&order);
                }
            }
            OrderType::Limit => {
                let px = order.price.expect("limit order carries a price");
                if limit_marketable(order.side, px, book) {
                    if order.is_post_only {
                        let reason = format!(
                            "POST_ONLY {} LIMIT order limit px of {} would have been a TAKER: bid={}, ask={}",
                            order.side,
                            px,
                            display_opt(best_bid),
                            display_opt(best_ask),
                        );
                        self.reject_order(&mut order, reason);
                        return Ok(());
                    }
                    self.accept_order(&mut order);
                    self.fill_as_taker(&mut order, Some(px))?;
                    if !order.is_terminal() {
                        self.working.insert(order);
                    }
                } else {
                    self.accept_order(&mut order);
                    self.working.insert(order);
                }
            }
            OrderType::StopMarket | OrderType::StopLimit => {
                let trigger = order.trigger_price.expect("stop order carries a trigger");
                if self.config.reject_stop_orders_in_market
                    && stop_marketable(order.side, trigger, book)
                {
                    let reason = format!(
                        "{:?} {} order stop px of {} was in the market: bid={}, ask={}",
                        order.order_type,
                        order.side,
                        trigger,
                        display_opt(best_bid),
                        display_opt(best_ask),
                    );
                    self.reject_order(&mut order, reason);
                    return Ok(());
                }
                self.accept_order(&mut order);
                self.working.insert(order);
            }
        }
        Ok(())
    }

    fn process_bracket(
        &mut self,
        mut entry: Order,
        mut stop_loss: Order,
        take_profit: Option<Order>,
    ) -> Result<(), BacktestError> {
        let ts = self.ts_now;
        let position_id = self.ledger.generate_position_id();
        entry.position_id = Some(position_id.clone());
        stop_loss.position_id = Some(position_id.clone());

        let entry_id = entry.client_order_id.clone();
        let mut child_ids = vec![stop_loss.client_order_id.clone()];
        let mut links = vec![stop_loss.client_order_id.clone()];

        stop_loss.apply(OrderStatus::Submitted, ts);
        self.stats.orders_submitted += 1;
        self.seen_order_ids.insert(stop_loss.client_order_id.clone());
        self.events_out.push(ExecutionEvent::OrderSubmitted {
            client_order_id: stop_loss.client_order_id.clone(),
            instrument_id: stop_loss.instrument_id.clone(),
            strategy_id: stop_loss.strategy_id.clone(),
            ts,
        });

        if let Some(mut tp) = take_profit {
            tp.position_id = Some(position_id.clone());
            tp.apply(OrderStatus::Submitted, ts);
            self.stats.orders_submitted += 1;
            self.seen_order_ids.insert(tp.client_order_id.clone());
            self.events_out.push(ExecutionEvent::OrderSubmitted {
                client_order_id: tp.client_order_id.clone(),
                instrument_id: tp.instrument_id.clone(),
                strategy_id: tp.strategy_id.clone(),
                ts,
            });
            // Exits are mutually OCO.
            self.oco_partners
                .insert(stop_loss.client_order_id.clone(), tp.client_order_id.clone());
            self.oco_partners
                .insert(tp.client_order_id.clone(), stop_loss.client_order_id.clone());
            child_ids.push(tp.client_order_id.clone());
            links.push(tp.client_order_id.clone());
            self.latent_orders.insert(tp.client_order_id.clone(), tp);
        }

        self.latent_orders
            .insert(stop_loss.client_order_id.clone(), stop_loss);
        self.latent_children.insert(entry_id.clone(), child_ids);
        self.position_links.insert(position_id, links);

        self.process_order(entry, true)
    }

    // =========================================================================
    // UPDATE / CANCEL
    // =========================================================================

    fn update_order(
        &mut self,
        client_order_id: ClientOrderId,
        strategy_id: StrategyId,
        quantity: Option<Quantity>,
        price: Option<Price>,
        trigger_price: Option<Price>,
    ) -> Result<(), BacktestError> {
        let ts = self.ts_now;
        if !self.working.contains(&client_order_id) {
            self.events_out.push(ExecutionEvent::OrderUpdateRejected {
                client_order_id,
                strategy_id,
                reason: "order not found".to_string(),
                ts,
            });
            return Ok(());
        }

        let mut order = self.working.get(&client_order_id).expect("checked").clone();
        if !matches!(
            order.status,
            OrderStatus::Accepted | OrderStatus::PartiallyFilled
        ) {
            self.events_out.push(ExecutionEvent::OrderUpdateRejected {
                client_order_id,
                strategy_id,
                reason: format!("order in state {:?} cannot be updated", order.status),
                ts,
            });
            return Ok(());
        }
        let was_partial = !order.filled_qty.is_zero();
        order.apply(OrderStatus::PendingUpdate, ts);
        self.events_out.push(ExecutionEvent::OrderPendingReplace {
            client_order_id: client_order_id.clone(),
            strategy_id: strategy_id.clone(),
            ts,
        });

        let new_qty = quantity.unwrap_or(order.quantity);
        let new_price = price.or(order.price);
        let new_trigger = trigger_price.or(order.trigger_price);

        let instrument = self
            .instruments
            .get(&order.instrument_id)
            .expect("instrument registered");
        let refusal = if new_qty.raw < order.filled_qty.raw {
            Some(format!(
                "new quantity {} below filled quantity {}",
                new_qty, order.filled_qty
            ))
        } else if let Err(reason) = instrument.quantity_in_limits(new_qty) {
            Some(reason)
        } else {
            let book = self.books.get(&order.instrument_id).expect("book exists");
            match order.order_type {
                OrderType::Limit if order.is_post_only => {
                    let px = new_price.expect("limit order carries a price");
                    if limit_marketable(order.side, px, book) {
                        Some(format!(
                            "POST_ONLY {} LIMIT order new limit px of {} would have been a TAKER",
                            order.side, px
                        ))
                    } else {
                        None
                    }
                }
                OrderType::StopMarket | OrderType::StopLimit if !order.is_triggered => {
                    let trigger = new_trigger.expect("stop order carries a trigger");
                    if self.config.reject_stop_orders_in_market
                        && stop_marketable(order.side, trigger, book)
                    {
                        Some(format!(
                            "new stop px of {} was already in the market",
                            trigger
                        ))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some(reason) = refusal {
            // Update refused: the order keeps working with its old values.
            order.apply(OrderStatus::Accepted, ts);
            if was_partial {
                order.apply(OrderStatus::PartiallyFilled, ts);
            }
            *self.working.get_mut(&client_order_id).expect("checked") = order;
            self.events_out.push(ExecutionEvent::OrderUpdateRejected {
                client_order_id,
                strategy_id,
                reason,
                ts,
            });
            return Ok(());
        }

        order.quantity = new_qty;
        order.price = new_price;
        order.trigger_price = new_trigger;
        order.apply(OrderStatus::Accepted, ts);
        if was_partial {
            order.apply(OrderStatus::PartiallyFilled, ts);
        }
        self.stats.orders_updated += 1;
        self.events_out.push(ExecutionEvent::OrderUpdated {
            client_order_id: client_order_id.clone(),
            strategy_id,
            quantity: new_qty,
            price: new_price,
            trigger_price: new_trigger,
            ts,
        });

        // A repriced limit that is now marketable taker-fills immediately.
        let immediate = if order.order_type == OrderType::Limit && !order.is_post_only {
            let px = order.price.expect("limit order carries a price");
            let book = self.books.get(&order.instrument_id).expect("book exists");
            limit_marketable(order.side, px, book)
        } else {
            false
        };

        if immediate {
            self.working.remove(&client_order_id);
            let limit = order.price;
            self.fill_as_taker(&mut order, limit)?;
            if !order.is_terminal() {
                self.working.insert(order);
            }
        } else {
            *self.working.get_mut(&client_order_id).expect("checked") = order;
        }
        Ok(())
    }

    fn client_cancel(&mut self, client_order_id: ClientOrderId, strategy_id: StrategyId) {
        let ts = self.ts_now;
        if !self.working.contains(&client_order_id) {
            self.events_out.push(ExecutionEvent::OrderCancelRejected {
                client_order_id,
                strategy_id,
                reason: "order not found".to_string(),
                ts,
            });
            return;
        }
        {
            // Triggered stop-limits cancel directly; the pending phase only
            // exists for plain working orders.
            let order = self.working.get_mut(&client_order_id).expect("checked");
            if matches!(
                order.status,
                OrderStatus::Accepted | OrderStatus::PartiallyFilled
            ) {
                order.apply(OrderStatus::PendingCancel, ts);
            }
        }
        self.events_out.push(ExecutionEvent::OrderPendingCancel {
            client_order_id: client_order_id.clone(),
            strategy_id,
            ts,
        });
        let mut order = self.working.remove(&client_order_id).expect("checked");
        order.apply(OrderStatus::Canceled, ts);
        self.stats.orders_canceled += 1;
        self.events_out.push(ExecutionEvent::OrderCanceled {
            client_order_id: order.client_order_id.clone(),
            strategy_id: order.strategy_id.clone(),
            reason: None,
            ts,
        });
        self.on_order_terminated(&order);
    }

    /// Venue-initiated cancel (OCO partner, closed position, market order
    /// residual). No pending-cancel phase.
    fn venue_cancel(&mut self, order: &mut Order, reason: Option<String>) {
        let ts = self.ts_now;
        order.apply(OrderStatus::Canceled, ts);
        self.stats.orders_canceled += 1;
        self.events_out.push(ExecutionEvent::OrderCanceled {
            client_order_id: order.client_order_id.clone(),
            strategy_id: order.strategy_id.clone(),
            reason,
            ts,
        });
    }

    fn cancel_working(&mut self, id: &ClientOrderId, reason: String) {
        if let Some(mut order) = self.working.remove(id) {
            if !order.is_working() {
                return;
            }
            self.venue_cancel(&mut order, Some(reason));
            self.on_order_terminated(&order);
        }
    }

    fn reject_latent(&mut self, id: &ClientOrderId, reason: String) {
        if let Some(mut order) = self.latent_orders.remove(id) {
            self.reject_order(&mut order, reason);
            self.on_order_terminated(&order);
        }
    }

    // =========================================================================
    // MATCHING
    // =========================================================================

    /// Run the match/trigger/expire pass for one instrument over a snapshot
    /// of its working orders. Orders terminated mid-pass are skipped by the
    /// working check.
    fn iterate_matching(&mut self, instrument_id: &InstrumentId) -> Result<(), BacktestError> {
        for id in self.working.snapshot_ids(instrument_id) {
            let Some(current) = self.working.get(&id) else {
                continue;
            };
            if !current.is_working() {
                continue;
            }
            let mut order = current.clone();
            self.match_order(&mut order)?;
        }
        Ok(())
    }

    fn match_order(&mut self, order: &mut Order) -> Result<(), BacktestError> {
        let ts = self.ts_now;
        let id = order.client_order_id.clone();

        // GTD expiry is checked before any match.
        if self.config.support_gtd_orders {
            if let Some(expire) = order.expire_time {
                if ts >= expire {
                    self.working.remove(&id);
                    order.apply(OrderStatus::Expired, ts);
                    self.stats.orders_expired += 1;
                    self.events_out.push(ExecutionEvent::OrderExpired {
                        client_order_id: id.clone(),
                        strategy_id: order.strategy_id.clone(),
                        ts,
                    });
                    self.on_order_terminated(order);
                    return Ok(());
                }
            }
        }

        match order.order_type {
            OrderType::Limit => {
                let px = order.price.expect("limit order carries a price");
                let matched = {
                    let book = self.books.get(&order.instrument_id).expect("book exists");
                    let fill_model = &mut self.fill_model;
                    limit_matched(order.side, px, book, &mut || fill_model.is_limit_filled())
                };
                if matched {
                    self.fill_as_maker(order, px)?;
                }
            }
            OrderType::StopMarket => {
                let trigger = order.trigger_price.expect("stop order carries a trigger");
                let triggered = {
                    let book = self.books.get(&order.instrument_id).expect("book exists");
                    let fill_model = &mut self.fill_model;
                    stop_triggered(order.side, trigger, book, &mut || {
                        fill_model.is_stop_filled()
                    })
                };
                if triggered {
                    self.fill_stop_taker(order, trigger)?;
                }
            }
            OrderType::StopLimit => {
                if !order.is_triggered {
                    let trigger = order.trigger_price.expect("stop order carries a trigger");
                    let triggered = {
                        let book = self.books.get(&order.instrument_id).expect("book exists");
                        let fill_model = &mut self.fill_model;
                        stop_triggered(order.side, trigger, book, &mut || {
                            fill_model.is_stop_filled()
                        })
                    };
                    if !triggered {
                        return Ok(());
                    }
                    order.is_triggered = true;
                    order.apply(OrderStatus::Triggered, ts);
                    self.stats.orders_triggered += 1;
                    self.events_out.push(ExecutionEvent::OrderTriggered {
                        client_order_id: id.clone(),
                        strategy_id: order.strategy_id.clone(),
                        ts,
                    });
                    if let Some(existing) = self.working.get_mut(&id) {
                        *existing = order.clone();
                    }

                    let px = order.price.expect("stop-limit carries a limit price");
                    let marketable = {
                        let book = self.books.get(&order.instrument_id).expect("book exists");
                        limit_marketable(order.side, px, book)
                    };
                    if marketable {
                        if order.is_post_only {
                            // The triggered limit would take: delete and reject.
                            self.working.remove(&id);
                            self.reject_order(
                                order,
                                format!(
                                    "POST_ONLY {} STOP_LIMIT order limit px of {} would have been a TAKER",
                                    order.side, px
                                ),
                            );
                            self.on_order_terminated(order);
                        } else {
                            self.fill_as_taker(order, Some(px))?;
                        }
                    }
                } else {
                    let px = order.price.expect("stop-limit carries a limit price");
                    let matched = {
                        let book = self.books.get(&order.instrument_id).expect("book exists");
                        let fill_model = &mut self.fill_model;
                        limit_matched(order.side, px, book, &mut || fill_model.is_limit_filled())
                    };
                    if matched {
                        self.fill_as_maker(order, px)?;
                    }
                }
            }
            OrderType::Market => {
                // Market orders never rest; nothing to match.
            }
        }
        Ok(())
    }

    // =========================================================================
    // FILLS
    // =========================================================================

    /// Aggressive fill for market orders, marketable limits, and triggered
    /// stop-limits. At L1 a slipped fill moves one tick against the order;
    /// at L2+ slippage is inherent in walking the depth.
    fn fill_as_taker(
        &mut self,
        order: &mut Order,
        limit: Option<Price>,
    ) -> Result<(), BacktestError> {
        let instrument = self
            .instruments
            .get(&order.instrument_id)
            .expect("instrument registered")
            .clone();
        let mut fills = {
            let book = self.books.get(&order.instrument_id).expect("book exists");
            book.simulate_order_fills(order.side, order.leaves_qty(), limit, &instrument)
        };
        let is_l1 = self.config.book_level == BookLevelKind::L1;
        if is_l1 && !fills.is_empty() && self.fill_model.is_slipped() {
            let tick = instrument.price_increment;
            for (px, _) in fills.iter_mut() {
                *px = match order.side {
                    OrderSide::Buy => *px + tick,
                    OrderSide::Sell => *px - tick,
                };
            }
        }
        self.apply_fills(order, fills, LiquiditySide::Taker)
    }

    /// Passive fill at the order's own price after the market traded
    /// through it. At L2+ the walk is bounded by the limit price.
    fn fill_as_maker(&mut self, order: &mut Order, px: Price) -> Result<(), BacktestError> {
        let leaves = order.leaves_qty();
        let fills = match self.config.book_level {
            BookLevelKind::L1 => vec![(px, leaves)],
            BookLevelKind::L2 | BookLevelKind::L3 => {
                let instrument = self
                    .instruments
                    .get(&order.instrument_id)
                    .expect("instrument registered");
                let book = self.books.get(&order.instrument_id).expect("book exists");
                let depth_fills =
                    book.simulate_order_fills(order.side, leaves, Some(px), instrument);
                if depth_fills.is_empty() {
                    vec![(px, leaves)]
                } else {
                    depth_fills
                }
            }
        };
        self.apply_fills(order, fills, LiquiditySide::Maker)
    }

    /// Fill a triggered stop-market order. On a touch (top == trigger) the
    /// fill prints at the stop price; on a gap it prints at the market,
    /// plus one tick of slippage when the model says so.
    fn fill_stop_taker(&mut self, order: &mut Order, trigger: Price) -> Result<(), BacktestError> {
        let instrument = self
            .instruments
            .get(&order.instrument_id)
            .expect("instrument registered")
            .clone();
        let tick = instrument.price_increment;

        let fills = match self.config.book_level {
            BookLevelKind::L1 => {
                let book = self.books.get(&order.instrument_id).expect("book exists");
                let top = match order.side {
                    OrderSide::Buy => book.best_ask_price(),
                    OrderSide::Sell => book.best_bid_price(),
                };
                let base = match (order.side, top) {
                    (OrderSide::Buy, Some(ask)) if ask > trigger => ask,
                    (OrderSide::Sell, Some(bid)) if bid < trigger => bid,
                    _ => trigger,
                };
                let px = if self.fill_model.is_slipped() {
                    match order.side {
                        OrderSide::Buy => base + tick,
                        OrderSide::Sell => base - tick,
                    }
                } else {
                    base
                };
                vec![(px, order.leaves_qty())]
            }
            BookLevelKind::L2 | BookLevelKind::L3 => {
                let book = self.books.get(&order.instrument_id).expect("book exists");
                book.simulate_order_fills(order.side, order.leaves_qty(), None, &instrument)
            }
        };
        self.apply_fills(order, fills, LiquiditySide::Taker)
    }

    fn apply_fills(
        &mut self,
        order: &mut Order,
        fills: Vec<(Price, Quantity)>,
        liquidity: LiquiditySide,
    ) -> Result<(), BacktestError> {
        let ts = self.ts_now;
        if fills.is_empty() {
            return Ok(());
        }
        let instrument = self
            .instruments
            .get(&order.instrument_id)
            .expect("instrument registered")
            .clone();
        let (bid_quotes, ask_quotes) = self.build_quote_maps();
        let mut closed_positions = Vec::new();
        let mut had_fill = false;

        for (px, qty) in fills {
            let qty = qty.min(order.leaves_qty());
            if qty.is_zero() {
                continue;
            }
            let settlement = self.ledger.settle_fill(
                &instrument,
                &order.strategy_id,
                order.side,
                qty,
                px,
                liquidity,
                order.position_id.as_ref(),
                &bid_quotes,
                &ask_quotes,
                ts,
            )?;
            order.position_id = Some(settlement.position_id.clone());
            order.fill(qty, px, ts);
            had_fill = true;
            self.stats.fills += 1;
            self.trade_id_count += 1;

            debug!(
                order = %order.client_order_id,
                %qty,
                %px,
                ?liquidity,
                "order filled"
            );

            self.events_out.push(ExecutionEvent::OrderFilled {
                client_order_id: order.client_order_id.clone(),
                venue_order_id: order
                    .venue_order_id
                    .clone()
                    .expect("filled orders are accepted"),
                trade_id: TradeId::new(format!("{}-T-{}", self.config.venue, self.trade_id_count)),
                instrument_id: order.instrument_id.clone(),
                strategy_id: order.strategy_id.clone(),
                position_id: match self.config.oms_type {
                    OmsType::Netting => None,
                    OmsType::Hedging => Some(settlement.position_id.clone()),
                },
                side: order.side,
                last_qty: qty,
                last_px: px,
                liquidity_side: liquidity,
                commission: settlement.commission.clone(),
                ts,
            });
            self.events_out.extend(settlement.events);
            if let Some(pid) = settlement.closed_position {
                closed_positions.push(pid);
            }

            // Keep the arena copy in sync after every leg.
            if let Some(existing) = self.working.get_mut(&order.client_order_id) {
                *existing = order.clone();
            }
        }

        if order.is_terminal() {
            self.working.remove(&order.client_order_id);
        }

        if had_fill {
            // An entry fill arms its bracket children.
            self.arm_children(&order.client_order_id.clone())?;
        }
        if order.is_terminal() {
            self.on_order_terminated(order);
        }
        for pid in closed_positions {
            self.on_position_closed(&pid);
        }
        Ok(())
    }

    // =========================================================================
    // LINKAGE
    // =========================================================================

    fn arm_children(&mut self, entry_id: &ClientOrderId) -> Result<(), BacktestError> {
        let Some(children) = self.latent_children.remove(entry_id) else {
            return Ok(());
        };
        for child_id in children {
            if let Some(child) = self.latent_orders.remove(&child_id) {
                if !child.is_terminal() {
                    self.process_order(child, false)?;
                }
            }
        }
        Ok(())
    }

    fn on_order_terminated(&mut self, order: &Order) {
        let id = &order.client_order_id;

        // OCO: a terminating member takes its partner with it.
        if let Some(partner) = self.oco_partners.remove(id) {
            self.oco_partners.remove(&partner);
            let reason = format!("OCO partner {} terminated", id);
            if self.working.contains(&partner) {
                self.cancel_working(&partner, reason);
            } else if self.latent_orders.contains_key(&partner) {
                self.reject_latent(&partner, reason);
            } else {
                // Partner not processed yet; reject it on arrival.
                self.oco_orphans.insert(partner, reason);
            }
        }

        // A bracket entry that dies before any fill takes its latent
        // children with it; they never reach the matching engine.
        if matches!(
            order.status,
            OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        ) {
            if let Some(children) = self.latent_children.remove(id) {
                for child_id in children {
                    self.reject_latent(
                        &child_id,
                        format!("entry order {} was {:?}", id, order.status),
                    );
                }
            }
        }
    }

    fn on_position_closed(&mut self, position_id: &PositionId) {
        let Some(linked) = self.position_links.remove(position_id) else {
            return;
        };
        for id in linked {
            if self.working.contains(&id) {
                self.cancel_working(&id, format!("position {} closed", position_id));
            } else if self.latent_orders.contains_key(&id) {
                self.reject_latent(&id, format!("position {} closed", position_id));
            }
        }
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn accept_order(&mut self, order: &mut Order) {
        let ts = self.ts_now;
        self.order_id_count += 1;
        let venue_order_id =
            VenueOrderId::new(format!("{}-{}", self.config.venue, self.order_id_count));
        order.venue_order_id = Some(venue_order_id.clone());
        order.apply(OrderStatus::Accepted, ts);
        self.stats.orders_accepted += 1;
        self.events_out.push(ExecutionEvent::OrderAccepted {
            client_order_id: order.client_order_id.clone(),
            venue_order_id,
            strategy_id: order.strategy_id.clone(),
            ts,
        });
    }

    fn reject_order(&mut self, order: &mut Order, reason: String) {
        let ts = self.ts_now;
        order.apply(OrderStatus::Rejected, ts);
        self.stats.orders_rejected += 1;
        warn!(order = %order.client_order_id, %reason, "order rejected");
        self.events_out.push(ExecutionEvent::OrderRejected {
            client_order_id: order.client_order_id.clone(),
            strategy_id: order.strategy_id.clone(),
            reason,
            ts,
        });
    }

    /// Current best bid/ask per symbol, for the rate calculator.
    fn build_quote_maps(&self) -> (HashMap<String, f64>, HashMap<String, f64>) {
        let mut bids = HashMap::new();
        let mut asks = HashMap::new();
        for (id, book) in &self.books {
            if let Some(bid) = book.best_bid_price() {
                bids.insert(id.symbol.clone(), bid.as_f64());
            }
            if let Some(ask) = book.best_ask_price() {
                asks.insert(id.symbol.clone(), ask.as_f64());
            }
        }
        (bids, asks)
    }

    /// Return to the post-registration state: books empty, account restored
    /// to starting balances, fill model reseeded.
    pub fn reset(&mut self) -> Result<(), BacktestError> {
        for book in self.books.values_mut() {
            book.clear();
        }
        self.working.clear();
        self.latent_children.clear();
        self.latent_orders.clear();
        self.oco_partners.clear();
        self.oco_orphans.clear();
        self.position_links.clear();
        self.inflight.clear();
        self.command_seq = 0;
        self.fill_model.reset();
        self.ledger.reset(self.config.starting_balances.clone())?;
        self.events_out.clear();
        self.seen_order_ids.clear();
        self.order_id_count = 0;
        self.trade_id_count = 0;
        self.status = MarketStatus::Open;
        self.instrument_status.clear();
        self.stats = MatchingStats::default();
        self.ts_now = 0;
        Ok(())
    }
}

fn display_opt(price: Option<Price>) -> String {
    match price {
        Some(px) => px.to_string(),
        None => "None".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::Venue as VenueId;
    use crate::instrument::CommissionSchedule;
    use crate::types::{Currency, Money};

    fn instrument_id() -> InstrumentId {
        InstrumentId::new("AAPL", VenueId::new("NASDAQ"))
    }

    fn instrument() -> Instrument {
        Instrument::equity(instrument_id(), 2, 0.01, Currency::usd())
            .with_commission(CommissionSchedule::zero())
            .with_quantity_limits(Some(Quantity::new(1.0, 0)), Some(Quantity::new(10_000.0, 0)))
    }

    fn venue() -> SimulatedVenue {
        let config = VenueConfig::new(
            VenueId::new("NASDAQ"),
            vec![Money::new(1_000_000.0, Currency::usd())],
        )
        .with_base_currency(Currency::usd());
        let mut venue = SimulatedVenue::new(config).unwrap();
        venue.add_instrument(instrument()).unwrap();
        venue
    }

    fn push_quote(venue: &mut SimulatedVenue, bid: f64, ask: f64, ts: Nanos) {
        venue
            .process_quote_tick(&QuoteTick {
                instrument_id: instrument_id(),
                bid: Price::new(bid, 2),
                ask: Price::new(ask, 2),
                bid_size: Quantity::new(100.0, 0),
                ask_size: Quantity::new(100.0, 0),
                ts_event: ts,
                ts_init: ts,
            })
            .unwrap();
    }

    fn limit(id: &str, side: OrderSide, qty: f64, px: f64) -> Order {
        Order::limit(
            ClientOrderId::new(id),
            instrument_id(),
            StrategyId::new("S-1"),
            side,
            Quantity::new(qty, 0),
            Price::new(px, 2),
            0,
        )
    }

    fn submit(venue: &mut SimulatedVenue, order: Order, ts: Nanos) {
        venue.send_command(
            TradingCommand::SubmitOrder {
                order,
                position_id: None,
            },
            ts,
        );
        venue.process(ts).unwrap();
    }

    #[test]
    fn market_order_without_market_rejected() {
        let mut venue = venue();
        let order = Order::market(
            ClientOrderId::new("M-1"),
            instrument_id(),
            StrategyId::new("S-1"),
            OrderSide::Buy,
            Quantity::new(10.0, 0),
            0,
        );
        submit(&mut venue, order, 1_000);

        let events = venue.drain_events();
        let reason = events
            .iter()
            .find_map(|e| match e {
                ExecutionEvent::OrderRejected { reason, .. } => Some(reason.clone()),
                _ => None,
            })
            .expect("rejected");
        assert!(reason.contains("no market"));
    }

    #[test]
    fn non_marketable_limit_rests() {
        let mut venue = venue();
        push_quote(&mut venue, 100.00, 100.02, 1_000);
        submit(&mut venue, limit("L-1", OrderSide::Buy, 10.0, 99.00), 1_000);

        let events = venue.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, ExecutionEvent::OrderAccepted { .. })));
        assert_eq!(venue.working_orders().len(), 1);
    }

    #[test]
    fn stop_already_in_market_rejected() {
        let mut venue = venue();
        push_quote(&mut venue, 100.00, 100.02, 1_000);
        let stop = Order::stop_market(
            ClientOrderId::new("S-IN"),
            instrument_id(),
            StrategyId::new("S-1"),
            OrderSide::Buy,
            Quantity::new(1.0, 0),
            Price::new(100.01, 2),
            0,
        );
        submit(&mut venue, stop, 1_000);

        let events = venue.drain_events();
        let reason = events
            .iter()
            .find_map(|e| match e {
                ExecutionEvent::OrderRejected { reason, .. } => Some(reason.clone()),
                _ => None,
            })
            .expect("rejected");
        assert!(reason.contains("in the market"));
    }

    #[test]
    fn quantity_outside_limits_rejected() {
        let mut venue = venue();
        push_quote(&mut venue, 100.00, 100.02, 1_000);
        submit(&mut venue, limit("Q-1", OrderSide::Buy, 20_000.0, 99.00), 1_000);

        let events = venue.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            ExecutionEvent::OrderRejected { .. }
        )));
        assert!(venue.working_orders().is_empty());
    }

    #[test]
    fn update_reprices_then_fills_when_marketable() {
        let mut venue = venue();
        push_quote(&mut venue, 100.00, 100.02, 1_000);
        submit(&mut venue, limit("U-1", OrderSide::Buy, 10.0, 99.00), 1_000);
        venue.drain_events();

        venue.send_command(
            TradingCommand::UpdateOrder {
                client_order_id: ClientOrderId::new("U-1"),
                strategy_id: StrategyId::new("S-1"),
                quantity: None,
                price: Some(Price::new(100.02, 2)),
                trigger_price: None,
            },
            2_000,
        );
        venue.process(2_000).unwrap();

        let events = venue.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, ExecutionEvent::OrderPendingReplace { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ExecutionEvent::OrderUpdated { .. })));
        // Repriced to the ask: immediate taker fill.
        assert!(events.iter().any(|e| matches!(
            e,
            ExecutionEvent::OrderFilled {
                liquidity_side: LiquiditySide::Taker,
                ..
            }
        )));
        assert!(venue.working_orders().is_empty());
    }

    #[test]
    fn update_unknown_order_rejected() {
        let mut venue = venue();
        push_quote(&mut venue, 100.00, 100.02, 1_000);
        venue.send_command(
            TradingCommand::UpdateOrder {
                client_order_id: ClientOrderId::new("GHOST"),
                strategy_id: StrategyId::new("S-1"),
                quantity: None,
                price: Some(Price::new(1.0, 2)),
                trigger_price: None,
            },
            1_000,
        );
        venue.process(1_000).unwrap();

        let events = venue.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, ExecutionEvent::OrderUpdateRejected { .. })));
    }

    #[test]
    fn cancel_unknown_order_rejected() {
        let mut venue = venue();
        venue.send_command(
            TradingCommand::CancelOrder {
                client_order_id: ClientOrderId::new("GHOST"),
                strategy_id: StrategyId::new("S-1"),
            },
            1_000,
        );
        venue.process(1_000).unwrap();

        let events = venue.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, ExecutionEvent::OrderCancelRejected { .. })));
    }

    #[test]
    fn l1_market_order_residual_fills_one_tick_deeper() {
        let mut venue = venue();
        push_quote(&mut venue, 100.00, 100.02, 1_000);
        let order = Order::market(
            ClientOrderId::new("M-BIG"),
            instrument_id(),
            StrategyId::new("S-1"),
            OrderSide::Buy,
            Quantity::new(150.0, 0),
            0,
        );
        submit(&mut venue, order, 1_000);

        let events = venue.drain_events();
        let fills: Vec<(Price, Quantity)> = events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::OrderFilled {
                    last_px, last_qty, ..
                } => Some((*last_px, *last_qty)),
                _ => None,
            })
            .collect();
        assert_eq!(
            fills,
            vec![
                (Price::new(100.02, 2), Quantity::new(100.0, 0)),
                (Price::new(100.03, 2), Quantity::new(50.0, 0)),
            ]
        );
    }

    #[test]
    fn gtd_expires_on_matching_pass() {
        let mut venue = venue();
        push_quote(&mut venue, 100.00, 100.02, 1_000);
        submit(
            &mut venue,
            limit("G-1", OrderSide::Buy, 10.0, 99.00).expires_at(1_500),
            1_000,
        );
        venue.drain_events();

        push_quote(&mut venue, 100.00, 100.02, 2_000);
        let events = venue.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, ExecutionEvent::OrderExpired { .. })));
        assert!(venue.working_orders().is_empty());
    }

    #[test]
    fn oco_pair_member_filling_cancels_partner() {
        let mut venue = venue();
        push_quote(&mut venue, 99.50, 100.50, 1_000);
        venue.send_command(
            TradingCommand::SubmitOcoPair {
                first: limit("A", OrderSide::Buy, 50.0, 99.00),
                second: limit("B", OrderSide::Sell, 50.0, 101.00),
            },
            1_000,
        );
        venue.process(1_000).unwrap();
        venue.drain_events();

        push_quote(&mut venue, 98.90, 99.40, 2_000);
        let events = venue.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            ExecutionEvent::OrderFilled { client_order_id, .. }
                if client_order_id.as_str() == "A"
        )));
        let reason = events
            .iter()
            .find_map(|e| match e {
                ExecutionEvent::OrderCanceled {
                    client_order_id,
                    reason,
                    ..
                } if client_order_id.as_str() == "B" => Some(reason.clone()),
                _ => None,
            })
            .expect("partner canceled");
        assert!(reason.unwrap().contains("A"));
        assert!(venue.working_orders().is_empty());
    }
}
