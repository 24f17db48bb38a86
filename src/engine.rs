//! Backtest Engine
//!
//! The replay driver: owns venues, strategies (each with its own test
//! clock), the cache, and the message bus, and replays the merged data
//! buffer in strict `ts_init` order. Time events scheduled at exactly the
//! current data timestamp fire after that data item; everything earlier
//! fires before it.

use crate::accounting::LedgerStats;
use crate::cache::Cache;
use crate::clock::{Nanos, TestClock, TimeEvent};
use crate::config::VenueConfig;
use crate::data::Data;
use crate::errors::BacktestError;
use crate::events::ExecutionEvent;
use crate::identifiers::{StrategyId, Venue};
use crate::instrument::Instrument;
use crate::matching::MatchingStats;
use crate::msgbus::MessageBus;
use crate::strategy::{Strategy, StrategyContext};
use crate::venue::{SimulatedVenue, TradingCommand};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Hard ceiling on command/event drain passes per step; a strategy that
/// resubmits on every event it receives would otherwise spin forever.
const MAX_DRAIN_PASSES: usize = 1_000;

/// Structured diagnostics for one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_count: u64,
    pub events_processed: u64,
    pub backtest_start: Nanos,
    pub backtest_end: Nanos,
    pub wall_time_ms: u128,
    pub venue_stats: BTreeMap<String, MatchingStats>,
    pub ledger_stats: BTreeMap<String, LedgerStats>,
}

struct StrategyHandle {
    id: StrategyId,
    strategy: Box<dyn Strategy>,
    clock: TestClock,
}

/// Deterministic single-threaded replay engine.
pub struct BacktestEngine {
    data: Vec<Data>,
    venues: BTreeMap<Venue, SimulatedVenue>,
    strategies: Vec<StrategyHandle>,
    cache: Cache,
    msgbus: MessageBus<ExecutionEvent>,
    index: usize,
    last_ts: Option<Nanos>,
    /// Time events scheduled exactly at the current data timestamp, fired
    /// once the timestamp group completes.
    pending_now: Vec<(usize, TimeEvent)>,
    started: bool,
    disposed: bool,
    run_count: u64,
    events_processed: u64,
    run_start_ts: Nanos,
    wall_start: Option<std::time::Instant>,
}

impl Default for BacktestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BacktestEngine {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            venues: BTreeMap::new(),
            strategies: Vec::new(),
            cache: Cache::new(),
            msgbus: MessageBus::new(),
            index: 0,
            last_ts: None,
            pending_now: Vec::new(),
            started: false,
            disposed: false,
            run_count: 0,
            events_processed: 0,
            run_start_ts: 0,
            wall_start: None,
        }
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Register a simulated venue. Duplicate venues are a configuration
    /// error.
    pub fn add_venue(&mut self, config: VenueConfig) -> Result<(), BacktestError> {
        if self.disposed {
            return Err(BacktestError::Disposed);
        }
        let venue_id = config.venue.clone();
        if self.venues.contains_key(&venue_id) {
            return Err(BacktestError::DuplicateVenue(venue_id.to_string()));
        }
        let venue = SimulatedVenue::new(config)?;
        info!(venue = %venue_id, "venue added");
        self.venues.insert(venue_id, venue);
        Ok(())
    }

    /// Register an instrument with its venue. The venue must exist.
    pub fn add_instrument(&mut self, instrument: Instrument) -> Result<(), BacktestError> {
        if self.disposed {
            return Err(BacktestError::Disposed);
        }
        let venue = self
            .venues
            .get_mut(&instrument.id.venue)
            .ok_or_else(|| BacktestError::UnknownVenue(instrument.id.venue.to_string()))?;
        venue.add_instrument(instrument.clone())?;
        info!(instrument = %instrument.id, "instrument added");
        self.cache.add_instrument(instrument);
        Ok(())
    }

    /// Append data; the combined buffer is stably re-sorted by `ts_init`.
    /// Every element must reference a registered instrument or venue;
    /// instrument-less data needs an explicit client id.
    pub fn add_data(&mut self, data: Vec<Data>) -> Result<(), BacktestError> {
        if self.disposed {
            return Err(BacktestError::Disposed);
        }
        for element in &data {
            match element {
                Data::Generic(generic) => {
                    if generic.client_id.is_none() {
                        return Err(BacktestError::MissingClientId);
                    }
                }
                Data::Bar(bar) => {
                    if bar.bar_type.aggregation_source != crate::data::AggregationSource::External
                    {
                        return Err(BacktestError::InternalAggregation(
                            bar.bar_type.instrument_id.to_string(),
                        ));
                    }
                    if self.cache.instrument(&bar.bar_type.instrument_id).is_none() {
                        return Err(BacktestError::UnknownInstrument(
                            bar.bar_type.instrument_id.to_string(),
                        ));
                    }
                }
                Data::VenueStatus(update) => {
                    if !self.venues.contains_key(&update.venue) {
                        return Err(BacktestError::UnknownVenue(update.venue.to_string()));
                    }
                }
                other => {
                    if let Some(id) = other.instrument_id() {
                        if self.cache.instrument(id).is_none() {
                            return Err(BacktestError::UnknownInstrument(id.to_string()));
                        }
                    }
                }
            }
        }
        self.data.extend(data);
        self.data.sort_by_key(|d| d.ts_init());
        Ok(())
    }

    /// Register a strategy with its own clock.
    pub fn add_strategy(&mut self, strategy: Box<dyn Strategy>) {
        let id = strategy.id();
        self.strategies.push(StrategyHandle {
            id,
            strategy,
            clock: TestClock::new(0),
        });
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn venue(&self, venue: &Venue) -> Option<&SimulatedVenue> {
        self.venues.get(venue)
    }

    pub fn msgbus_mut(&mut self) -> &mut MessageBus<ExecutionEvent> {
        &mut self.msgbus
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    // =========================================================================
    // RUN
    // =========================================================================

    /// Replay `[start, end)` to completion. Defaults to the full buffer.
    pub fn run(
        &mut self,
        start: Option<Nanos>,
        end: Option<Nanos>,
    ) -> anyhow::Result<RunSummary> {
        self.run_inner(start, end)?;
        let summary = self.finish_run()?;
        Ok(summary)
    }

    /// Streaming variant: replay the given range but keep loop state so a
    /// following call continues where this one stopped.
    pub fn run_streaming(
        &mut self,
        start: Option<Nanos>,
        end: Option<Nanos>,
    ) -> anyhow::Result<()> {
        self.run_inner(start, end)?;
        Ok(())
    }

    /// Finish a streaming session: trailing time events, final venue
    /// drain, strategy stop, diagnostics.
    pub fn end_streaming(&mut self) -> anyhow::Result<RunSummary> {
        Ok(self.finish_run()?)
    }

    fn run_inner(
        &mut self,
        start: Option<Nanos>,
        end: Option<Nanos>,
    ) -> Result<(), BacktestError> {
        if self.disposed {
            return Err(BacktestError::Disposed);
        }
        if self.data.is_empty() {
            return Err(BacktestError::NoData);
        }
        let first_ts = self.data.first().expect("non-empty").ts_init();
        let last_data_ts = self.data.last().expect("non-empty").ts_init();
        let start = start.unwrap_or(first_ts);
        let end_exclusive = end.unwrap_or(last_data_ts + 1);
        if start >= end_exclusive {
            return Err(BacktestError::InvalidRange {
                start,
                end: end_exclusive,
            });
        }

        if !self.started {
            self.begin_run(start)?;
        }

        while self.index < self.data.len() {
            let t = self.data[self.index].ts_init();
            if t >= end_exclusive {
                break;
            }
            let element = self.data[self.index].clone();
            self.index += 1;

            // (a) Flush time events scheduled before this timestamp; park
            // the ones landing exactly on it.
            if self.last_ts.map_or(true, |last| t > last) {
                let parked = self.advance_clocks(t)?;
                self.pending_now.extend(parked);
            }

            // (b) Venue sees the market data and runs its matching pass.
            self.dispatch_to_venue(&element)?;

            // (c) Strategies see the data and may issue commands.
            self.dispatch_data_to_strategies(&element, t)?;

            // (d) Venues drain due commands; events fan out until quiet.
            self.process_venues(t)?;

            self.events_processed += 1;
            self.last_ts = Some(t);

            // (e) The timestamp group is complete once the next element is
            // later (or the stream ends): fire parked time events.
            let next_ts = self.data.get(self.index).map(|d| d.ts_init());
            let group_done = match next_ts {
                Some(next) => next > t || next >= end_exclusive,
                None => true,
            };
            if group_done && !self.pending_now.is_empty() {
                let parked = std::mem::take(&mut self.pending_now);
                self.fire_time_events(parked)?;
            }
        }
        Ok(())
    }

    fn begin_run(&mut self, start: Nanos) -> Result<(), BacktestError> {
        self.run_count += 1;
        self.events_processed = 0;
        self.run_start_ts = start;
        self.wall_start = Some(std::time::Instant::now());
        self.index = self.data.partition_point(|d| d.ts_init() < start);
        self.last_ts = None;
        self.pending_now.clear();
        self.started = true;

        info!(run = self.run_count, start, "backtest run starting");

        for handle in self.strategies.iter_mut() {
            handle.clock.set_time(start);
        }

        // Opening account states flow through the normal event path.
        let mut initial_events = Vec::new();
        for venue in self.venues.values_mut() {
            venue.emit_initial_account_state(start);
            initial_events.extend(venue.drain_events());
        }
        self.handle_events(initial_events)?;

        for idx in 0..self.strategies.len() {
            let commands = {
                let handle = &mut self.strategies[idx];
                let mut ctx =
                    StrategyContext::new(&self.cache, &mut handle.clock, handle.id.clone(), start);
                handle.strategy.on_start(&mut ctx);
                ctx.commands
            };
            self.route_commands(commands, start)?;
        }
        self.process_venues(start)?;
        Ok(())
    }

    fn finish_run(&mut self) -> Result<RunSummary, BacktestError> {
        let end_ts = self.last_ts.unwrap_or(self.run_start_ts);

        // Trailing time events: first the parked group, then anything a
        // handler re-registered at the final timestamp.
        let parked = std::mem::take(&mut self.pending_now);
        self.fire_time_events(parked)?;
        let trailing = self.advance_clocks_inclusive(end_ts)?;
        self.fire_time_events(trailing)?;

        // Final venue drain.
        self.process_venues(end_ts)?;

        for idx in 0..self.strategies.len() {
            let commands = {
                let handle = &mut self.strategies[idx];
                let mut ctx =
                    StrategyContext::new(&self.cache, &mut handle.clock, handle.id.clone(), end_ts);
                handle.strategy.on_stop(&mut ctx);
                ctx.commands
            };
            self.route_commands(commands, end_ts)?;
        }
        self.process_venues(end_ts)?;

        self.started = false;

        let mut venue_stats = BTreeMap::new();
        let mut ledger_stats = BTreeMap::new();
        for (venue_id, venue) in &self.venues {
            venue_stats.insert(venue_id.to_string(), venue.stats);
            ledger_stats.insert(venue_id.to_string(), venue.ledger().stats);
        }
        let summary = RunSummary {
            run_count: self.run_count,
            events_processed: self.events_processed,
            backtest_start: self.run_start_ts,
            backtest_end: end_ts,
            wall_time_ms: self
                .wall_start
                .take()
                .map(|w| w.elapsed().as_millis())
                .unwrap_or(0),
            venue_stats,
            ledger_stats,
        };
        info!(
            run = summary.run_count,
            events = summary.events_processed,
            wall_ms = summary.wall_time_ms,
            "backtest run finished"
        );
        Ok(summary)
    }

    /// Return all stateful fields to their initial values. Registered
    /// venues, instruments, strategies, and loaded data survive.
    pub fn reset(&mut self) -> Result<(), BacktestError> {
        if self.disposed {
            return Err(BacktestError::Disposed);
        }
        for venue in self.venues.values_mut() {
            venue.reset()?;
        }
        self.cache.reset();
        for handle in self.strategies.iter_mut() {
            handle.clock.reset();
            handle.strategy.on_reset();
        }
        self.msgbus = MessageBus::new();
        self.index = 0;
        self.last_ts = None;
        self.pending_now.clear();
        self.started = false;
        self.events_processed = 0;
        info!("engine reset");
        Ok(())
    }

    /// Idempotent release.
    pub fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.data.clear();
            info!("engine disposed");
        }
    }

    // =========================================================================
    // LOOP INTERNALS
    // =========================================================================

    /// Advance every strategy clock to `t`, firing events scheduled before
    /// `t` immediately and returning those scheduled exactly at `t`.
    fn advance_clocks(&mut self, t: Nanos) -> Result<Vec<(usize, TimeEvent)>, BacktestError> {
        let mut immediate = Vec::new();
        let mut parked = Vec::new();
        for idx in 0..self.strategies.len() {
            for event in self.strategies[idx].clock.advance_time(t, true) {
                if event.ts_event < t {
                    immediate.push((idx, event));
                } else {
                    parked.push((idx, event));
                }
            }
        }
        // Merge across clocks, stable by scheduled time.
        immediate.sort_by_key(|(_, e)| e.ts_event);
        self.fire_time_events(immediate)?;
        Ok(parked)
    }

    /// Advance clocks treating events at exactly `t` as due now (used for
    /// the final drain, where re-registrations at the last timestamp must
    /// still fire).
    fn advance_clocks_inclusive(
        &mut self,
        t: Nanos,
    ) -> Result<Vec<(usize, TimeEvent)>, BacktestError> {
        let mut due = Vec::new();
        for idx in 0..self.strategies.len() {
            for event in self.strategies[idx].clock.advance_time(t, true) {
                due.push((idx, event));
            }
        }
        due.sort_by_key(|(_, e)| e.ts_event);
        Ok(due)
    }

    fn fire_time_events(
        &mut self,
        events: Vec<(usize, TimeEvent)>,
    ) -> Result<(), BacktestError> {
        for (idx, event) in events {
            let ts = event.ts_event;
            let commands = {
                let handle = &mut self.strategies[idx];
                let mut ctx =
                    StrategyContext::new(&self.cache, &mut handle.clock, handle.id.clone(), ts);
                handle.strategy.on_time_event(&mut ctx, &event);
                ctx.commands
            };
            self.route_commands(commands, ts)?;
            self.process_venues(ts)?;
        }
        Ok(())
    }

    fn dispatch_to_venue(&mut self, element: &Data) -> Result<(), BacktestError> {
        if let Data::Quote(quote) = element {
            self.cache.update_quote(quote);
        }
        let Some(venue_id) = element.venue().cloned() else {
            return Ok(());
        };
        let Some(venue) = self.venues.get_mut(&venue_id) else {
            warn!(venue = %venue_id, "data for unregistered venue skipped");
            return Ok(());
        };
        match element {
            Data::Quote(quote) => venue.process_quote_tick(quote)?,
            Data::Trade(trade) => venue.process_trade_tick(trade)?,
            Data::Delta(delta) => venue.process_order_book_delta(delta)?,
            Data::Snapshot(snapshot) => venue.process_order_book_snapshot(snapshot)?,
            Data::Bar(bar) => venue.process_bar(bar)?,
            Data::VenueStatus(update) => venue.process_venue_status(update),
            Data::InstrumentStatus(update) => venue.process_instrument_status(update),
            Data::Generic(_) => {}
        }
        let events = venue.drain_events();
        self.handle_events(events)?;
        Ok(())
    }

    fn dispatch_data_to_strategies(
        &mut self,
        element: &Data,
        t: Nanos,
    ) -> Result<(), BacktestError> {
        for idx in 0..self.strategies.len() {
            let commands = {
                let handle = &mut self.strategies[idx];
                let mut ctx =
                    StrategyContext::new(&self.cache, &mut handle.clock, handle.id.clone(), t);
                match element {
                    Data::Quote(quote) => handle.strategy.on_quote(&mut ctx, quote),
                    Data::Trade(trade) => handle.strategy.on_trade(&mut ctx, trade),
                    Data::Bar(bar) => handle.strategy.on_bar(&mut ctx, bar),
                    Data::Delta(delta) => handle.strategy.on_book_delta(&mut ctx, delta),
                    Data::Snapshot(snapshot) => {
                        handle.strategy.on_book_snapshot(&mut ctx, snapshot)
                    }
                    Data::Generic(generic) => handle.strategy.on_data(&mut ctx, generic),
                    Data::VenueStatus(_) | Data::InstrumentStatus(_) => {}
                }
                ctx.commands
            };
            self.route_commands(commands, t)?;
        }
        Ok(())
    }

    /// Drain venue command queues and fan emitted events out to the cache,
    /// bus, and strategies until everything due at `t` has settled.
    fn process_venues(&mut self, t: Nanos) -> Result<(), BacktestError> {
        for pass in 0..MAX_DRAIN_PASSES {
            let mut batch = Vec::new();
            let venue_ids: Vec<Venue> = self.venues.keys().cloned().collect();
            for venue_id in venue_ids {
                let venue = self.venues.get_mut(&venue_id).expect("venue exists");
                venue.process(t)?;
                batch.extend(venue.drain_events());
            }
            if batch.is_empty() {
                return Ok(());
            }
            self.handle_events(batch)?;
            if pass + 1 == MAX_DRAIN_PASSES {
                warn!("drain pass ceiling reached; a strategy is feeding back on its own events");
            }
        }
        Ok(())
    }

    fn handle_events(&mut self, events: Vec<ExecutionEvent>) -> Result<(), BacktestError> {
        for event in events {
            self.cache.apply(&event);
            self.msgbus.publish(event.topic(), &event);
            let ts = event.ts();
            match event.strategy_id().cloned() {
                Some(strategy_id) => {
                    if let Some(idx) =
                        self.strategies.iter().position(|h| h.id == strategy_id)
                    {
                        let commands = self.dispatch_event_at(idx, &event, ts);
                        self.route_commands(commands, ts)?;
                    }
                }
                None => {
                    for idx in 0..self.strategies.len() {
                        let commands = self.dispatch_event_at(idx, &event, ts);
                        self.route_commands(commands, ts)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn dispatch_event_at(
        &mut self,
        idx: usize,
        event: &ExecutionEvent,
        ts: Nanos,
    ) -> Vec<TradingCommand> {
        let handle = &mut self.strategies[idx];
        let mut ctx = StrategyContext::new(&self.cache, &mut handle.clock, handle.id.clone(), ts);
        handle.strategy.on_event(&mut ctx, event);
        ctx.commands
    }

    fn route_commands(
        &mut self,
        commands: Vec<TradingCommand>,
        ts: Nanos,
    ) -> Result<(), BacktestError> {
        for command in commands {
            let venue_id = match &command {
                TradingCommand::SubmitOrder { order, .. } => order.instrument_id.venue.clone(),
                TradingCommand::SubmitBracket { entry, .. } => entry.instrument_id.venue.clone(),
                TradingCommand::SubmitOcoPair { first, .. } => first.instrument_id.venue.clone(),
                TradingCommand::UpdateOrder {
                    client_order_id, ..
                }
                | TradingCommand::CancelOrder {
                    client_order_id, ..
                } => match self.cache.order(client_order_id) {
                    Some(order) => order.instrument_id.venue.clone(),
                    None => {
                        warn!(order = %client_order_id, "command for unknown order dropped");
                        continue;
                    }
                },
            };

            // Record submitted orders so the cache can fold their events.
            match &command {
                TradingCommand::SubmitOrder { order, .. } => {
                    if self.cache.order(&order.client_order_id).is_none() {
                        self.cache.add_order(order.clone());
                    }
                }
                TradingCommand::SubmitBracket {
                    entry,
                    stop_loss,
                    take_profit,
                } => {
                    for order in [Some(entry), Some(stop_loss), take_profit.as_ref()]
                        .into_iter()
                        .flatten()
                    {
                        if self.cache.order(&order.client_order_id).is_none() {
                            self.cache.add_order(order.clone());
                        }
                    }
                }
                TradingCommand::SubmitOcoPair { first, second } => {
                    for order in [first, second] {
                        if self.cache.order(&order.client_order_id).is_none() {
                            self.cache.add_order(order.clone());
                        }
                    }
                }
                _ => {}
            }

            let Some(venue) = self.venues.get_mut(&venue_id) else {
                warn!(venue = %venue_id, "command for unregistered venue dropped");
                continue;
            };
            venue.send_command(command, ts);
        }
        Ok(())
    }
}
