//! Full-engine integration run: a quoting strategy trading two venues over
//! a generated tape, with invariant checks over the resulting state.

use tapesim::{
    AccountType, BacktestEngine, BracketOrder, ClientOrderId, CommissionSchedule, Currency, Data,
    ExecutionEvent, FillModelConfig, Instrument, InstrumentId, LatencyModel, MarketStatus, Money,
    OmsType, Order, OrderSide, Price, Quantity, QuoteTick, Strategy, StrategyContext, StrategyId,
    Venue, VenueConfig, VenueStatusUpdate,
};
use std::cell::RefCell;
use std::rc::Rc;

fn nasdaq() -> Venue {
    Venue::new("NASDAQ")
}

fn fx_venue() -> Venue {
    Venue::new("SIM-FX")
}

fn aapl_id() -> InstrumentId {
    InstrumentId::new("AAPL", nasdaq())
}

fn aapl() -> Instrument {
    Instrument::equity(aapl_id(), 2, 0.01, Currency::usd()).with_commission(
        CommissionSchedule {
            maker_rate: 0.0002,
            taker_rate: 0.0005,
        },
    )
}

fn eurusd_id() -> InstrumentId {
    InstrumentId::new("EUR/USD", fx_venue())
}

fn eurusd() -> Instrument {
    Instrument::currency_pair(eurusd_id(), 5, 0, Currency::eur(), Currency::usd())
}

fn quote(instrument_id: InstrumentId, bid: f64, ask: f64, precision: u8, ts: i64) -> Data {
    Data::Quote(QuoteTick {
        instrument_id,
        bid: Price::new(bid, precision),
        ask: Price::new(ask, precision),
        bid_size: Quantity::new(1_000.0, 0),
        ask_size: Quantity::new(1_000.0, 0),
        ts_event: ts,
        ts_init: ts,
    })
}

/// Generated AAPL tape: a slow ramp up then back down, one quote per
/// second, deterministic.
fn aapl_tape(n: usize) -> Vec<Data> {
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let wave = if i < n / 2 { i } else { n - i };
        let mid = 100.00 + wave as f64 * 0.02;
        let ts = 1_000_000_000 * (i as i64 + 1);
        out.push(quote(aapl_id(), mid - 0.01, mid + 0.01, 2, ts));
    }
    out
}

/// Joins the market one tick inside the spread on a fixed cadence and
/// protects any fill with a bracket-style exit pair.
struct SpreadJoiner {
    next_id: u64,
    submitted: u64,
}

impl SpreadJoiner {
    fn new() -> Self {
        Self {
            next_id: 0,
            submitted: 0,
        }
    }

    fn next_order_id(&mut self) -> ClientOrderId {
        self.next_id += 1;
        ClientOrderId::new(format!("SJ-{}", self.next_id))
    }
}

impl Strategy for SpreadJoiner {
    fn id(&self) -> StrategyId {
        StrategyId::new("SPREAD-JOINER")
    }

    fn on_quote(&mut self, ctx: &mut StrategyContext, quote: &QuoteTick) {
        if quote.instrument_id != aapl_id() {
            return;
        }
        // One bracket every 10 seconds, capped.
        if ctx.ts % 10_000_000_000 != 0 || self.submitted >= 5 {
            return;
        }
        self.submitted += 1;
        let entry_px = quote.bid.as_f64();
        let entry = Order::limit(
            self.next_order_id(),
            aapl_id(),
            self.id(),
            OrderSide::Buy,
            Quantity::new(10.0, 0),
            Price::new(entry_px, 2),
            ctx.ts,
        );
        let stop_loss = Order::stop_market(
            self.next_order_id(),
            aapl_id(),
            self.id(),
            OrderSide::Sell,
            Quantity::new(10.0, 0),
            Price::new(entry_px - 0.50, 2),
            ctx.ts,
        );
        let take_profit = Order::limit(
            self.next_order_id(),
            aapl_id(),
            self.id(),
            OrderSide::Sell,
            Quantity::new(10.0, 0),
            Price::new(entry_px + 0.30, 2),
            ctx.ts,
        );
        ctx.submit_bracket(BracketOrder {
            entry,
            stop_loss,
            take_profit: Some(take_profit),
        });
    }
}

#[test]
fn spread_joiner_full_run_holds_invariants() {
    let mut engine = BacktestEngine::new();
    engine
        .add_venue(
            VenueConfig::new(nasdaq(), vec![Money::new(1_000_000.0, Currency::usd())])
                .with_base_currency(Currency::usd())
                .with_oms_type(OmsType::Hedging)
                .with_fill_model(FillModelConfig {
                    prob_fill_on_limit: 0.8,
                    prob_fill_on_stop: 1.0,
                    prob_slippage: 0.2,
                    seed: 99,
                }),
        )
        .unwrap();
    engine.add_instrument(aapl()).unwrap();
    engine.add_strategy(Box::new(SpreadJoiner::new()));

    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    engine
        .msgbus_mut()
        .subscribe("events.*", move |_, e: &ExecutionEvent| {
            sink.borrow_mut().push(e.clone())
        });

    let tape = aapl_tape(120);
    let n_events = tape.len() as u64;
    engine.add_data(tape).unwrap();
    let summary = engine.run(None, None).unwrap();

    assert_eq!(summary.events_processed, n_events);
    let stats = &summary.venue_stats["NASDAQ"];
    assert!(stats.orders_submitted >= 5);
    assert!(stats.fills > 0, "expected at least one fill");

    // Order invariant: filled quantity never exceeds order quantity, and
    // the average price of any filled order is within the tape's range.
    for order in engine.cache().orders_for_strategy(&StrategyId::new("SPREAD-JOINER")) {
        assert!(order.filled_qty.raw <= order.quantity.raw);
        if let Some(avg) = order.avg_px {
            assert!(avg > 90.0 && avg < 110.0);
        }
    }

    // Account invariant: total - locked = free on every emitted state.
    for event in log.borrow().iter() {
        if let ExecutionEvent::AccountState { balances, .. } = event {
            for balance in balances {
                assert_eq!(balance.total.sub(&balance.locked), balance.free);
            }
        }
    }

    // Every position the ledger closed has zero net quantity.
    for position in engine.venue(&nasdaq()).unwrap().ledger().positions() {
        if position.is_closed() {
            assert!(position.quantity().is_zero());
        }
    }
}

struct FxTaker;

impl Strategy for FxTaker {
    fn id(&self) -> StrategyId {
        StrategyId::new("FX-TAKER")
    }

    fn on_quote(&mut self, ctx: &mut StrategyContext, quote: &QuoteTick) {
        if quote.instrument_id != eurusd_id() || ctx.ts != 1_000 {
            return;
        }
        ctx.submit_order(Order::market(
            ClientOrderId::new("FX-1"),
            eurusd_id(),
            self.id(),
            OrderSide::Buy,
            Quantity::new(1_000.0, 0),
            ctx.ts,
        ));
    }
}

#[test]
fn cross_currency_settlement_through_usd() {
    // JPY-denominated account trading EUR/USD: commissions convert through
    // the venue's USD/JPY quotes.
    let mut engine = BacktestEngine::new();
    engine
        .add_venue(
            VenueConfig::new(fx_venue(), vec![Money::new(100_000_000.0, Currency::jpy())])
                .with_base_currency(Currency::jpy())
                .with_account_type(AccountType::Margin),
        )
        .unwrap();
    engine.add_instrument(eurusd()).unwrap();
    let usdjpy_id = InstrumentId::new("USD/JPY", fx_venue());
    engine
        .add_instrument(Instrument::currency_pair(
            usdjpy_id.clone(),
            3,
            0,
            Currency::usd(),
            Currency::jpy(),
        ))
        .unwrap();
    engine.add_strategy(Box::new(FxTaker));

    engine
        .add_data(vec![
            quote(usdjpy_id, 150.000, 150.002, 3, 500),
            quote(eurusd_id(), 1.09990, 1.10010, 5, 1_000),
            quote(eurusd_id(), 1.10090, 1.10110, 5, 2_000),
        ])
        .unwrap();
    let summary = engine.run(None, None).unwrap();

    assert_eq!(summary.venue_stats["SIM-FX"].fills, 1);
    // Margin account: only the converted commission moved the JPY balance.
    let balances = engine
        .cache()
        .account_balances(&tapesim::AccountId::new("SIM-FX-001"))
        .unwrap();
    assert!(balances[0].total.raw < Money::new(100_000_000.0, Currency::jpy()).raw);
    assert!(balances[0].total.raw > Money::new(99_000_000.0, Currency::jpy()).raw);
}

struct HaltProbe {
    outcomes: Rc<RefCell<Vec<String>>>,
}

impl Strategy for HaltProbe {
    fn id(&self) -> StrategyId {
        StrategyId::new("HALT-PROBE")
    }

    fn on_quote(&mut self, ctx: &mut StrategyContext, _q: &QuoteTick) {
        if ctx.ts == 2_000 {
            ctx.submit_order(Order::limit(
                ClientOrderId::new("H-1"),
                aapl_id(),
                self.id(),
                OrderSide::Buy,
                Quantity::new(1.0, 0),
                Price::new(99.00, 2),
                ctx.ts,
            ));
        }
    }

    fn on_event(&mut self, _ctx: &mut StrategyContext, event: &ExecutionEvent) {
        if let ExecutionEvent::OrderRejected { reason, .. } = event {
            self.outcomes.borrow_mut().push(reason.clone());
        }
    }
}

#[test]
fn halted_venue_rejects_submissions() {
    let mut engine = BacktestEngine::new();
    engine
        .add_venue(
            VenueConfig::new(nasdaq(), vec![Money::new(10_000.0, Currency::usd())])
                .with_base_currency(Currency::usd()),
        )
        .unwrap();
    engine.add_instrument(aapl()).unwrap();
    let outcomes = Rc::new(RefCell::new(Vec::new()));
    engine.add_strategy(Box::new(HaltProbe {
        outcomes: Rc::clone(&outcomes),
    }));

    engine
        .add_data(vec![
            quote(aapl_id(), 100.00, 100.02, 2, 1_000),
            Data::VenueStatus(VenueStatusUpdate {
                venue: nasdaq(),
                status: MarketStatus::Halted,
                ts_event: 1_500,
                ts_init: 1_500,
            }),
            quote(aapl_id(), 100.00, 100.02, 2, 2_000),
        ])
        .unwrap();
    engine.run(None, None).unwrap();

    let outcomes = outcomes.borrow();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].contains("not open"));
}

#[test]
fn latency_model_defers_command_delivery() {
    struct OneShot;
    impl Strategy for OneShot {
        fn id(&self) -> StrategyId {
            StrategyId::new("ONE-SHOT")
        }
        fn on_quote(&mut self, ctx: &mut StrategyContext, _q: &QuoteTick) {
            if ctx.ts == 1_000 {
                ctx.submit_order(Order::limit(
                    ClientOrderId::new("L-1"),
                    aapl_id(),
                    self.id(),
                    OrderSide::Buy,
                    Quantity::new(1.0, 0),
                    Price::new(100.05, 2),
                    ctx.ts,
                ));
            }
        }
    }

    let mut engine = BacktestEngine::new();
    engine
        .add_venue(
            VenueConfig::new(nasdaq(), vec![Money::new(10_000.0, Currency::usd())])
                .with_base_currency(Currency::usd())
                .with_latency_model(LatencyModel::constant(500)),
        )
        .unwrap();
    engine.add_instrument(aapl()).unwrap();
    engine.add_strategy(Box::new(OneShot));

    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    engine
        .msgbus_mut()
        .subscribe("events.order.*", move |_, e: &ExecutionEvent| {
            sink.borrow_mut().push(e.clone())
        });

    engine
        .add_data(vec![
            quote(aapl_id(), 100.00, 100.02, 2, 1_000),
            quote(aapl_id(), 100.00, 100.02, 2, 1_200),
            quote(aapl_id(), 100.00, 100.02, 2, 2_000),
        ])
        .unwrap();
    engine.run(None, None).unwrap();

    // Submitted at 1000 with 500ns latency: the venue sees the order while
    // processing the tick at 2000, not at 1200.
    let submitted_ts = log
        .borrow()
        .iter()
        .find_map(|e| match e {
            ExecutionEvent::OrderSubmitted { ts, .. } => Some(*ts),
            _ => None,
        })
        .expect("order submitted");
    assert!(submitted_ts >= 1_500);
}
