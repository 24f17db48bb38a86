//! tapesim
//!
//! Deterministic historical-market-replay backtesting engine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BacktestEngine                           │
//! │  (owns venues, strategy clocks, cache, bus; drives the loop)    │
//! └─────────────────────────────────────────────────────────────────┘
//!                 │                          │
//!                 ▼                          ▼
//!        ┌─────────────────┐        ┌─────────────────┐
//!        │  Data buffer    │        │  TestClock(s)   │
//!        │  (ts_init sort) │        │  (alerts/timers)│
//!        └────────┬────────┘        └─────────────────┘
//!                 ▼
//!        ┌─────────────────┐   commands   ┌─────────────────┐
//!        │   Strategies    │─────────────▶│ SimulatedVenue  │
//!        │   (trait)       │◀─────────────│ books+matching  │
//!        └─────────────────┘    events    └────────┬────────┘
//!                                                  ▼
//!                                         ┌─────────────────┐
//!                                         │ ExecutionLedger │
//!                                         │ accounts + pos  │
//!                                         └─────────────────┘
//! ```
//!
//! # Determinism Guarantees
//!
//! - All time comes from the simulated clocks; system time is never read
//!   inside the loop
//! - The data buffer is stably sorted by `ts_init`; equal timestamps keep
//!   insertion order
//! - Stochastic fill decisions come from a seeded ChaCha8 generator
//! - Identical inputs and seed produce an identical event stream

pub mod account;
pub mod accounting;
pub mod book;
pub mod cache;
pub mod clock;
pub mod config;
pub mod data;
pub mod engine;
pub mod errors;
pub mod events;
pub mod feed;
pub mod fill_model;
pub mod identifiers;
pub mod instrument;
pub mod latency;
pub mod logging;
pub mod matching;
pub mod msgbus;
pub mod orders;
pub mod position;
pub mod rates;
pub mod strategy;
pub mod types;
pub mod venue;


// Re-exports for convenience
pub use account::{Account, AccountBalance, AccountType};
pub use accounting::{ExecutionLedger, FillSettlement, LedgerStats};
pub use book::{BookLevelKind, OrderBook};
pub use cache::Cache;
pub use clock::{Nanos, TestClock, TimeEvent, NANOS_PER_MICRO, NANOS_PER_MILLI, NANOS_PER_SEC};
pub use config::{OmsType, VenueConfig};
pub use data::{
    AggregationSource, Bar, BarAggregation, BarType, BookLevel, BookOp, Data, GenericData,
    InstrumentStatusUpdate, MarketStatus, OrderBookDelta, OrderBookSnapshot, OrderSide, QuoteTick,
    TradeTick, VenueStatusUpdate,
};
pub use engine::{BacktestEngine, RunSummary};
pub use errors::BacktestError;
pub use events::{BalanceSnapshot, ExecutionEvent};
pub use feed::{DataContainer, DataFeed, VecDataFeed};
pub use fill_model::{FillModel, FillModelConfig};
pub use identifiers::{
    AccountId, ClientId, ClientOrderId, InstrumentId, PositionId, StrategyId, TradeId, Venue,
    VenueOrderId,
};
pub use instrument::{CommissionSchedule, Instrument, LiquiditySide};
pub use latency::LatencyModel;
pub use matching::{MatchingStats, WorkingOrders};
pub use msgbus::{topic_matches, MessageBus, SubscriptionId};
pub use orders::{Order, OrderStatus, OrderType};
pub use position::{Position, PositionSide, PositionSnapshot};
pub use rates::{PriceType, RateCalculator};
pub use strategy::{BracketOrder, Strategy, StrategyContext};
pub use types::{Currency, CurrencyKind, Money, Price, Quantity, FIXED_PRECISION, FIXED_SCALE};
pub use venue::{SimulatedVenue, TradingCommand};
