//! Market Data Model
//!
//! Canonical replay event types. Every element carries `ts_event` (when it
//! happened at the source) and `ts_init` (when it became visible), and
//! `ts_init` is the sole global ordering key for the event loop.

use crate::clock::Nanos;
use crate::identifiers::{ClientId, InstrumentId, TradeId, Venue};
use crate::types::{Price, Quantity};
use serde::{Deserialize, Serialize};

/// Order side, also used for trade aggressors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[inline]
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Best bid/ask snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteTick {
    pub instrument_id: InstrumentId,
    pub bid: Price,
    pub ask: Price,
    pub bid_size: Quantity,
    pub ask_size: Quantity,
    pub ts_event: Nanos,
    pub ts_init: Nanos,
}

/// An executed trade carrying the aggressor side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeTick {
    pub instrument_id: InstrumentId,
    pub price: Price,
    pub size: Quantity,
    pub aggressor_side: OrderSide,
    pub trade_id: TradeId,
    pub ts_event: Nanos,
    pub ts_init: Nanos,
}

/// One aggregated price level of a book snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Price,
    pub size: Quantity,
}

impl BookLevel {
    #[inline]
    pub fn new(price: Price, size: Quantity) -> Self {
        Self { price, size }
    }
}

/// Book delta operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookOp {
    Add,
    Update,
    Delete,
}

/// Incremental order-book update at a single level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookDelta {
    pub instrument_id: InstrumentId,
    pub side: OrderSide,
    pub price: Price,
    pub size: Quantity,
    pub op: BookOp,
    pub ts_event: Nanos,
    pub ts_init: Nanos,
}

/// Full order-book replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub instrument_id: InstrumentId,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub ts_event: Nanos,
    pub ts_init: Nanos,
}

/// Bar aggregation dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarAggregation {
    Second,
    Minute,
    Hour,
    Day,
    Tick,
    Volume,
}

/// Where a bar was aggregated. The replay engine only accepts external
/// (pre-aggregated) bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationSource {
    External,
    Internal,
}

/// Bar specification: `step` units of `aggregation`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BarType {
    pub instrument_id: InstrumentId,
    pub step: u64,
    pub aggregation: BarAggregation,
    pub aggregation_source: AggregationSource,
}

impl BarType {
    pub fn external(instrument_id: InstrumentId, step: u64, aggregation: BarAggregation) -> Self {
        Self {
            instrument_id,
            step,
            aggregation,
            aggregation_source: AggregationSource::External,
        }
    }
}

/// OHLCV aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub bar_type: BarType,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Quantity,
    pub ts_event: Nanos,
    pub ts_init: Nanos,
}

/// Venue trading status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    Open,
    Halted,
    Closed,
}

/// Venue-wide status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueStatusUpdate {
    pub venue: Venue,
    pub status: MarketStatus,
    pub ts_event: Nanos,
    pub ts_init: Nanos,
}

/// Per-instrument status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentStatusUpdate {
    pub instrument_id: InstrumentId,
    pub status: MarketStatus,
    pub ts_event: Nanos,
    pub ts_init: Nanos,
}

/// Opaque payload routed to strategies only. Requires an explicit client id
/// because there is no instrument to route by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericData {
    pub data_type: String,
    pub client_id: Option<ClientId>,
    pub payload: serde_json::Value,
    pub ts_event: Nanos,
    pub ts_init: Nanos,
}

/// Any replayable market data element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Data {
    Quote(QuoteTick),
    Trade(TradeTick),
    Delta(OrderBookDelta),
    Snapshot(OrderBookSnapshot),
    Bar(Bar),
    VenueStatus(VenueStatusUpdate),
    InstrumentStatus(InstrumentStatusUpdate),
    Generic(GenericData),
}

impl Data {
    /// Global ordering key.
    #[inline]
    pub fn ts_init(&self) -> Nanos {
        match self {
            Data::Quote(d) => d.ts_init,
            Data::Trade(d) => d.ts_init,
            Data::Delta(d) => d.ts_init,
            Data::Snapshot(d) => d.ts_init,
            Data::Bar(d) => d.ts_init,
            Data::VenueStatus(d) => d.ts_init,
            Data::InstrumentStatus(d) => d.ts_init,
            Data::Generic(d) => d.ts_init,
        }
    }

    /// Instrument this element references, if any.
    pub fn instrument_id(&self) -> Option<&InstrumentId> {
        match self {
            Data::Quote(d) => Some(&d.instrument_id),
            Data::Trade(d) => Some(&d.instrument_id),
            Data::Delta(d) => Some(&d.instrument_id),
            Data::Snapshot(d) => Some(&d.instrument_id),
            Data::Bar(d) => Some(&d.bar_type.instrument_id),
            Data::InstrumentStatus(d) => Some(&d.instrument_id),
            Data::VenueStatus(_) | Data::Generic(_) => None,
        }
    }

    /// Venue this element dispatches to, if any.
    pub fn venue(&self) -> Option<&Venue> {
        match self {
            Data::VenueStatus(d) => Some(&d.venue),
            Data::Generic(_) => None,
            other => other.instrument_id().map(|id| &id.venue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::Venue;

    fn quote(ts: Nanos) -> Data {
        Data::Quote(QuoteTick {
            instrument_id: InstrumentId::new("AAPL", Venue::new("NASDAQ")),
            bid: Price::new(100.00, 2),
            ask: Price::new(100.02, 2),
            bid_size: Quantity::new(100.0, 0),
            ask_size: Quantity::new(100.0, 0),
            ts_event: ts,
            ts_init: ts,
        })
    }

    #[test]
    fn test_ts_init_accessor() {
        assert_eq!(quote(1_000).ts_init(), 1_000);
    }

    #[test]
    fn test_venue_routing() {
        let d = quote(1);
        assert_eq!(d.venue(), Some(&Venue::new("NASDAQ")));

        let status = Data::VenueStatus(VenueStatusUpdate {
            venue: Venue::new("NASDAQ"),
            status: MarketStatus::Halted,
            ts_event: 1,
            ts_init: 1,
        });
        assert_eq!(status.venue(), Some(&Venue::new("NASDAQ")));
        assert!(status.instrument_id().is_none());
    }

    #[test]
    fn test_stable_sort_preserves_insertion_order() {
        let mut data = vec![quote(2_000), quote(1_000), quote(1_000)];
        data.sort_by_key(|d| d.ts_init());
        let times: Vec<Nanos> = data.iter().map(|d| d.ts_init()).collect();
        assert_eq!(times, vec![1_000, 1_000, 2_000]);
    }
}
