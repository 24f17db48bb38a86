//! Data Container & Producer
//!
//! Holds preloaded per-instrument event series and merges them into the
//! single stably-sorted sequence the engine replays. Wranglers that parse
//! external sources live outside this crate; they hand finished `Data`
//! values to the container.

use crate::clock::Nanos;
use crate::data::{Bar, Data, OrderBookDelta, OrderBookSnapshot, QuoteTick, TradeTick};
use crate::errors::BacktestError;
use crate::identifiers::InstrumentId;
use std::collections::BTreeMap;

/// Replayable source of time-ordered data.
pub trait DataFeed {
    /// Next element in `ts_init` order.
    fn next_data(&mut self) -> Option<Data>;

    /// Timestamp of the next element without consuming it.
    fn peek_ts(&self) -> Option<Nanos>;

    /// Rewind to the beginning for another run.
    fn rewind(&mut self);

    /// Elements remaining, if known.
    fn remaining(&self) -> Option<usize> {
        None
    }
}

/// A feed backed by an in-memory, pre-sorted vector.
#[derive(Debug, Clone, Default)]
pub struct VecDataFeed {
    events: Vec<Data>,
    index: usize,
}

impl VecDataFeed {
    pub fn new(mut events: Vec<Data>) -> Self {
        events.sort_by_key(|d| d.ts_init());
        Self { events, index: 0 }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl DataFeed for VecDataFeed {
    fn next_data(&mut self) -> Option<Data> {
        let event = self.events.get(self.index).cloned()?;
        self.index += 1;
        Some(event)
    }

    fn peek_ts(&self) -> Option<Nanos> {
        self.events.get(self.index).map(|d| d.ts_init())
    }

    fn rewind(&mut self) {
        self.index = 0;
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.events.len().saturating_sub(self.index))
    }
}

/// Preloaded tabular sources keyed by instrument, merged on demand.
#[derive(Debug, Clone, Default)]
pub struct DataContainer {
    series: BTreeMap<InstrumentId, Vec<Data>>,
    other: Vec<Data>,
}

impl DataContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_quote_ticks(&mut self, ticks: Vec<QuoteTick>) {
        for tick in ticks {
            self.series
                .entry(tick.instrument_id.clone())
                .or_default()
                .push(Data::Quote(tick));
        }
    }

    pub fn add_trade_ticks(&mut self, ticks: Vec<TradeTick>) {
        for tick in ticks {
            self.series
                .entry(tick.instrument_id.clone())
                .or_default()
                .push(Data::Trade(tick));
        }
    }

    pub fn add_bars(&mut self, bars: Vec<Bar>) {
        for bar in bars {
            self.series
                .entry(bar.bar_type.instrument_id.clone())
                .or_default()
                .push(Data::Bar(bar));
        }
    }

    pub fn add_deltas(&mut self, deltas: Vec<OrderBookDelta>) {
        for delta in deltas {
            self.series
                .entry(delta.instrument_id.clone())
                .or_default()
                .push(Data::Delta(delta));
        }
    }

    pub fn add_snapshots(&mut self, snapshots: Vec<OrderBookSnapshot>) {
        for snapshot in snapshots {
            self.series
                .entry(snapshot.instrument_id.clone())
                .or_default()
                .push(Data::Snapshot(snapshot));
        }
    }

    pub fn add_other(&mut self, data: Vec<Data>) {
        self.other.extend(data);
    }

    pub fn instrument_ids(&self) -> impl Iterator<Item = &InstrumentId> {
        self.series.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(|s| s.is_empty()) && self.other.is_empty()
    }

    /// Check container integrity: every bar series for the same bar type
    /// must be externally aggregated (bar internals are the wranglers'
    /// concern and out of scope here).
    pub fn validate(&self) -> Result<(), BacktestError> {
        for series in self.series.values() {
            for data in series {
                if let Data::Bar(bar) = data {
                    if bar.bar_type.aggregation_source
                        != crate::data::AggregationSource::External
                    {
                        return Err(BacktestError::InternalAggregation(
                            bar.bar_type.instrument_id.to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Merge every series into one stably `ts_init`-sorted sequence.
    /// Per-series insertion order is preserved for equal timestamps, with
    /// instrument-keyed series ahead of unkeyed data.
    pub fn into_merged(self) -> Vec<Data> {
        let mut merged: Vec<Data> = Vec::new();
        for (_, series) in self.series {
            merged.extend(series);
        }
        merged.extend(self.other);
        merged.sort_by_key(|d| d.ts_init());
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AggregationSource, BarAggregation, BarType};
    use crate::identifiers::Venue;
    use crate::types::{Price, Quantity};

    fn instrument_id(symbol: &str) -> InstrumentId {
        InstrumentId::new(symbol, Venue::new("SIM"))
    }

    fn quote(symbol: &str, ts: Nanos) -> QuoteTick {
        QuoteTick {
            instrument_id: instrument_id(symbol),
            bid: Price::new(1.0, 2),
            ask: Price::new(1.01, 2),
            bid_size: Quantity::new(1.0, 0),
            ask_size: Quantity::new(1.0, 0),
            ts_event: ts,
            ts_init: ts,
        }
    }

    #[test]
    fn test_merge_is_time_ordered() {
        let mut container = DataContainer::new();
        container.add_quote_ticks(vec![quote("A", 3_000), quote("A", 1_000)]);
        container.add_quote_ticks(vec![quote("B", 2_000)]);

        let merged = container.into_merged();
        let times: Vec<Nanos> = merged.iter().map(|d| d.ts_init()).collect();
        assert_eq!(times, vec![1_000, 2_000, 3_000]);
    }

    #[test]
    fn test_merge_stable_for_equal_timestamps() {
        let mut container = DataContainer::new();
        container.add_quote_ticks(vec![quote("A", 1_000), quote("A", 1_000)]);
        let merged = container.into_merged();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_internal_bars_rejected() {
        let mut container = DataContainer::new();
        container.add_bars(vec![Bar {
            bar_type: BarType {
                instrument_id: instrument_id("A"),
                step: 1,
                aggregation: BarAggregation::Minute,
                aggregation_source: AggregationSource::Internal,
            },
            open: Price::new(1.0, 2),
            high: Price::new(1.1, 2),
            low: Price::new(0.9, 2),
            close: Price::new(1.05, 2),
            volume: Quantity::new(100.0, 0),
            ts_event: 0,
            ts_init: 0,
        }]);
        assert!(container.validate().is_err());
    }

    #[test]
    fn test_vec_feed_rewind() {
        let mut feed = VecDataFeed::new(vec![
            Data::Quote(quote("A", 2_000)),
            Data::Quote(quote("A", 1_000)),
        ]);
        assert_eq!(feed.peek_ts(), Some(1_000));
        feed.next_data();
        assert_eq!(feed.remaining(), Some(1));
        feed.rewind();
        assert_eq!(feed.peek_ts(), Some(1_000));
    }
}
