//! Error Types
//!
//! Fatal configuration and bookkeeping errors. Command-level problems
//! (rejected orders, refused cancels) are never errors: they flow back to
//! strategies as rejection events.

use crate::clock::Nanos;
use thiserror::Error;

/// Fatal errors raised at API boundaries or during bookkeeping.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BacktestError {
    #[error("venue `{0}` is already registered")]
    DuplicateVenue(String),

    #[error("venue `{0}` is not registered")]
    UnknownVenue(String),

    #[error("instrument `{0}` is not registered")]
    UnknownInstrument(String),

    #[error("instrument `{0}` is already registered")]
    DuplicateInstrument(String),

    #[error("no data loaded")]
    NoData,

    #[error("invalid run range: start {start} >= end {end}")]
    InvalidRange { start: Nanos, end: Nanos },

    #[error("engine has been disposed")]
    Disposed,

    #[error("probability {0} outside [0.0, 1.0]")]
    InvalidProbability(f64),

    #[error("no starting balance configured for venue `{0}`")]
    MissingStartingBalance(String),

    #[error("no conversion rate from {from} to {to}")]
    RateUnavailable { from: String, to: String },

    #[error("bar type for `{0}` must use external aggregation")]
    InternalAggregation(String),

    #[error("generic data requires an explicit client id")]
    MissingClientId,
}
