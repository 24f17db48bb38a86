//! Identifiers
//!
//! Typed identifier wrappers used as lookup keys throughout the engine.
//! Cross-references between entities (order ↔ position, bracket ↔ children)
//! are stored as ids in lookup tables, never as owning pointers.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Execution destination identifier (one simulated exchange per venue).
    Venue
);
string_id!(
    /// Strategy-assigned order identifier, unique for the run.
    ClientOrderId
);
string_id!(
    /// Venue-assigned order identifier, set when an order is accepted.
    VenueOrderId
);
string_id!(
    /// Position identifier, assigned by the venue under its OMS type.
    PositionId
);
string_id!(
    /// Strategy identifier used for event routing.
    StrategyId
);
string_id!(
    /// Venue-assigned trade (fill) identifier.
    TradeId
);
string_id!(
    /// Account identifier.
    AccountId
);
string_id!(
    /// Data client identifier, required for events without an instrument.
    ClientId
);

/// Instrument identifier: symbol plus the venue it trades on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentId {
    pub symbol: String,
    pub venue: Venue,
}

impl InstrumentId {
    pub fn new(symbol: impl Into<String>, venue: Venue) -> Self {
        Self {
            symbol: symbol.into(),
            venue,
        }
    }

    /// Parse from `"SYMBOL.VENUE"` notation. The venue is everything after
    /// the last dot, which keeps dotted symbols intact.
    pub fn parse(value: &str) -> Option<Self> {
        let idx = value.rfind('.')?;
        let (symbol, venue) = value.split_at(idx);
        if symbol.is_empty() || venue.len() < 2 {
            return None;
        }
        Some(Self {
            symbol: symbol.to_string(),
            venue: Venue::new(&venue[1..]),
        })
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.symbol, self.venue)
    }
}
