//! Latency Model
//!
//! Optional per-command-type delays between a strategy issuing a command
//! and the venue seeing it. With no model configured, commands deliver at
//! the issuing timestamp and are processed in the same loop step.

use crate::clock::Nanos;
use serde::{Deserialize, Serialize};

/// Fixed per-command-type latencies in nanoseconds. `base` applies when a
/// command-specific value is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyModel {
    pub base_latency_ns: Nanos,
    pub insert_latency_ns: Nanos,
    pub update_latency_ns: Nanos,
    pub cancel_latency_ns: Nanos,
}

impl LatencyModel {
    pub fn constant(latency_ns: Nanos) -> Self {
        Self {
            base_latency_ns: latency_ns,
            insert_latency_ns: 0,
            update_latency_ns: 0,
            cancel_latency_ns: 0,
        }
    }

    #[inline]
    pub fn insert_latency(&self) -> Nanos {
        if self.insert_latency_ns > 0 {
            self.insert_latency_ns
        } else {
            self.base_latency_ns
        }
    }

    #[inline]
    pub fn update_latency(&self) -> Nanos {
        if self.update_latency_ns > 0 {
            self.update_latency_ns
        } else {
            self.base_latency_ns
        }
    }

    #[inline]
    pub fn cancel_latency(&self) -> Nanos {
        if self.cancel_latency_ns > 0 {
            self.cancel_latency_ns
        } else {
            self.base_latency_ns
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_fallback() {
        let model = LatencyModel::constant(1_000);
        assert_eq!(model.insert_latency(), 1_000);
        assert_eq!(model.cancel_latency(), 1_000);
    }

    #[test]
    fn test_specific_overrides_base() {
        let model = LatencyModel {
            base_latency_ns: 1_000,
            insert_latency_ns: 2_000,
            update_latency_ns: 0,
            cancel_latency_ns: 500,
        };
        assert_eq!(model.insert_latency(), 2_000);
        assert_eq!(model.update_latency(), 1_000);
        assert_eq!(model.cancel_latency(), 500);
    }
}
