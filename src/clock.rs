//! Test Clock
//!
//! Monotonic simulated clock with nanosecond resolution, plus registered
//! timers (one-shot alerts and periodic timers). Single source of truth for
//! all simulation time - NEVER call system time inside the loop.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Nanoseconds since Unix epoch (1970-01-01 00:00:00 UTC).
/// i64 gives ~292 years of range, sufficient for any backtest.
pub type Nanos = i64;

/// Conversion constants.
pub const NANOS_PER_MICRO: i64 = 1_000;
pub const NANOS_PER_MILLI: i64 = 1_000_000;
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A fired timer event. Delivered to the owning strategy in `ts_event`
/// order; the `event_id` is a per-clock monotone counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeEvent {
    /// Timer name as registered.
    pub name: String,
    /// Per-clock monotone event counter.
    pub event_id: u64,
    /// Scheduled fire time.
    pub ts_event: Nanos,
}

/// Registered timer state.
#[derive(Debug, Clone)]
struct ClockTimer {
    name: String,
    next_time: Nanos,
    /// `Some` for periodic timers, `None` for one-shot alerts.
    interval: Option<Nanos>,
    /// Periodic timers stop firing strictly after this instant.
    stop_time: Option<Nanos>,
}

/// Simulated clock owned by one strategy.
///
/// # Determinism Contract
/// - `now()` returns the current simulation time, never system time
/// - `advance_time()` only moves forward
/// - Due timer events come back in non-decreasing `ts_event` order, with
///   registration order breaking ties
#[derive(Debug, Clone, Default)]
pub struct TestClock {
    current: Nanos,
    timers: Vec<ClockTimer>,
    next_event_id: u64,
}

impl TestClock {
    pub fn new(start_time: Nanos) -> Self {
        Self {
            current: start_time,
            timers: Vec::new(),
            next_event_id: 0,
        }
    }

    /// Current simulation time in nanoseconds.
    #[inline]
    pub fn now(&self) -> Nanos {
        self.current
    }

    /// Force the current time without firing timers.
    #[inline]
    pub fn set_time(&mut self, time: Nanos) {
        self.current = time;
    }

    /// Register a one-shot alert. An alert scheduled at or before the
    /// current time fires on the next `advance_time` call.
    pub fn set_time_alert_ns(&mut self, name: impl Into<String>, alert_time: Nanos) {
        let name = name.into();
        self.cancel_timer(&name);
        self.timers.push(ClockTimer {
            name,
            next_time: alert_time,
            interval: None,
            stop_time: None,
        });
    }

    /// Register a periodic timer firing every `interval_ns` starting at
    /// `start_time` (exclusive of the start instant itself).
    pub fn set_timer_ns(
        &mut self,
        name: impl Into<String>,
        interval_ns: Nanos,
        start_time: Nanos,
        stop_time: Option<Nanos>,
    ) {
        debug_assert!(interval_ns > 0, "timer interval must be positive");
        let name = name.into();
        self.cancel_timer(&name);
        self.timers.push(ClockTimer {
            name,
            next_time: start_time + interval_ns,
            interval: Some(interval_ns),
            stop_time,
        });
    }

    /// Remove a timer by name. Returns true if one was registered.
    pub fn cancel_timer(&mut self, name: &str) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.name != name);
        before != self.timers.len()
    }

    /// Names of registered timers, in registration order.
    pub fn timer_names(&self) -> Vec<&str> {
        self.timers.iter().map(|t| t.name.as_str()).collect()
    }

    #[inline]
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Advance to `to_time`, returning every timer event due at or before
    /// it, in non-decreasing `ts_event` order. When `set_time` is false the
    /// clock time is left untouched (peek semantics).
    pub fn advance_time(&mut self, to_time: Nanos, set_time: bool) -> Vec<TimeEvent> {
        let mut events = Vec::new();

        for timer in &mut self.timers {
            while timer.next_time <= to_time {
                if let Some(stop) = timer.stop_time {
                    if timer.next_time > stop {
                        break;
                    }
                }
                events.push((timer.next_time, timer.name.clone()));
                match timer.interval {
                    Some(interval) => timer.next_time += interval,
                    None => {
                        timer.next_time = Nanos::MAX;
                        break;
                    }
                }
            }
        }

        // One-shot timers that fired are spent; periodic timers past their
        // stop time are done as well.
        self.timers.retain(|t| {
            t.next_time != Nanos::MAX && t.stop_time.map_or(true, |stop| t.next_time <= stop)
        });

        // Stable by fire time; registration order breaks ties.
        events.sort_by_key(|(ts, _)| *ts);

        if set_time {
            self.current = self.current.max(to_time);
        }

        events
            .into_iter()
            .map(|(ts_event, name)| {
                let event_id = self.next_event_id;
                self.next_event_id += 1;
                TimeEvent {
                    name,
                    event_id,
                    ts_event,
                }
            })
            .collect()
    }

    /// Reset to time zero with no timers.
    pub fn reset(&mut self) {
        self.current = 0;
        self.timers.clear();
        self.next_event_id = 0;
    }
}

impl fmt::Display for TestClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.current / NANOS_PER_SEC;
        let nanos = self.current % NANOS_PER_SEC;
        write!(f, "{}.{:09}s", secs, nanos)
    }
}

/// Helper to convert chrono DateTime to Nanos.
#[inline]
pub fn datetime_to_nanos(dt: &chrono::DateTime<chrono::Utc>) -> Nanos {
    dt.timestamp_nanos_opt().unwrap_or(0)
}

/// Helper to convert Nanos to chrono DateTime.
#[inline]
pub fn nanos_to_datetime(nanos: Nanos) -> chrono::DateTime<chrono::Utc> {
    use chrono::TimeZone;
    let secs = nanos / NANOS_PER_SEC;
    let nsecs = (nanos % NANOS_PER_SEC) as u32;
    chrono::Utc.timestamp_opt(secs, nsecs).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_fires_once() {
        let mut clock = TestClock::new(1_000);
        clock.set_time_alert_ns("alert-1", 1_500);

        let events = clock.advance_time(1_400, true);
        assert!(events.is_empty());

        let events = clock.advance_time(2_000, true);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "alert-1");
        assert_eq!(events[0].ts_event, 1_500);
        assert_eq!(clock.timer_count(), 0);

        assert!(clock.advance_time(3_000, true).is_empty());
    }

    #[test]
    fn test_periodic_timer_fires_every_interval() {
        let mut clock = TestClock::new(0);
        clock.set_timer_ns("tick", 100, 0, Some(350));

        let events = clock.advance_time(400, true);
        let times: Vec<Nanos> = events.iter().map(|e| e.ts_event).collect();
        assert_eq!(times, vec![100, 200, 300]);
        assert_eq!(clock.timer_count(), 0);
    }

    #[test]
    fn test_events_ordered_across_timers() {
        let mut clock = TestClock::new(0);
        clock.set_time_alert_ns("late", 300);
        clock.set_time_alert_ns("early", 100);
        clock.set_timer_ns("periodic", 150, 0, None);

        let events = clock.advance_time(300, true);
        let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["early", "periodic", "late", "periodic"]);
        let times: Vec<Nanos> = events.iter().map(|e| e.ts_event).collect();
        assert_eq!(times, vec![100, 150, 300, 300]);
    }

    #[test]
    fn test_alert_at_or_before_now_fires_on_next_advance() {
        let mut clock = TestClock::new(2_000);
        clock.set_time_alert_ns("past", 2_000);
        let events = clock.advance_time(2_000, true);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].ts_event, 2_000);
    }

    #[test]
    fn test_reregistering_replaces_timer() {
        let mut clock = TestClock::new(0);
        clock.set_time_alert_ns("a", 100);
        clock.set_time_alert_ns("a", 200);
        let events = clock.advance_time(300, true);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].ts_event, 200);
    }

    #[test]
    fn test_advance_without_set_time_keeps_now() {
        let mut clock = TestClock::new(0);
        clock.set_time_alert_ns("a", 50);
        let events = clock.advance_time(100, false);
        assert_eq!(events.len(), 1);
        assert_eq!(clock.now(), 0);
    }
}
