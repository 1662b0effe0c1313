//! Monotonic and wall-clock time plus deadline arithmetic.
//!
//! Dispatch intervals and processing latencies are measured on the monotonic
//! clock; message lifecycle timestamps and absolute deadlines are UTC.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default)]
pub struct Clock;

impl Clock {
    pub fn new() -> Self {
        Clock
    }

    /// Monotonic instant for interval measurement.
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// UTC instant for lifecycle timestamps and deadlines.
    pub fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// An absolute deadline the given number of milliseconds from now.
    pub fn deadline_in_ms(&self, ms: i64) -> DateTime<Utc> {
        self.utc_now() + ChronoDuration::milliseconds(ms)
    }

    pub fn is_past(&self, deadline: DateTime<Utc>) -> bool {
        self.utc_now() > deadline
    }

    /// Time remaining until `deadline`, or `None` if it already passed.
    pub fn until(&self, deadline: DateTime<Utc>) -> Option<Duration> {
        (deadline - self.utc_now()).to_std().ok()
    }

    /// Elapsed milliseconds since a monotonic start point.
    pub fn elapsed_ms(start: Instant) -> f64 {
        start.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_arithmetic() {
        let clock = Clock::new();
        let future = clock.deadline_in_ms(10_000);
        assert!(!clock.is_past(future));
        assert!(clock.until(future).is_some());

        let past = clock.deadline_in_ms(-10);
        assert!(clock.is_past(past));
        assert!(clock.until(past).is_none());
    }
}
