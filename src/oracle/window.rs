//! Half-open time windows over elapsed time since zero
//!
//! Scenario flags are membership tests against these windows. Bounds are in
//! milliseconds since the test's zero time; the lower bound is included and
//! the upper bound excluded.

use crate::model::Timestamp;
use chrono::Duration;

/// `[start, end)` in elapsed milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl Window {
    pub fn new(start: Duration, end: Duration) -> Self {
        Self {
            start_ms: start.num_milliseconds(),
            end_ms: end.num_milliseconds(),
        }
    }

    pub fn contains(&self, elapsed_ms: i64) -> bool {
        elapsed_ms >= self.start_ms && elapsed_ms < self.end_ms
    }
}

/// A scenario that is valid on a union of windows
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WindowSet {
    windows: Vec<Window>,
}

impl WindowSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, start: Duration, end: Duration) -> Self {
        self.windows.push(Window::new(start, end));
        self
    }

    pub fn contains(&self, elapsed_ms: i64) -> bool {
        self.windows.iter().any(|w| w.contains(elapsed_ms))
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }
}

impl From<Window> for WindowSet {
    fn from(window: Window) -> Self {
        Self {
            windows: vec![window],
        }
    }
}

/// Milliseconds between `zero_time` and `ts`
pub fn elapsed_ms(zero_time: Timestamp, ts: Timestamp) -> i64 {
    (ts - zero_time).num_milliseconds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_window_is_half_open() {
        let w = Window::new(Duration::seconds(40), Duration::seconds(50));
        assert!(!w.contains(39_999));
        assert!(w.contains(40_000));
        assert!(w.contains(49_999));
        assert!(!w.contains(50_000));
    }

    #[test]
    fn test_window_set_union() {
        let set = WindowSet::new()
            .with(Duration::zero(), Duration::seconds(10))
            .with(Duration::seconds(20), Duration::seconds(30));

        assert!(set.contains(5_000));
        assert!(!set.contains(15_000));
        assert!(set.contains(20_000));
        assert_eq!(set.windows().len(), 2);
    }

    #[test]
    fn test_elapsed_ms() {
        use chrono::TimeZone;
        let zero = chrono::Utc.timestamp_millis_opt(1_000).unwrap();
        assert_eq!(elapsed_ms(zero, zero + Duration::milliseconds(2_500)), 2_500);
        assert_eq!(elapsed_ms(zero, zero - Duration::seconds(1)), -1_000);
    }

    #[quickcheck]
    fn prop_contains_matches_bounds(start: i32, len: u16, probe: i32) -> bool {
        let start = start as i64;
        let w = Window {
            start_ms: start,
            end_ms: start + len as i64,
        };
        let probe = probe as i64;
        w.contains(probe) == (probe >= start && probe < start + len as i64)
    }
}
