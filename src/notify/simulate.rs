//! Notification stream of an engine evaluating on a fixed tick grid
//!
//! The engine evaluates at `zero + phase + k × group interval`. An alert is
//! sent on the first tick at or after it starts firing, resent every resend
//! delay while still firing, and sent resolved from the first tick at or
//! after its resolution until the retention ends or it fires again.

use crate::config::OracleConfig;
use crate::model::{ReceivedNotification, Timestamp};
use crate::notify::ExpectedNotification;
use chrono::Duration;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub(crate) struct SimulatedEngine {
    zero_time: Timestamp,
    phase: Duration,
    group_interval: Duration,
    resend_delay: Duration,
    resolved_retention: Duration,
}

impl SimulatedEngine {
    /// Engine with the default intervals whose first evaluation is `phase`
    /// after zero time
    pub(crate) fn new(zero_time: Timestamp, phase: Duration) -> Self {
        let config = OracleConfig::default();
        Self {
            zero_time,
            phase,
            group_interval: config.group_interval(),
            resend_delay: config.resend_delay(),
            resolved_retention: config.resolved_retention(),
        }
    }

    fn tick_at_or_after(&self, t: Timestamp) -> Timestamp {
        let first = self.zero_time + self.phase;
        let gi = self.group_interval.num_milliseconds();
        let since = (t - first).num_milliseconds();
        let ticks = if since <= 0 { 0 } else { (since + gi - 1) / gi };
        first + Duration::milliseconds(ticks * gi)
    }

    /// Every notification the engine sends for the firing periods of
    /// `expected`, in order of receipt
    pub(crate) fn stream(&self, expected: &[ExpectedNotification]) -> Vec<ReceivedNotification> {
        let mut sorted: Vec<&ExpectedNotification> = expected.iter().collect();
        sorted.sort_by_key(|e| e.ordering_id);
        let mut periods: BTreeMap<String, Vec<&ExpectedNotification>> = BTreeMap::new();
        for event in sorted.into_iter().filter(|e| !e.resolved && !e.resend) {
            periods.entry(event.identity()).or_default().push(event);
        }

        let mut sends: Vec<(Timestamp, usize, ReceivedNotification)> = Vec::new();
        for heads in periods.values() {
            for (i, head) in heads.iter().enumerate() {
                let fires = self.tick_at_or_after(head.starts_at);
                let resolves = self.tick_at_or_after(head.resolved_at);

                let mut t = fires;
                while t < resolves {
                    let n = ReceivedNotification {
                        starts_at: fires,
                        ..head.delivered_at(t)
                    };
                    sends.push((t, head.ordering_id, n));
                    t = t + self.resend_delay;
                }

                let mut end = resolves + self.resolved_retention;
                if let Some(next) = heads.get(i + 1) {
                    end = end.min(self.tick_at_or_after(next.starts_at));
                }
                let mut t = resolves;
                while t < end {
                    let n = ReceivedNotification {
                        starts_at: fires,
                        ends_at: resolves,
                        resolved: true,
                        ..head.delivered_at(t)
                    };
                    sends.push((t, head.ordering_id, n));
                    t = t + self.resend_delay;
                }
            }
        }

        sends.sort_by_key(|(t, id, _)| (*t, *id));
        sends.into_iter().map(|(_, _, n)| n).collect()
    }
}
