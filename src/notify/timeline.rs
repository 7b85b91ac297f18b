//! Expected notification timeline
//!
//! For every alert the engine sends a firing notification when the alert
//! starts firing and resends it every resend delay until it resolves. It then
//! sends a resolved notification and resends that for a bounded retention
//! period, or until the alert fires again, whichever comes first.
//!
//! Every generated event gets an ordering ID, strictly increasing in
//! generation order across all alerts of a timeline.

use crate::error::DefinitionError;
use crate::model::{Labels, ReceivedNotification, Timestamp};
use chrono::Duration;
use serde::{Serialize, Serializer};

/// Timing parameters shared by every burst of a timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineParams {
    group_interval: Duration,
    resend_delay: Duration,
    resolved_retention: Duration,
}

impl TimelineParams {
    /// # Errors
    ///
    /// Returns `DefinitionError::InvalidInterval` unless all durations are positive.
    pub fn new(
        group_interval: Duration,
        resend_delay: Duration,
        resolved_retention: Duration,
    ) -> Result<Self, DefinitionError> {
        for (name, d) in [
            ("group interval", group_interval),
            ("resend delay", resend_delay),
            ("resolved retention", resolved_retention),
        ] {
            if d <= Duration::zero() {
                return Err(DefinitionError::InvalidInterval(format!(
                    "{} must be positive, got {}ms",
                    name,
                    d.num_milliseconds()
                )));
            }
        }
        Ok(Self {
            group_interval,
            resend_delay,
            resolved_retention,
        })
    }

    /// How far past the send time a firing notification must expire: the
    /// greater of four resend delays and four evaluation intervals
    pub fn ends_at_delta(&self) -> Duration {
        std::cmp::max(self.resend_delay * 4, self.group_interval * 4)
    }
}

/// One stretch during which an alert fires and then resolves, as offsets
/// from zero time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiringPeriod {
    pub fires_at: Duration,
    pub resolves_at: Duration,
}

/// One notification the engine is expected to send
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedNotification {
    pub ordering_id: usize,
    pub labels: Labels,
    pub annotations: Labels,
    pub starts_at: Timestamp,
    /// Nominal send time
    pub ts: Timestamp,
    #[serde(rename = "toleranceMs", serialize_with = "as_millis")]
    pub tolerance: Duration,
    pub resolved: bool,
    /// Repeat of an earlier send for the same underlying state
    pub resend: bool,
    /// When the following state of this alert begins, if it ever does
    pub next_state: Option<Timestamp>,
    pub resolved_at: Timestamp,
    #[serde(rename = "endsAtDeltaMs", serialize_with = "as_millis")]
    pub ends_at_delta: Duration,
}

impl ExpectedNotification {
    pub fn identity(&self) -> String {
        self.labels.to_string()
    }

    /// What an engine sending exactly on time would deliver for this event
    pub fn delivered_at(&self, received_at: Timestamp) -> ReceivedNotification {
        ReceivedNotification {
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
            starts_at: self.starts_at,
            ends_at: if self.resolved {
                self.resolved_at
            } else {
                received_at + self.ends_at_delta
            },
            resolved: self.resolved,
            received_at,
        }
    }
}

/// Builds the expected notification timeline alert by alert
#[derive(Debug)]
pub struct TimelineGenerator {
    zero_time: Timestamp,
    params: TimelineParams,
    events: Vec<ExpectedNotification>,
}

impl TimelineGenerator {
    pub fn new(zero_time: Timestamp, params: TimelineParams) -> Self {
        Self {
            zero_time,
            params,
            events: Vec::new(),
        }
    }

    /// Append the firing and resolved bursts of one alert, period by period
    ///
    /// `periods` must be in time order. The resolved burst of a period is
    /// cut short where the next period starts firing.
    pub fn add_alert(&mut self, labels: &Labels, annotations: &Labels, periods: &[FiringPeriod]) {
        for (i, period) in periods.iter().enumerate() {
            let next_fires_at = periods.get(i + 1).map(|p| p.fires_at);
            let starts_at = self.zero_time + period.fires_at;
            let resolved_at = self.zero_time + period.resolves_at;

            let mut ts = period.fires_at;
            while ts < period.resolves_at {
                self.push(ExpectedNotification {
                    ordering_id: 0,
                    labels: labels.clone(),
                    annotations: annotations.clone(),
                    starts_at,
                    ts: self.zero_time + ts,
                    tolerance: self.params.group_interval,
                    resolved: false,
                    resend: ts != period.fires_at,
                    next_state: Some(resolved_at),
                    resolved_at,
                    ends_at_delta: self.params.ends_at_delta(),
                });
                ts = ts + self.params.resend_delay;
            }

            let retention_end = period.resolves_at + self.params.resolved_retention;
            let resolved_end = match next_fires_at {
                Some(next) => std::cmp::min(next, retention_end),
                None => retention_end,
            };
            let mut ts = period.resolves_at;
            while ts < resolved_end {
                // The resolution instant itself is only known to within one
                // evaluation, so the first resolved send gets a wider window.
                let tolerance = if ts == period.resolves_at {
                    self.params.group_interval * 2
                } else {
                    self.params.group_interval
                };
                self.push(ExpectedNotification {
                    ordering_id: 0,
                    labels: labels.clone(),
                    annotations: annotations.clone(),
                    starts_at,
                    ts: self.zero_time + ts,
                    tolerance,
                    resolved: true,
                    resend: ts != period.resolves_at,
                    next_state: next_fires_at.map(|next| self.zero_time + next),
                    resolved_at,
                    ends_at_delta: self.params.ends_at_delta(),
                });
                ts = ts + self.params.resend_delay;
            }
        }
    }

    fn push(&mut self, mut event: ExpectedNotification) {
        event.ordering_id = self.events.len() + 1;
        self.events.push(event);
    }

    pub fn finish(self) -> Vec<ExpectedNotification> {
        self.events
    }
}

fn as_millis<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(d.num_milliseconds())
}
