//! Notification stream matcher
//!
//! Consumes received notifications one at a time and reconciles them with
//! the expected timeline of each alert identity.

use crate::error::CheckError;
use crate::model::{ReceivedNotification, Timestamp};
use crate::notify::timeline::ExpectedNotification;
use crate::oracle::within;
use chrono::Duration;
use log::{debug, warn};
use std::collections::{BTreeMap, VecDeque};

/// Result of feeding one received notification to the matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Consumed the expected event with this ordering ID
    Matched(usize),
    /// Repeat delivery of the last matched event; ignored
    Duplicate,
}

/// The last event consumed for one alert identity
#[derive(Debug, Clone)]
struct LastMatch {
    resolved: bool,
    starts_at: Timestamp,
    received_at: Timestamp,
    tolerance: Duration,
}

/// Unconsumed expected events of one alert identity, in send order
#[derive(Debug)]
struct AlertQueue {
    pending: VecDeque<ExpectedNotification>,
    /// Observed minus nominal send time of the latest non-resend match
    offset: Duration,
    last: Option<LastMatch>,
    /// `EndsAt` carried by the first notification of the current resolved burst
    resolved_ends_at: Option<Timestamp>,
}

impl Default for AlertQueue {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            offset: Duration::zero(),
            last: None,
            resolved_ends_at: None,
        }
    }
}

impl AlertQueue {
    fn expected_at(&self, event: &ExpectedNotification) -> Timestamp {
        if event.resend {
            event.ts + self.offset
        } else {
            event.ts
        }
    }

    /// A resend due at or after its alert's next state begins; the engine
    /// sends the new state instead when both fall on one evaluation
    fn may_be_skipped(&self, event: &ExpectedNotification) -> bool {
        event.resend
            && event
                .next_state
                .is_some_and(|next| self.expected_at(event) >= next)
    }

    /// Drop leading resends that were overtaken by a notification of the
    /// other resolution state
    fn skip_overtaken(&mut self, resolved: bool) -> usize {
        let mut skipped = 0;
        while self
            .pending
            .front()
            .is_some_and(|head| head.resolved != resolved && self.may_be_skipped(head))
        {
            if let Some(event) = self.pending.pop_front() {
                debug!(
                    "Skipping resend #{} overtaken by its next state",
                    event.ordering_id
                );
                skipped += 1;
            }
        }
        skipped
    }

    /// The first pending event the engine must still send
    fn next_required(&self) -> Option<&ExpectedNotification> {
        self.pending.iter().find(|e| !self.may_be_skipped(e))
    }

    fn is_duplicate(&self, n: &ReceivedNotification) -> bool {
        match &self.last {
            Some(last) => {
                last.resolved == n.resolved
                    && last.starts_at == n.starts_at
                    && within(n.received_at, last.received_at, last.tolerance)
            }
            None => false,
        }
    }
}

/// Reconciles a received notification stream against the expected timeline
///
/// Each received notification is matched against the next unconsumed
/// expected event of the same alert identity. Duplicate deliveries are
/// collapsed, resends are re-anchored to the observed time of the first send
/// of their burst, and the ordering IDs of the expected events must be
/// respected across identities. A resend that falls due once its alert has
/// changed state may be left out by the engine; it is skipped when the
/// notification of the new state arrives and never counts as missed.
#[derive(Debug)]
pub struct NotificationMatcher {
    queues: BTreeMap<String, AlertQueue>,
    consumed: usize,
    duplicates: usize,
    skipped: usize,
}

impl NotificationMatcher {
    /// Create a matcher over an expected timeline
    ///
    /// # Arguments
    ///
    /// * `expected` - Expected events; each identity's events are consumed in ordering-ID order
    pub fn new(mut expected: Vec<ExpectedNotification>) -> Self {
        expected.sort_by_key(|e| e.ordering_id);
        let mut queues: BTreeMap<String, AlertQueue> = BTreeMap::new();
        for event in expected {
            queues
                .entry(event.identity())
                .or_default()
                .pending
                .push_back(event);
        }
        Self {
            queues,
            consumed: 0,
            duplicates: 0,
            skipped: 0,
        }
    }

    /// Match one received notification
    ///
    /// # Returns
    ///
    /// The ordering ID of the consumed event, or `MatchOutcome::Duplicate`
    /// for a repeat delivery.
    ///
    /// # Errors
    ///
    /// Returns a `CheckError` when the notification is unexpected, outside
    /// the tolerance window, has the wrong content, or overtakes an event
    /// with a lower ordering ID.
    pub fn observe(&mut self, n: &ReceivedNotification) -> Result<MatchOutcome, CheckError> {
        let identity = n.labels.to_string();
        let unexpected = || CheckError::UnexpectedNotification {
            identity: identity.clone(),
            received_at: n.received_at.to_rfc3339(),
        };

        let queue = self.queues.get_mut(&identity).ok_or_else(unexpected)?;
        if queue.is_duplicate(n) {
            warn!(
                "Ignoring duplicate notification for {} received at {}",
                identity, n.received_at
            );
            self.duplicates += 1;
            return Ok(MatchOutcome::Duplicate);
        }
        self.skipped += queue.skip_overtaken(n.resolved);

        let queue = self.queues.get(&identity).ok_or_else(unexpected)?;
        let head = queue.pending.front().ok_or_else(unexpected)?;
        let expected_at = queue.expected_at(head);
        if !within(n.received_at, expected_at, head.tolerance) {
            return Err(CheckError::OutsideTolerance {
                identity: identity.clone(),
                ordering_id: head.ordering_id,
                expected_at: expected_at.to_rfc3339(),
                received_at: n.received_at.to_rfc3339(),
                tolerance_ms: head.tolerance.num_milliseconds(),
            });
        }
        check_content(queue, head, n).map_err(|reason| CheckError::NotificationMismatch {
            identity: identity.clone(),
            ordering_id: head.ordering_id,
            reason,
        })?;
        self.check_order(&identity, head)?;

        let queue = self.queues.get_mut(&identity).ok_or_else(unexpected)?;
        let Some(event) = queue.pending.pop_front() else {
            return Err(unexpected());
        };
        if !event.resend {
            queue.offset = n.received_at - event.ts;
            queue.resolved_ends_at = if event.resolved {
                Some(n.ends_at)
            } else {
                None
            };
        }
        queue.last = Some(LastMatch {
            resolved: n.resolved,
            starts_at: n.starts_at,
            received_at: n.received_at,
            tolerance: event.tolerance,
        });
        self.consumed += 1;
        debug!(
            "Matched notification #{} for {} (resolved={}, resend={})",
            event.ordering_id, identity, event.resolved, event.resend
        );
        Ok(MatchOutcome::Matched(event.ordering_id))
    }

    /// Fail if another identity still owes an event that was due strictly
    /// before `event` and was generated ahead of it
    ///
    /// Resends the engine may leave out do not hold other identities back.
    fn check_order(&self, identity: &str, event: &ExpectedNotification) -> Result<(), CheckError> {
        for (other, queue) in &self.queues {
            if other == identity {
                continue;
            }
            if let Some(pending) = queue.next_required() {
                if pending.ordering_id < event.ordering_id && pending.ts < event.ts {
                    return Err(CheckError::OutOfOrder {
                        identity: identity.to_string(),
                        ordering_id: event.ordering_id,
                        pending_identity: other.clone(),
                        pending_id: pending.ordering_id,
                    });
                }
            }
        }
        Ok(())
    }

    /// Report expected events whose tolerance window closed before `until`
    /// without being observed
    ///
    /// # Errors
    ///
    /// Returns `CheckError::MissedNotifications` naming the earliest missed event.
    pub fn finish(&self, until: Timestamp) -> Result<(), CheckError> {
        let mut missed: Vec<&ExpectedNotification> = self
            .queues
            .values()
            .flat_map(|q| {
                q.pending
                    .iter()
                    .filter(move |e| !q.may_be_skipped(e))
                    .filter(move |e| q.expected_at(e) + e.tolerance < until)
            })
            .collect();
        if missed.is_empty() {
            return Ok(());
        }
        missed.sort_by_key(|e| e.ordering_id);
        let first = missed[0];
        Err(CheckError::MissedNotifications {
            count: missed.len(),
            first_id: first.ordering_id,
            first_identity: first.identity(),
        })
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Resends dropped because their alert had already changed state
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Expected events not yet consumed
    pub fn remaining(&self) -> usize {
        self.queues.values().map(|q| q.pending.len()).sum()
    }
}

fn check_content(
    queue: &AlertQueue,
    expected: &ExpectedNotification,
    n: &ReceivedNotification,
) -> Result<(), String> {
    if n.resolved != expected.resolved {
        return Err(format!(
            "expected resolved={}, got resolved={}",
            expected.resolved, n.resolved
        ));
    }
    if n.annotations != expected.annotations {
        return Err(format!(
            "expected annotations {}, got {}",
            expected.annotations, n.annotations
        ));
    }
    if !within(n.starts_at, expected.starts_at, expected.tolerance) {
        return Err(format!(
            "expected StartsAt {}, got {}",
            expected.starts_at.to_rfc3339(),
            n.starts_at.to_rfc3339()
        ));
    }

    if !expected.resolved {
        let want = n.received_at + expected.ends_at_delta;
        if !within(n.ends_at, want, expected.tolerance) {
            return Err(format!(
                "firing EndsAt {} is not {} after the send time",
                n.ends_at.to_rfc3339(),
                crate::rules::format_duration(expected.ends_at_delta)
            ));
        }
        return Ok(());
    }

    match (expected.resend, queue.resolved_ends_at) {
        (true, Some(first)) if n.ends_at != first => Err(format!(
            "resolved resend EndsAt {} differs from the first resolved EndsAt {}",
            n.ends_at.to_rfc3339(),
            first.to_rfc3339()
        )),
        (true, Some(_)) => Ok(()),
        _ if !within(n.ends_at, expected.resolved_at, expected.tolerance) => Err(format!(
            "resolved EndsAt {} is not the resolution time {}",
            n.ends_at.to_rfc3339(),
            expected.resolved_at.to_rfc3339()
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Labels;
    use crate::notify::simulate::SimulatedEngine;
    use crate::notify::timeline::{FiringPeriod, TimelineGenerator, TimelineParams};
    use chrono::{TimeZone, Utc};
    use quickcheck_macros::quickcheck;

    fn zero() -> Timestamp {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn params() -> TimelineParams {
        TimelineParams::new(
            Duration::seconds(10),
            Duration::minutes(1),
            Duration::minutes(15),
        )
        .unwrap()
    }

    fn period(fires: i64, resolves: i64) -> FiringPeriod {
        FiringPeriod {
            fires_at: Duration::seconds(fires),
            resolves_at: Duration::seconds(resolves),
        }
    }

    fn labels(name: &str) -> Labels {
        Labels::from_pairs(&[("alertname", name), ("rulegroup", "g")])
    }

    fn timeline() -> Vec<ExpectedNotification> {
        let mut generator = TimelineGenerator::new(zero(), params());
        generator.add_alert(
            &labels("a"),
            &Labels::from_pairs(&[("description", "a fires")]),
            &[period(40, 105), period(465, 530)],
        );
        generator.add_alert(
            &labels("b"),
            &Labels::from_pairs(&[("description", "b fires")]),
            &[period(50, 105)],
        );
        generator.finish()
    }

    /// The stream an engine sending with a constant delay would produce
    fn delivered(events: &[ExpectedNotification], shift: Duration) -> Vec<ReceivedNotification> {
        let mut sorted: Vec<&ExpectedNotification> = events.iter().collect();
        sorted.sort_by_key(|e| (e.ts, e.ordering_id));
        sorted
            .into_iter()
            .map(|e| e.delivered_at(e.ts + shift))
            .collect()
    }

    #[test]
    fn test_round_trip_consumes_everything() {
        let events = timeline();
        let total = events.len();
        let mut matcher = NotificationMatcher::new(events.clone());

        for n in delivered(&events, Duration::zero()) {
            assert!(matches!(matcher.observe(&n), Ok(MatchOutcome::Matched(_))));
        }
        assert_eq!(matcher.consumed(), total);
        assert_eq!(matcher.remaining(), 0);
        assert!(matcher.finish(zero() + Duration::hours(2)).is_ok());
    }

    #[test]
    fn test_unknown_identity_is_unexpected() {
        let mut matcher = NotificationMatcher::new(timeline());
        let mut n = timeline()[0].delivered_at(zero() + Duration::seconds(40));
        n.labels = labels("nope");

        assert!(matches!(
            matcher.observe(&n),
            Err(CheckError::UnexpectedNotification { .. })
        ));
    }

    #[test]
    fn test_outside_tolerance_fails() {
        let events = timeline();
        let mut matcher = NotificationMatcher::new(events.clone());
        let n = events[0].delivered_at(events[0].ts + Duration::seconds(11));

        match matcher.observe(&n) {
            Err(CheckError::OutsideTolerance {
                ordering_id,
                tolerance_ms,
                ..
            }) => {
                assert_eq!(ordering_id, 1);
                assert_eq!(tolerance_ms, 10_000);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_delivery_is_collapsed() {
        let events = timeline();
        let mut matcher = NotificationMatcher::new(events.clone());
        let first = events[0].delivered_at(events[0].ts);
        let again = events[0].delivered_at(events[0].ts + Duration::seconds(2));

        assert_eq!(matcher.observe(&first), Ok(MatchOutcome::Matched(1)));
        assert_eq!(matcher.observe(&again), Ok(MatchOutcome::Duplicate));
        assert_eq!(matcher.duplicates(), 1);
        assert_eq!(matcher.consumed(), 1);
    }

    #[test]
    fn test_premature_expiry_is_rejected() {
        let events = timeline();
        let mut matcher = NotificationMatcher::new(events.clone());
        let mut n = events[0].delivered_at(events[0].ts);
        n.ends_at = n.received_at + Duration::minutes(1);

        assert!(matches!(
            matcher.observe(&n),
            Err(CheckError::NotificationMismatch { ordering_id: 1, .. })
        ));
    }

    #[test]
    fn test_resolved_resends_keep_first_ends_at() {
        let events: Vec<_> = timeline()
            .into_iter()
            .filter(|e| e.labels == labels("b"))
            .collect();
        let mut matcher = NotificationMatcher::new(events.clone());

        // Firing, then the first resolved send with a slightly late EndsAt.
        matcher.observe(&events[0].delivered_at(events[0].ts)).unwrap();
        let mut first_resolved = events[1].delivered_at(events[1].ts);
        first_resolved.ends_at = first_resolved.ends_at + Duration::seconds(3);
        matcher.observe(&first_resolved).unwrap();

        let mut resend = events[2].delivered_at(events[2].ts);
        resend.ends_at = first_resolved.ends_at;
        assert!(matcher.observe(&resend).is_ok());

        let mut drifted = events[3].delivered_at(events[3].ts);
        drifted.ends_at = first_resolved.ends_at + Duration::seconds(1);
        assert!(matches!(
            matcher.observe(&drifted),
            Err(CheckError::NotificationMismatch { .. })
        ));
    }

    #[test]
    fn test_resends_follow_observed_offset() {
        let events: Vec<_> = timeline()
            .into_iter()
            .filter(|e| e.labels == labels("a"))
            .collect();
        let mut matcher = NotificationMatcher::new(events.clone());
        let late = Duration::seconds(8);

        matcher.observe(&events[0].delivered_at(events[0].ts + late)).unwrap();
        // 100s nominal, 108s re-anchored; 117s is within tolerance only of the latter.
        let resend = events[1].delivered_at(events[1].ts + Duration::seconds(17));
        assert!(matcher.observe(&resend).is_ok());
    }

    #[test]
    fn test_lower_ordering_id_must_arrive_first() {
        let mut generator = TimelineGenerator::new(zero(), params());
        generator.add_alert(&labels("five"), &Labels::new(), &[period(100, 110)]);
        generator.add_alert(&labels("six"), &Labels::new(), &[period(101, 200)]);
        let events = generator.finish();
        let five = events.iter().find(|e| e.labels == labels("five")).unwrap();
        let six = events.iter().find(|e| e.labels == labels("six")).unwrap();
        assert!(five.ordering_id < six.ordering_id);

        let mut matcher = NotificationMatcher::new(events.clone());
        match matcher.observe(&six.delivered_at(six.ts)) {
            Err(CheckError::OutOfOrder {
                ordering_id,
                pending_id,
                ..
            }) => {
                assert_eq!(ordering_id, six.ordering_id);
                assert_eq!(pending_id, five.ordering_id);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let mut matcher = NotificationMatcher::new(events.clone());
        assert!(matcher.observe(&five.delivered_at(five.ts)).is_ok());
        assert!(matcher.observe(&six.delivered_at(six.ts)).is_ok());
    }

    #[test]
    fn test_same_evaluation_sends_are_unordered() {
        let events = timeline();
        let b_resolved = events
            .iter()
            .find(|e| e.labels == labels("b") && e.resolved && !e.resend)
            .unwrap();
        let mut matcher = NotificationMatcher::new(events.clone());

        for n in delivered(&events, Duration::zero()) {
            if n.received_at >= b_resolved.ts {
                break;
            }
            matcher.observe(&n).unwrap();
        }
        // Both alerts resolve at 105s; "b" may arrive before "a".
        assert!(matcher.observe(&b_resolved.delivered_at(b_resolved.ts)).is_ok());
    }

    #[test]
    fn test_resolved_after_retention_is_rejected() {
        let events: Vec<_> = timeline()
            .into_iter()
            .filter(|e| e.labels == labels("b"))
            .collect();
        let mut matcher = NotificationMatcher::new(events.clone());
        for n in delivered(&events, Duration::zero()) {
            matcher.observe(&n).unwrap();
        }

        let last = events.last().unwrap();
        let late = last.delivered_at(zero() + Duration::seconds(105) + Duration::minutes(16));
        assert!(matches!(
            matcher.observe(&late),
            Err(CheckError::UnexpectedNotification { .. })
        ));
    }

    #[test]
    fn test_finish_reports_missed_events() {
        let events = timeline();
        let matcher = NotificationMatcher::new(events);

        assert!(matcher.finish(zero() + Duration::seconds(45)).is_ok());
        match matcher.finish(zero() + Duration::seconds(120)) {
            Err(CheckError::MissedNotifications {
                first_id, count, ..
            }) => {
                assert_eq!(first_id, 1);
                assert!(count >= 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_resend_overtaken_by_resolution_is_skipped() {
        let events = timeline();
        let total = events.len();
        // Evaluations at 8s past each interval: "a" fires at 48s, its resend
        // would fall due at 108s, the same evaluation that resolves it.
        let stream = SimulatedEngine::new(zero(), Duration::seconds(8)).stream(&events);
        let mut matcher = NotificationMatcher::new(events);

        for n in &stream {
            assert!(matches!(matcher.observe(n), Ok(MatchOutcome::Matched(_))));
        }
        assert_eq!(matcher.skipped(), 1);
        assert_eq!(matcher.consumed(), total - 1);
        assert_eq!(matcher.remaining(), 0);
        assert!(matcher.finish(zero() + Duration::hours(2)).is_ok());
    }

    #[test]
    fn test_resend_due_before_resolution_is_required() {
        let events = timeline();
        // At 2s past each interval the resend falls due at 102s, before the
        // resolution at 105s, so leaving it out is an error.
        let stream: Vec<_> = SimulatedEngine::new(zero(), Duration::seconds(2))
            .stream(&events)
            .into_iter()
            .filter(|n| n.resolved || n.received_at != zero() + Duration::seconds(102))
            .collect();
        let mut matcher = NotificationMatcher::new(events);

        matcher.observe(&stream[0]).unwrap();
        matcher.observe(&stream[1]).unwrap();
        assert!(matches!(
            matcher.observe(&stream[2]),
            Err(CheckError::NotificationMismatch { ordering_id: 2, .. })
        ));
        assert!(matches!(
            matcher.finish(zero() + Duration::seconds(120)),
            Err(CheckError::MissedNotifications { first_id: 2, .. })
        ));
    }

    #[test]
    fn test_skippable_resend_does_not_hold_back_other_alerts() {
        let events = timeline();
        let stream = SimulatedEngine::new(zero(), Duration::seconds(8)).stream(&events);
        let mut matcher = NotificationMatcher::new(events);

        // Both alerts resolve at 108s; "b" may be delivered first.
        let resolved_at = zero() + Duration::seconds(108);
        let (same_tick, earlier): (Vec<_>, Vec<_>) = stream
            .iter()
            .take_while(|n| n.received_at <= resolved_at)
            .partition(|n| n.received_at == resolved_at);
        for n in earlier {
            matcher.observe(n).unwrap();
        }
        for n in same_tick.iter().rev() {
            assert!(matches!(matcher.observe(n), Ok(MatchOutcome::Matched(_))));
        }
        assert_eq!(matcher.skipped(), 1);
    }

    #[quickcheck]
    fn prop_any_evaluation_phase_is_accepted(phase_ms: u16) -> bool {
        let phase = Duration::milliseconds((phase_ms % 10_000) as i64);
        let events = timeline();
        let total = events.len();
        let stream = SimulatedEngine::new(zero(), phase).stream(&events);
        let mut matcher = NotificationMatcher::new(events);

        stream
            .iter()
            .all(|n| matches!(matcher.observe(n), Ok(MatchOutcome::Matched(_))))
            && matcher.finish(zero() + Duration::hours(2)).is_ok()
            && matcher.consumed() + matcher.skipped() == total
    }

    #[quickcheck]
    fn prop_constant_delay_round_trip(shift_ms: u16) -> bool {
        // Stays inside the narrowest tolerance.
        let shift = Duration::milliseconds((shift_ms % 10_000) as i64);
        let events = timeline();
        let total = events.len();
        let mut matcher = NotificationMatcher::new(events.clone());

        delivered(&events, shift)
            .iter()
            .all(|n| matches!(matcher.observe(n), Ok(MatchOutcome::Matched(_))))
            && matcher.consumed() == total
    }
}
