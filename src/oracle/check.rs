//! Comparator: matches an observation against a set of candidate expectations
//!
//! Evaluation is periodic, so at a window boundary more than one outcome can
//! be correct. An observation passes when it is equivalent to at least one
//! candidate. Collections are compared as multisets (order ignored, keyed by
//! labels); timestamps are compared within a tolerance, everything else exactly.

use crate::error::CheckError;
use crate::model::{ApiAlert, QuerySample, RuleGroupSnapshot, RuleSnapshot, Timestamp};
use chrono::Duration;
use log::debug;
use serde::Serialize;

/// Check the active-alert listing against the candidate sets
///
/// # Errors
///
/// Returns `CheckError::NoMatchingCandidate` when no candidate matches.
pub fn check_expected_alerts(
    expected: &[Vec<ApiAlert>],
    actual: &[ApiAlert],
    tolerance: Duration,
) -> Result<(), CheckError> {
    match_any("alerts", expected, actual, |candidate| {
        set_equivalent(candidate.as_slice(), actual, |a| a.labels.clone(), |e, a| {
            alerts_match(e, a, tolerance)
        })
    })
}

/// Check a rule-group snapshot against the candidate snapshots
///
/// Rules are compared in declaration order; the alerts of each rule as a set.
///
/// # Errors
///
/// Returns `CheckError::NoMatchingCandidate` when no candidate matches.
pub fn check_expected_rule_group(
    expected: &[RuleGroupSnapshot],
    actual: &RuleGroupSnapshot,
    tolerance: Duration,
) -> Result<(), CheckError> {
    match_any("rule group", expected, actual, |candidate| {
        groups_match(candidate, actual, tolerance)
    })
}

/// Check instant-query samples against the candidate sets
///
/// # Errors
///
/// Returns `CheckError::NoMatchingCandidate` when no candidate matches.
pub fn check_expected_samples(
    expected: &[Vec<QuerySample>],
    actual: &[QuerySample],
    tolerance: Duration,
) -> Result<(), CheckError> {
    match_any("samples", expected, actual, |candidate| {
        set_equivalent(candidate.as_slice(), actual, |s| s.metric.clone(), |e, a| {
            e.metric == a.metric && e.value == a.value && within(e.timestamp, a.timestamp, tolerance)
        })
    })
}

fn match_any<C, A>(
    what: &'static str,
    candidates: &[C],
    actual: &A,
    matches: impl Fn(&C) -> bool,
) -> Result<(), CheckError>
where
    C: Serialize,
    A: Serialize + ?Sized,
{
    if let Some(i) = candidates.iter().position(|c| matches(c)) {
        debug!("{} matched candidate {} of {}", what, i + 1, candidates.len());
        return Ok(());
    }
    Err(CheckError::NoMatchingCandidate {
        what,
        actual: describe(actual),
        candidates: describe(candidates),
    })
}

/// Multiset equality: same length and pairwise `same` after sorting by `key`
fn set_equivalent<T, K: Ord>(
    expected: &[T],
    actual: &[T],
    key: impl Fn(&T) -> K,
    same: impl Fn(&T, &T) -> bool,
) -> bool {
    if expected.len() != actual.len() {
        return false;
    }
    let mut expected: Vec<&T> = expected.iter().collect();
    let mut actual: Vec<&T> = actual.iter().collect();
    expected.sort_by(|x, y| key(*x).cmp(&key(*y)));
    actual.sort_by(|x, y| key(*x).cmp(&key(*y)));
    expected.iter().zip(&actual).all(|(e, a)| same(*e, *a))
}

fn groups_match(e: &RuleGroupSnapshot, a: &RuleGroupSnapshot, tolerance: Duration) -> bool {
    e.name == a.name
        && e.interval == a.interval
        && e.rules.len() == a.rules.len()
        && e
            .rules
            .iter()
            .zip(&a.rules)
            .all(|(er, ar)| rules_match(er, ar, tolerance))
}

fn rules_match(e: &RuleSnapshot, a: &RuleSnapshot, tolerance: Duration) -> bool {
    e.state == a.state
        && e.name == a.name
        && e.query == a.query
        && e.duration == a.duration
        && e.labels == a.labels
        && e.annotations == a.annotations
        && e.health == a.health
        && e.rule_type == a.rule_type
        && set_equivalent(e.alerts.as_slice(), a.alerts.as_slice(), |x| x.labels.clone(), |x, y| {
            alerts_match(x, y, tolerance)
        })
}

/// Exact on identity, state, annotations and value; `active_at` within tolerance
pub fn alerts_match(e: &ApiAlert, a: &ApiAlert, tolerance: Duration) -> bool {
    let active_at_ok = match (e.active_at, a.active_at) {
        (Some(x), Some(y)) => within(x, y, tolerance),
        (None, None) => true,
        _ => false,
    };
    e.labels == a.labels
        && e.state == a.state
        && e.annotations == a.annotations
        && values_match(&e.value, &a.value)
        && active_at_ok
}

/// Values compare numerically when both parse, so `15` equals `1.5e+01`
pub fn values_match(expected: &str, actual: &str) -> bool {
    match (expected.parse::<f64>(), actual.parse::<f64>()) {
        (Ok(x), Ok(y)) => x == y || (x.is_nan() && y.is_nan()),
        _ => expected == actual,
    }
}

pub fn within(a: Timestamp, b: Timestamp, tolerance: Duration) -> bool {
    (a - b).abs() <= tolerance
}

fn describe<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unprintable: {}>", e))
}
