//! Shapes of everything the oracle observes from the engine under test
//!
//! These mirror the read interfaces of the engine: the active-alert listing,
//! the rule-group listing, the instant-query result and the outbound
//! notification payload. The oracle builds its expectations in the same
//! shapes so that comparison is field by field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp type for consistent time handling across the oracle
pub type Timestamp = DateTime<Utc>;

/// A set of labels (or annotations) with unique, ordered keys
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Build a label set from name/value pairs; later duplicates win
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Return a copy with `other` merged on top of `self`
    pub fn merged(&self, other: &Labels) -> Labels {
        let mut out = self.clone();
        for (k, v) in &other.0 {
            out.0.insert(k.clone(), v.clone());
        }
        out
    }

    /// Return a copy without the given label
    pub fn without(&self, name: &str) -> Labels {
        let mut out = self.clone();
        out.0.remove(name);
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Labels {
    /// Renders as `{a="b", c="d"}`, the selector form the engine accepts
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", k, v)?;
        }
        write!(f, "}}")
    }
}

/// State of an alert or of an alerting rule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    /// Condition does not hold
    Inactive,
    /// Condition holds but not yet for the rule's `for` duration
    Pending,
    /// Condition has held for at least the `for` duration
    Firing,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Inactive => "inactive",
            AlertState::Pending => "pending",
            AlertState::Firing => "firing",
        }
    }
}

/// One entry of the engine's active-alert listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiAlert {
    pub labels: Labels,
    pub annotations: Labels,
    pub state: AlertState,
    pub active_at: Option<Timestamp>,
    /// Query result that produced the alert, as the engine stringifies it
    pub value: String,
}

/// One alerting rule inside a rule-group snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSnapshot {
    pub state: AlertState,
    pub name: String,
    pub query: String,
    /// Declared `for` duration in seconds
    #[serde(default)]
    pub duration: f64,
    pub labels: Labels,
    /// Annotations as declared, templates unrendered
    pub annotations: Labels,
    #[serde(default)]
    pub alerts: Vec<ApiAlert>,
    pub health: String,
    #[serde(rename = "type")]
    pub rule_type: String,
}

/// The engine's view of one rule group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleGroupSnapshot {
    pub name: String,
    /// Evaluation interval in seconds
    pub interval: f64,
    pub rules: Vec<RuleSnapshot>,
}

/// One sample returned by an instant query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuerySample {
    pub metric: Labels,
    pub timestamp: Timestamp,
    pub value: f64,
}

/// One alert as delivered on the engine's outbound notification path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedNotification {
    pub labels: Labels,
    pub annotations: Labels,
    pub starts_at: Timestamp,
    pub ends_at: Timestamp,
    pub resolved: bool,
    /// When the receiver got the notification
    pub received_at: Timestamp,
}
