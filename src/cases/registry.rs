use crate::cases::ZeroForSmallFor;
use crate::config::OracleConfig;
use crate::error::{CheckError, DefinitionError};
use crate::model::{ApiAlert, QuerySample, RuleGroupSnapshot, Timestamp};
use crate::notify::ExpectedNotification;
use crate::oracle::{check_expected_alerts, check_expected_rule_group, check_expected_samples};
use crate::rules::{RuleFile, RuleGroup};
use crate::samples::TimeSeries;
use chrono::Duration;

/// A conformance test case: what to load into the engine, what to inject,
/// and what to expect back at any instant
///
/// Projectors return every outcome that is valid at the given instant. The
/// provided `check_*` methods compare an observation against them with the
/// case's tolerance.
pub trait TestCase: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// The rule group to load into the engine
    fn rule_group(&self) -> &RuleGroup;

    /// The series to inject, with offsets relative to zero time
    fn samples(&self) -> Vec<TimeSeries>;

    /// Bind zero time; allowed once
    fn init(&mut self, zero_time: Timestamp) -> Result<(), DefinitionError>;

    fn zero_time(&self) -> Option<Timestamp>;

    /// Instant after which the driver may stop observing
    fn test_until(&self) -> Result<Timestamp, CheckError>;

    fn expected_alerts(&self, ts: Timestamp) -> Result<Vec<Vec<ApiAlert>>, CheckError>;

    fn expected_rule_groups(&self, ts: Timestamp) -> Result<Vec<RuleGroupSnapshot>, CheckError>;

    fn expected_samples(&self, ts: Timestamp) -> Result<Vec<Vec<QuerySample>>, CheckError>;

    /// The full notification timeline, in ordering-ID order
    fn expected_notifications(&self) -> Result<Vec<ExpectedNotification>, CheckError>;

    /// Timestamp slack for every comparison: one evaluation interval
    fn tolerance(&self) -> Duration {
        self.rule_group().interval
    }

    fn check_alerts(&self, ts: Timestamp, alerts: &[ApiAlert]) -> Result<(), CheckError> {
        check_expected_alerts(&self.expected_alerts(ts)?, alerts, self.tolerance())
    }

    /// The group may be absent until one evaluation interval has passed
    fn check_rule_group(
        &self,
        ts: Timestamp,
        group: Option<&RuleGroupSnapshot>,
    ) -> Result<(), CheckError> {
        let zero_time = self.zero_time().ok_or(CheckError::NotInitialized)?;
        if ts - zero_time < self.rule_group().interval {
            return Ok(());
        }
        let group = group.ok_or(CheckError::MissingRuleGroup)?;
        check_expected_rule_group(&self.expected_rule_groups(ts)?, group, self.tolerance())
    }

    fn check_metrics(&self, ts: Timestamp, samples: &[QuerySample]) -> Result<(), CheckError> {
        check_expected_samples(&self.expected_samples(ts)?, samples, self.tolerance())
    }
}

/// The set of test cases the oracle knows about
pub struct CaseRegistry {
    cases: Vec<Box<dyn TestCase>>,
}

impl Default for CaseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CaseRegistry {
    /// Create a registry with no cases
    pub fn new() -> Self {
        Self { cases: Vec::new() }
    }

    /// Create a registry holding every built-in case
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError` if a built-in case cannot be constructed
    /// from `config`.
    pub fn with_builtin_cases(config: &OracleConfig) -> Result<Self, DefinitionError> {
        let mut registry = Self::new();
        registry.add_case(Box::new(ZeroForSmallFor::new(config)?));
        Ok(registry)
    }

    pub fn add_case(&mut self, case: Box<dyn TestCase>) {
        self.cases.push(case);
    }

    pub fn case_count(&self) -> usize {
        self.cases.len()
    }

    pub fn find(&self, name: &str) -> Option<&dyn TestCase> {
        self.cases
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Box<dyn TestCase>> {
        self.cases.iter_mut().find(|c| c.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn TestCase> {
        self.cases.iter().map(|c| c.as_ref())
    }

    /// One rule file holding the groups of every case
    pub fn rule_file(&self) -> RuleFile<'_> {
        RuleFile {
            groups: self.cases.iter().map(|c| c.rule_group()).collect(),
        }
    }
}
