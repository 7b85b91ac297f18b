//! Zero `for` and small `for` alerts in one group
//!
//! Covers four behaviours:
//! 1. An alert with a zero `for` duration fires directly, skipping pending.
//! 2. An alert whose `for` is shorter than the evaluation interval is pending
//!    at the first qualifying evaluation and fires only from the second.
//! 3. The zero `for` alert fires again after it resolved and its resolved
//!    notifications were no longer being sent.
//! 4. A firing alert goes inactive when its series stops exceeding the
//!    threshold.
//!
//! Both rules watch the same sample shape: it crosses 13 (and therefore 10)
//! at the 8th sample, drops to 9 at the 21st, rises to 11 at the 93rd and
//! drops to 9 again at the 106th.

use crate::cases::TestCase;
use crate::config::OracleConfig;
use crate::error::{CheckError, DefinitionError};
use crate::model::{
    AlertState, ApiAlert, Labels, QuerySample, RuleGroupSnapshot, RuleSnapshot, Timestamp,
};
use crate::notify::{ExpectedNotification, FiringPeriod, TimelineGenerator, TimelineParams};
use crate::oracle::{elapsed_ms, WindowSet};
use crate::rules::{AnnotationRenderer, FixtureRenderer, Rule, RuleGroup};
use crate::samples::{SampleTimeline, TimeSeries};
use chrono::Duration;
use log::info;
use std::ops::Range;

pub const GROUP_NAME: &str = "ZeroFor_SmallFor";
pub const ZERO_FOR_ALERT: &str = "ZeroFor_SmallFor_ZeroFor";
pub const SMALL_FOR_ALERT: &str = "ZeroFor_SmallFor_SmallFor";

const METRIC_NAME: &str = "alert_generator_test_suite";

/// Sample shape shared by both series
const SAMPLE_TOKENS: &[&str] = &[
    "3", "5", "0x2", "9", // ramp, below both thresholds
    "0x3", "15", // crosses both thresholds at the 8th sample
    "0x12", // active
    "9", "0x71", // resolved for longer than the resolved retention
    "11", "0x12", // above the zero-for threshold only
    "9",    // resolved again
];

/// Extra samples' worth of time to observe the inactive tail
const TAIL_SAMPLES: usize = 20;

/// End of the last inactive window, in sample intervals
const INACTIVE_HORIZON_SAMPLES: i32 = 240;

const ZERO_FOR_DESCRIPTION: &str = "This should immediately fire";
const ZERO_FOR_TEMPLATE: &str = "{{humanize 1048576}} {{humanize1024 1048576}} {{humanizeDuration 135.3563}} {{humanizePercentage 0.959}} {{humanizeTimestamp 1643114203}}";
const ZERO_FOR_RENDERED: &str = "1.049M 1Mi 2m 15s 95.9% 2022-01-25 12:36:43 +0000 UTC";

const SMALL_FOR_DESCRIPTION: &str = "This should fire after an interval";
const SMALL_FOR_TEMPLATE: &str = r#"{{title "this part"}} {{toUpper "is testing"}} {{toLower "THE STRINGS"}}. {{if match "[0-9]+" "1234"}}{{reReplaceAll "r.*d" "replaced" "rpld text"}}{{end}}. {{if match "[0-9]+$" "1234a"}}WRONG{{end}}."#;
const SMALL_FOR_RENDERED: &str = "This Part IS TESTING the strings. replaced text. .";

/// Renderer that knows the outputs of this case's annotation templates
pub fn builtin_renderer() -> FixtureRenderer {
    FixtureRenderer::new()
        .with_output(ZERO_FOR_TEMPLATE, ZERO_FOR_RENDERED)
        .with_output(SMALL_FOR_TEMPLATE, SMALL_FOR_RENDERED)
}

/// Which outcomes are valid at one elapsed time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScenarioFlags {
    pub can_be_inactive: bool,
    pub zero_for_firing: bool,
    pub zero_for_firing_again: bool,
    pub small_for_pending: bool,
    pub small_for_firing: bool,
}

#[derive(Debug, Clone)]
struct Scenarios {
    inactive: WindowSet,
    zero_for_firing: WindowSet,
    zero_for_firing_again: WindowSet,
    small_for_pending: WindowSet,
    small_for_firing: WindowSet,
}

/// Sample indices where the activity of the series changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Boundaries {
    /// Both thresholds crossed
    active: usize,
    resolved: usize,
    /// Only the zero-for threshold crossed
    active_again: usize,
    resolved_again: usize,
}

impl Boundaries {
    fn derive(timeline: &SampleTimeline) -> Result<Self, DefinitionError> {
        let zero_for_runs = timeline.runs_where(|v| v > 10.0);
        let small_for_runs = timeline.runs_where(|v| v > 13.0);
        match (zero_for_runs.as_slice(), small_for_runs.as_slice()) {
            ([first, second], [small]) if small == first && second.end < timeline.len() => {
                Ok(Self {
                    active: first.start,
                    resolved: first.end,
                    active_again: second.start,
                    resolved_again: second.end,
                })
            }
            _ => Err(DefinitionError::UnexpectedTimeline(format!(
                "runs above 10: {}, runs above 13: {}",
                describe_runs(&zero_for_runs),
                describe_runs(&small_for_runs)
            ))),
        }
    }
}

fn describe_runs(runs: &[Range<usize>]) -> String {
    let parts: Vec<String> = runs.iter().map(|r| format!("{:?}", r)).collect();
    format!("[{}]", parts.join(", "))
}

/// The `ZeroFor_SmallFor` test case
#[derive(Debug, Clone)]
pub struct ZeroForSmallFor {
    group: RuleGroup,
    zero_for: Rule,
    small_for: Rule,
    zero_for_series: Labels,
    small_for_series: Labels,
    zero_for_annotations: Labels,
    small_for_annotations: Labels,
    timeline: SampleTimeline,
    boundaries: Boundaries,
    scenarios: Scenarios,
    params: TimelineParams,
    zero_time: Option<Timestamp>,
}

impl ZeroForSmallFor {
    /// Build the case with the built-in template renderings
    pub fn new(config: &OracleConfig) -> Result<Self, DefinitionError> {
        Self::with_renderer(config, &builtin_renderer())
    }

    /// Build the case, rendering annotations with `renderer`
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError` if an interval is out of range, a template
    /// cannot be rendered, or the sample shape does not have the activity
    /// runs the windows are derived from.
    pub fn with_renderer(
        config: &OracleConfig,
        renderer: &dyn AnnotationRenderer,
    ) -> Result<Self, DefinitionError> {
        config
            .check_ranges()
            .map_err(|e| DefinitionError::InvalidInterval(e.to_string()))?;
        let sample_interval = config.sample_interval();
        let group_interval = config.group_interval();
        let params = config.timeline_params()?;

        let zero_for_series = metric_labels(ZERO_FOR_ALERT);
        let small_for_series = metric_labels(SMALL_FOR_ALERT);

        let zero_for = Rule::new(ZERO_FOR_ALERT, format!("{} > 10", zero_for_series))
            .with_label("foo", "bar")
            .with_label("rulegroup", GROUP_NAME)
            .with_annotation("description", ZERO_FOR_DESCRIPTION)
            .with_annotation("template_test", ZERO_FOR_TEMPLATE);
        let small_for = Rule::new(SMALL_FOR_ALERT, format!("{} > 13", small_for_series))
            .with_for(group_interval / 2)
            .with_label("ba_dum", "tss")
            .with_label("rulegroup", GROUP_NAME)
            .with_annotation("description", SMALL_FOR_DESCRIPTION)
            .with_annotation("template_test", SMALL_FOR_TEMPLATE);
        let group = RuleGroup::new(
            GROUP_NAME,
            group_interval,
            vec![zero_for.clone(), small_for.clone()],
        )?;

        let zero_for_annotations = zero_for.rendered_annotations(renderer)?;
        let small_for_annotations = small_for.rendered_annotations(renderer)?;

        let timeline = SampleTimeline::parse(sample_interval, SAMPLE_TOKENS)?;
        let boundaries = Boundaries::derive(&timeline)?;
        let scenarios = scenarios(&timeline, &boundaries, group_interval);

        Ok(Self {
            group,
            zero_for,
            small_for,
            zero_for_series,
            small_for_series,
            zero_for_annotations,
            small_for_annotations,
            timeline,
            boundaries,
            scenarios,
            params,
            zero_time: None,
        })
    }

    /// Flags of every outcome valid `elapsed_ms` after zero time
    pub fn possible_states(&self, elapsed_ms: i64) -> ScenarioFlags {
        ScenarioFlags {
            can_be_inactive: self.scenarios.inactive.contains(elapsed_ms),
            zero_for_firing: self.scenarios.zero_for_firing.contains(elapsed_ms),
            zero_for_firing_again: self.scenarios.zero_for_firing_again.contains(elapsed_ms),
            small_for_pending: self.scenarios.small_for_pending.contains(elapsed_ms),
            small_for_firing: self.scenarios.small_for_firing.contains(elapsed_ms),
        }
    }

    fn bound(&self) -> Result<Timestamp, CheckError> {
        self.zero_time.ok_or(CheckError::NotInitialized)
    }

    fn flags_at(&self, ts: Timestamp) -> Result<ScenarioFlags, CheckError> {
        Ok(self.possible_states(elapsed_ms(self.bound()?, ts)))
    }

    fn at_sample(&self, zero_time: Timestamp, index: usize) -> Timestamp {
        zero_time + self.timeline.offset_of(index)
    }

    fn value_at(&self, index: usize) -> String {
        self.timeline
            .value_at(index)
            .map(|v| v.to_string())
            .unwrap_or_default()
    }

    fn zero_for_alert(&self, active_at: Timestamp, value: String) -> ApiAlert {
        ApiAlert {
            labels: self.zero_for.alert_labels(&self.zero_for_series),
            annotations: self.zero_for_annotations.clone(),
            state: AlertState::Firing,
            active_at: Some(active_at),
            value,
        }
    }

    fn small_for_alert(&self, state: AlertState, active_at: Timestamp, value: String) -> ApiAlert {
        ApiAlert {
            labels: self.small_for.alert_labels(&self.small_for_series),
            annotations: self.small_for_annotations.clone(),
            state,
            active_at: Some(active_at),
            value,
        }
    }

    /// Candidates as (zero-for alert, small-for alert) pairs; `None` is inactive
    fn candidates(
        &self,
        ts: Timestamp,
    ) -> Result<Vec<(Option<ApiAlert>, Option<ApiAlert>)>, CheckError> {
        let zero_time = self.bound()?;
        let flags = self.flags_at(ts)?;
        let b = &self.boundaries;
        let active_at = self.at_sample(zero_time, b.active);
        let active_at_again = self.at_sample(zero_time, b.active_again);

        let mut out = Vec::new();
        if flags.can_be_inactive {
            out.push((None, None));
        }
        if flags.zero_for_firing && flags.small_for_pending {
            out.push((
                Some(self.zero_for_alert(active_at, self.value_at(b.active))),
                Some(self.small_for_alert(AlertState::Pending, active_at, self.value_at(b.active))),
            ));
        }
        if flags.zero_for_firing && flags.small_for_firing {
            out.push((
                Some(self.zero_for_alert(active_at, self.value_at(b.active))),
                Some(self.small_for_alert(AlertState::Firing, active_at, self.value_at(b.active))),
            ));
        }
        if flags.zero_for_firing_again {
            out.push((
                Some(self.zero_for_alert(active_at_again, self.value_at(b.active_again))),
                None,
            ));
        }
        Ok(out)
    }

    fn rule_snapshot(rule: &Rule, alert: Option<ApiAlert>) -> RuleSnapshot {
        match alert {
            Some(alert) => rule.snapshot(alert.state, vec![alert]),
            None => rule.snapshot(AlertState::Inactive, vec![]),
        }
    }
}

impl TestCase for ZeroForSmallFor {
    fn name(&self) -> &str {
        &self.group.name
    }

    fn description(&self) -> &str {
        "(1) Alert that goes directly to firing state, skipping pending, because of a zero 'for' duration. \
         (2) With a non-zero 'for' shorter than the evaluation interval, the firing alert is sent after the second evaluation of the rule and not before. \
         (3) Alert that becomes active again after having fired and gone inactive, once its resolved notification is no longer being sent. \
         (4) Alert goes inactive when there is no more data while firing."
    }

    fn rule_group(&self) -> &RuleGroup {
        &self.group
    }

    fn samples(&self) -> Vec<TimeSeries> {
        vec![
            TimeSeries::new(self.zero_for_series.clone(), &self.timeline),
            TimeSeries::new(self.small_for_series.clone(), &self.timeline),
        ]
    }

    fn init(&mut self, zero_time: Timestamp) -> Result<(), DefinitionError> {
        if self.zero_time.is_some() {
            return Err(DefinitionError::AlreadyInitialized);
        }
        info!("Bound zero time of {} to {}", self.group.name, zero_time);
        self.zero_time = Some(zero_time);
        Ok(())
    }

    fn zero_time(&self) -> Option<Timestamp> {
        self.zero_time
    }

    fn test_until(&self) -> Result<Timestamp, CheckError> {
        Ok(self.at_sample(self.bound()?, self.timeline.len() + TAIL_SAMPLES))
    }

    fn expected_alerts(&self, ts: Timestamp) -> Result<Vec<Vec<ApiAlert>>, CheckError> {
        Ok(self
            .candidates(ts)?
            .into_iter()
            .map(|(zf, sf)| zf.into_iter().chain(sf).collect())
            .collect())
    }

    fn expected_rule_groups(&self, ts: Timestamp) -> Result<Vec<RuleGroupSnapshot>, CheckError> {
        let interval = self.group.interval.num_milliseconds() as f64 / 1000.0;
        Ok(self
            .candidates(ts)?
            .into_iter()
            .map(|(zf, sf)| RuleGroupSnapshot {
                name: self.group.name.clone(),
                interval,
                rules: vec![
                    Self::rule_snapshot(&self.zero_for, zf),
                    Self::rule_snapshot(&self.small_for, sf),
                ],
            })
            .collect())
    }

    /// The engine's synthetic `ALERTS` series: one sample of value 1 per
    /// pending or firing alert
    fn expected_samples(&self, ts: Timestamp) -> Result<Vec<Vec<QuerySample>>, CheckError> {
        Ok(self
            .expected_alerts(ts)?
            .into_iter()
            .map(|alerts| {
                alerts
                    .into_iter()
                    .map(|alert| QuerySample {
                        metric: alert.labels.merged(&Labels::from_pairs(&[
                            ("__name__", "ALERTS"),
                            ("alertstate", alert.state.as_str()),
                        ])),
                        timestamp: ts,
                        value: 1.0,
                    })
                    .collect()
            })
            .collect())
    }

    fn expected_notifications(&self) -> Result<Vec<ExpectedNotification>, CheckError> {
        let zero_time = self.bound()?;
        let b = &self.boundaries;
        let offset = |i: usize| self.timeline.offset_of(i);

        let mut generator = TimelineGenerator::new(zero_time, self.params);
        generator.add_alert(
            &self.zero_for.alert_labels(&self.zero_for_series),
            &self.zero_for_annotations,
            &[
                FiringPeriod {
                    fires_at: offset(b.active),
                    resolves_at: offset(b.resolved),
                },
                FiringPeriod {
                    fires_at: offset(b.active_again),
                    resolves_at: offset(b.resolved_again),
                },
            ],
        );
        // The small-for alert is sent from the second qualifying evaluation.
        generator.add_alert(
            &self.small_for.alert_labels(&self.small_for_series),
            &self.small_for_annotations,
            &[FiringPeriod {
                fires_at: offset(b.active) + self.group.interval,
                resolves_at: offset(b.resolved),
            }],
        );
        Ok(generator.finish())
    }
}

fn metric_labels(alert_name: &str) -> Labels {
    Labels::from_pairs(&[
        ("__name__", METRIC_NAME),
        ("alertname", alert_name),
        ("rulegroup", GROUP_NAME),
    ])
}

/// Window bounds, with one second of slack below each activation because
/// evaluation can land on the sample itself
fn scenarios(timeline: &SampleTimeline, b: &Boundaries, group_interval: Duration) -> Scenarios {
    let at = |i: usize| timeline.offset_of(i);
    let gi = group_interval;
    let slack = Duration::seconds(1);

    Scenarios {
        inactive: WindowSet::new()
            .with(Duration::zero(), at(b.active) + gi)
            .with(at(b.resolved) - slack, at(b.active_again) + gi)
            .with(
                at(b.resolved_again),
                timeline.interval() * INACTIVE_HORIZON_SAMPLES,
            ),
        zero_for_firing: WindowSet::new().with(at(b.active) - slack, at(b.resolved) + gi),
        zero_for_firing_again: WindowSet::new()
            .with(at(b.active_again) - slack, at(b.resolved_again) + gi),
        small_for_pending: WindowSet::new().with(at(b.active) - slack, at(b.active) + gi * 2),
        small_for_firing: WindowSet::new().with(at(b.active) + gi, at(b.resolved) + gi),
    }
}
