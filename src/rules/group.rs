//! Declarative rule groups handed to the engine under test
//!
//! Serialization follows the engine's rule-file schema exactly
//! (`name`/`interval`/`rules`, and `alert`/`expr`/`for`/`labels`/`annotations`
//! per rule), so the JSON produced here can be loaded as a rule file.

use crate::error::DefinitionError;
use crate::model::{AlertState, ApiAlert, Labels, RuleSnapshot};
use crate::rules::AnnotationRenderer;
use chrono::Duration;
use serde::{Serialize, Serializer};

/// One alerting rule
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Rule {
    #[serde(rename = "alert")]
    pub name: String,
    /// Selector expression, passed through to the engine uninterpreted
    pub expr: String,
    #[serde(
        rename = "for",
        serialize_with = "serialize_duration",
        skip_serializing_if = "is_zero"
    )]
    pub for_duration: Duration,
    pub labels: Labels,
    /// Annotation templates as declared
    pub annotations: Labels,
}

impl Rule {
    pub fn new(name: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expr: expr.into(),
            for_duration: Duration::zero(),
            labels: Labels::new(),
            annotations: Labels::new(),
        }
    }

    pub fn with_for(mut self, for_duration: Duration) -> Self {
        self.for_duration = for_duration;
        self
    }

    pub fn with_label(mut self, name: &str, value: &str) -> Self {
        self.labels.insert(name, value);
        self
    }

    pub fn with_annotation(mut self, name: &str, template: &str) -> Self {
        self.annotations.insert(name, template);
        self
    }

    /// Labels every alert of this rule carries: the series labels that
    /// survive the comparison, overlaid with the rule labels and the name
    pub fn alert_labels(&self, series: &Labels) -> Labels {
        series
            .without("__name__")
            .merged(&self.labels)
            .merged(&Labels::from_pairs(&[("alertname", self.name.as_str())]))
    }

    /// Annotations with every template replaced by its rendered output
    pub fn rendered_annotations(
        &self,
        renderer: &dyn AnnotationRenderer,
    ) -> Result<Labels, DefinitionError> {
        let mut out = Labels::new();
        for (name, template) in self.annotations.iter() {
            out.insert(name.clone(), renderer.render(template)?);
        }
        Ok(out)
    }

    /// The engine's view of this rule in the given state
    pub fn snapshot(&self, state: AlertState, alerts: Vec<ApiAlert>) -> RuleSnapshot {
        RuleSnapshot {
            state,
            name: self.name.clone(),
            query: self.expr.clone(),
            duration: self.for_duration.num_milliseconds() as f64 / 1000.0,
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
            alerts,
            health: "ok".to_string(),
            rule_type: "alerting".to_string(),
        }
    }
}

/// An ordered group of rules evaluated together every `interval`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RuleGroup {
    pub name: String,
    #[serde(serialize_with = "serialize_duration")]
    pub interval: Duration,
    pub rules: Vec<Rule>,
}

impl RuleGroup {
    /// # Errors
    ///
    /// Returns `DefinitionError::InvalidInterval` unless `interval` is positive.
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        rules: Vec<Rule>,
    ) -> Result<Self, DefinitionError> {
        if interval <= Duration::zero() {
            return Err(DefinitionError::InvalidInterval(format!(
                "evaluation interval must be positive, got {}ms",
                interval.num_milliseconds()
            )));
        }
        Ok(Self {
            name: name.into(),
            interval,
            rules,
        })
    }
}

/// A rule file: the document the engine's rule loader accepts
#[derive(Debug, Clone, Serialize)]
pub struct RuleFile<'a> {
    pub groups: Vec<&'a RuleGroup>,
}

/// Format a duration the way the engine writes durations (`1m30s`, `10s`, `0s`)
pub fn format_duration(d: Duration) -> String {
    let mut ms = d.num_milliseconds();
    if ms == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    if ms < 0 {
        out.push('-');
        ms = -ms;
    }
    for (unit, size) in [
        ("d", 86_400_000),
        ("h", 3_600_000),
        ("m", 60_000),
        ("s", 1_000),
        ("ms", 1),
    ] {
        if ms >= size {
            out.push_str(&format!("{}{}", ms / size, unit));
            ms %= size;
        }
    }
    out
}

fn serialize_duration<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_duration(*d))
}

fn is_zero(d: &Duration) -> bool {
    *d == Duration::zero()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::render::FixtureRenderer;

    fn sample_rule() -> Rule {
        Rule::new("HighValue", r#"{__name__="m"} > 10"#)
            .with_for(Duration::seconds(5))
            .with_label("severity", "page")
            .with_annotation("summary", "value is high")
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::zero()), "0s");
        assert_eq!(format_duration(Duration::seconds(10)), "10s");
        assert_eq!(format_duration(Duration::seconds(90)), "1m30s");
        assert_eq!(format_duration(Duration::milliseconds(1500)), "1s500ms");
        assert_eq!(format_duration(Duration::minutes(15)), "15m");
    }

    #[test]
    fn test_rule_group_serializes_in_rule_file_schema() {
        let group = RuleGroup::new(
            "g",
            Duration::seconds(10),
            vec![sample_rule(), Rule::new("Zero", "m > 1")],
        )
        .unwrap();

        let json = serde_json::to_value(RuleFile {
            groups: vec![&group],
        })
        .unwrap();
        let rules = &json["groups"][0]["rules"];
        assert_eq!(json["groups"][0]["interval"], "10s");
        assert_eq!(rules[0]["alert"], "HighValue");
        assert_eq!(rules[0]["for"], "5s");
        assert_eq!(rules[0]["labels"]["severity"], "page");
        // A zero `for` is omitted entirely.
        assert!(rules[1].get("for").is_none());
    }

    #[test]
    fn test_rule_group_rejects_zero_interval() {
        assert!(matches!(
            RuleGroup::new("g", Duration::zero(), vec![]),
            Err(DefinitionError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_alert_labels_drop_metric_name() {
        let rule = sample_rule();
        let series = Labels::from_pairs(&[("__name__", "m"), ("alertname", "series"), ("job", "x")]);

        let labels = rule.alert_labels(&series);
        assert_eq!(labels.get("__name__"), None);
        assert_eq!(labels.get("alertname"), Some("HighValue"));
        assert_eq!(labels.get("job"), Some("x"));
        assert_eq!(labels.get("severity"), Some("page"));
    }

    #[test]
    fn test_snapshot_mirrors_descriptor() {
        let snapshot = sample_rule().snapshot(AlertState::Pending, vec![]);
        assert_eq!(snapshot.duration, 5.0);
        assert_eq!(snapshot.health, "ok");
        assert_eq!(snapshot.rule_type, "alerting");
        assert_eq!(snapshot.annotations.get("summary"), Some("value is high"));
    }

    #[test]
    fn test_rendered_annotations_pass_plain_text_through() {
        let rendered = sample_rule()
            .rendered_annotations(&FixtureRenderer::new())
            .unwrap();
        assert_eq!(rendered.get("summary"), Some("value is high"));
    }
}
