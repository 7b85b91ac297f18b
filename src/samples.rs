//! Sample timeline builder
//!
//! Expands a compact, run-length description of a metric's values into a
//! series of samples spaced one sample interval apart. A token is either a
//! literal value (`"15"`) or `DxN`: N further samples, each the previous one
//! plus D. `"0x12"` therefore repeats the previous value twelve times.

use crate::error::DefinitionError;
use crate::model::Labels;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A single sample, timestamped relative to the test's zero time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SamplePoint {
    /// Offset from zero time in milliseconds
    pub timestamp_ms: i64,
    pub value: f64,
}

/// Fixed-cadence sequence of sample values
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTimeline {
    interval: Duration,
    values: Vec<f64>,
}

impl SampleTimeline {
    /// Expand `tokens` into a timeline with samples every `interval`
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError` for a non-positive interval, a token that
    /// is neither a number nor `DxN`, or a `DxN` token with nothing before it.
    pub fn parse(interval: Duration, tokens: &[&str]) -> Result<Self, DefinitionError> {
        if interval <= Duration::zero() {
            return Err(DefinitionError::InvalidInterval(format!(
                "sample interval must be positive, got {}ms",
                interval.num_milliseconds()
            )));
        }

        let mut values: Vec<f64> = Vec::new();
        for token in tokens {
            let token = token.trim();
            match token.split_once('x') {
                Some((delta, count)) => {
                    let delta: f64 = delta
                        .parse()
                        .map_err(|_| DefinitionError::InvalidSampleToken(token.to_string()))?;
                    let count: usize = count
                        .parse()
                        .map_err(|_| DefinitionError::InvalidSampleToken(token.to_string()))?;
                    if count == 0 {
                        return Err(DefinitionError::InvalidSampleToken(token.to_string()));
                    }
                    let mut last = *values
                        .last()
                        .ok_or_else(|| DefinitionError::RepeatWithoutValue(token.to_string()))?;
                    for _ in 0..count {
                        last += delta;
                        values.push(last);
                    }
                }
                None => {
                    let value: f64 = token
                        .parse()
                        .map_err(|_| DefinitionError::InvalidSampleToken(token.to_string()))?;
                    values.push(value);
                }
            }
        }

        Ok(Self { interval, values })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value_at(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    /// Offset of the `index`-th sample from zero time
    pub fn offset_of(&self, index: usize) -> Duration {
        self.interval * index as i32
    }

    /// All samples with their offsets; sample N sits at N × interval
    pub fn points(&self) -> Vec<SamplePoint> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, &value)| SamplePoint {
                timestamp_ms: self.offset_of(i).num_milliseconds(),
                value,
            })
            .collect()
    }

    /// Maximal runs of sample indices on which `holds` is true
    pub fn runs_where(&self, holds: impl Fn(f64) -> bool) -> Vec<Range<usize>> {
        let mut runs = Vec::new();
        let mut start = None;
        for (i, &v) in self.values.iter().enumerate() {
            match (holds(v), start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    runs.push(s..i);
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push(s..self.values.len());
        }
        runs
    }
}

/// A labelled series ready to be pushed to the engine's ingestion interface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSeries {
    pub labels: Labels,
    pub samples: Vec<SamplePoint>,
}

impl TimeSeries {
    pub fn new(labels: Labels, timeline: &SampleTimeline) -> Self {
        Self {
            labels,
            samples: timeline.points(),
        }
    }
}
