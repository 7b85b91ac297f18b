use crate::error::{ConfigError, DefinitionError};
use crate::notify::TimelineParams;
use chrono::Duration;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound for every configured interval: one week
pub const MAX_INTERVAL_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Timing parameters the built-in cases are constructed with
///
/// Every field has a default, so an empty TOML document is a valid
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OracleConfig {
    /// Spacing of injected samples
    #[serde(default = "default_sample_interval")]
    pub sample_interval_seconds: u64,
    /// Evaluation interval of every rule group
    #[serde(default = "default_group_interval")]
    pub group_interval_seconds: u64,
    /// How often the engine resends an unchanged alert
    #[serde(default = "default_resend_delay")]
    pub resend_delay_seconds: u64,
    /// How long resolved alerts keep being resent
    #[serde(default = "default_resolved_retention")]
    pub resolved_retention_seconds: u64,
}

fn default_sample_interval() -> u64 {
    5
}

fn default_group_interval() -> u64 {
    10
}

fn default_resend_delay() -> u64 {
    60
}

fn default_resolved_retention() -> u64 {
    15 * 60
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            sample_interval_seconds: default_sample_interval(),
            group_interval_seconds: default_group_interval(),
            resend_delay_seconds: default_resend_delay(),
            resolved_retention_seconds: default_resolved_retention(),
        }
    }
}

impl OracleConfig {
    /// Load and validate a configuration file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read, and the
    /// errors of [`OracleConfig::from_toml_str`] otherwise.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::TomlError` for malformed TOML and
    /// `ConfigError::ValidationError` for out-of-range values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges; warn about interval ratios the built-in cases were
    /// not written for
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check_ranges()?;

        if self.group_interval_seconds != 2 * self.sample_interval_seconds {
            warn!(
                "group_interval_seconds ({}) is not twice sample_interval_seconds ({}); \
                 scenario windows assume two samples per evaluation",
                self.group_interval_seconds, self.sample_interval_seconds
            );
        }
        Ok(())
    }

    /// Every interval must be positive and at most [`MAX_INTERVAL_SECONDS`]
    pub fn check_ranges(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("sample_interval_seconds", self.sample_interval_seconds),
            ("group_interval_seconds", self.group_interval_seconds),
            ("resend_delay_seconds", self.resend_delay_seconds),
            ("resolved_retention_seconds", self.resolved_retention_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
            if value > MAX_INTERVAL_SECONDS {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be at most {}, got {}",
                    name, MAX_INTERVAL_SECONDS, value
                )));
            }
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::seconds(self.sample_interval_seconds as i64)
    }

    pub fn group_interval(&self) -> Duration {
        Duration::seconds(self.group_interval_seconds as i64)
    }

    pub fn resend_delay(&self) -> Duration {
        Duration::seconds(self.resend_delay_seconds as i64)
    }

    pub fn resolved_retention(&self) -> Duration {
        Duration::seconds(self.resolved_retention_seconds as i64)
    }

    /// Timeline parameters for cases built from this configuration
    pub fn timeline_params(&self) -> Result<TimelineParams, DefinitionError> {
        TimelineParams::new(
            self.group_interval(),
            self.resend_delay(),
            self.resolved_retention(),
        )
    }
}
