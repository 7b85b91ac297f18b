use thiserror::Error;

/// Errors in a test-case definition, detected while the case is being built
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("Invalid sample token '{0}'")]
    InvalidSampleToken(String),

    #[error("Repeat token '{0}' has no preceding sample to repeat")]
    RepeatWithoutValue(String),

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("No known rendering for annotation template: {0}")]
    UnrenderedTemplate(String),

    #[error("Zero time is already bound")]
    AlreadyInitialized,

    #[error("Sample timeline does not produce the expected activity: {0}")]
    UnexpectedTimeline(String),
}

/// Assertion failures raised while checking observations against expectations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckError {
    #[error("Zero time has not been bound yet")]
    NotInitialized,

    #[error("Observed {what} match none of the candidates; actual: {actual}, candidates: {candidates}")]
    NoMatchingCandidate {
        what: &'static str,
        actual: String,
        candidates: String,
    },

    #[error("No rule group found")]
    MissingRuleGroup,

    #[error("Unexpected notification for {identity} received at {received_at}")]
    UnexpectedNotification {
        identity: String,
        received_at: String,
    },

    #[error("Notification #{ordering_id} for {identity} received at {received_at}, expected {expected_at} ± {tolerance_ms}ms")]
    OutsideTolerance {
        identity: String,
        ordering_id: usize,
        expected_at: String,
        received_at: String,
        tolerance_ms: i64,
    },

    #[error("Notification #{ordering_id} for {identity} does not match: {reason}")]
    NotificationMismatch {
        identity: String,
        ordering_id: usize,
        reason: String,
    },

    #[error("Notification #{ordering_id} for {identity} arrived before #{pending_id} for {pending_identity}")]
    OutOfOrder {
        identity: String,
        ordering_id: usize,
        pending_identity: String,
        pending_id: usize,
    },

    #[error("{count} expected notifications were never received, first: #{first_id} for {first_identity}")]
    MissedNotifications {
        count: usize,
        first_id: usize,
        first_identity: String,
    },
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
