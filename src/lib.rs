//! Conformance oracle for alert-evaluation engines
//!
//! Given a rule group and the samples injected into an engine, the oracle
//! computes what the engine must report at any instant (active alerts, rule
//! group state, the synthetic `ALERTS` series) and which notifications it must
//! send, then checks observed output against those expectations within
//! evaluation-jitter tolerances.

/// Error types for case definitions, checks and configuration
pub mod error;

/// Shapes observed from the engine under test
pub mod model;

/// Sample timeline builder
pub mod samples;

/// Rule group descriptors and annotation rendering
pub mod rules;

/// Scenario windows and the candidate comparator
pub mod oracle;

/// Expected notification timeline and the stream matcher
pub mod notify;

/// Test cases and the case registry
pub mod cases;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use cases::{CaseRegistry, TestCase};
pub use config::OracleConfig;
pub use error::{CheckError, ConfigError, DefinitionError};
