use alert_oracle::cases::{CaseRegistry, TestCase};
use alert_oracle::config::OracleConfig;
use alert_oracle::error::ConfigError;
use alert_oracle::model::{ApiAlert, QuerySample, ReceivedNotification, RuleGroupSnapshot, Timestamp};
use alert_oracle::notify::{MatchOutcome, NotificationMatcher};
use anyhow::{bail, Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Command-line arguments for the alert oracle
#[derive(Parser)]
#[command(
    name = "alert-oracle",
    about = "Conformance oracle for alert-evaluation engines",
    long_about = "Computes the alert states, rule-group snapshots, ALERTS samples and \
                  notifications an alert-evaluation engine is expected to produce for \
                  built-in test cases, and checks recorded engine output against them."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the registered test cases
    List,
    /// Print every case's rule group as one rule file
    RuleGroups,
    /// Print the series to inject for a case
    Samples {
        #[arg(long)]
        case: String,
    },
    /// Print the expected notification timeline of a case
    Timeline {
        #[arg(long)]
        case: String,
        /// Zero time of the run (RFC 3339)
        #[arg(long)]
        zero_time: Timestamp,
    },
    /// Print the valid alert, rule-group and sample sets at one instant
    Expect {
        #[arg(long)]
        case: String,
        #[arg(long)]
        zero_time: Timestamp,
        /// Seconds elapsed since zero time
        #[arg(long, value_name = "SECONDS")]
        at: f64,
    },
    /// Check a recorded notification stream (JSON array) against a case
    VerifyNotifications {
        #[arg(long)]
        case: String,
        #[arg(long)]
        zero_time: Timestamp,
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
    },
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // A missing file falls back to defaults in load_config.
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }
                if config_path.extension().map_or(true, |ext| ext != "toml") {
                    warn!(
                        "Configuration file does not have .toml extension: {}",
                        config_path.display()
                    );
                }
            }
        }

        match &self.command {
            Command::Expect { at, .. } if !at.is_finite() || *at < 0.0 => {
                Err(format!("--at must be a non-negative number of seconds, got {}", at))
            }
            Command::VerifyNotifications { input, .. } if !input.is_file() => {
                Err(format!("Input is not a readable file: {}", input.display()))
            }
            _ => Ok(()),
        }
    }
}

/// Load the configuration, falling back to defaults when no file is given or
/// the file does not exist
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but is invalid.
fn load_config(config_path: Option<&Path>) -> Result<OracleConfig, ConfigError> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match OracleConfig::from_file(path) {
                Ok(config) => Ok(config),
                Err(ConfigError::ReadError(e)) => {
                    warn!("Configuration file not readable ({}), using defaults", e);
                    Ok(OracleConfig::default())
                }
                Err(e) => Err(e),
            }
        }
        None => {
            info!("Using default configuration");
            Ok(OracleConfig::default())
        }
    }
}

/// Everything valid at one instant of a case
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Expectation {
    at: Timestamp,
    alerts: Vec<Vec<ApiAlert>>,
    rule_groups: Vec<RuleGroupSnapshot>,
    samples: Vec<Vec<QuerySample>>,
}

fn expect_at(case: &dyn TestCase, at: Timestamp) -> Result<Expectation> {
    Ok(Expectation {
        at,
        alerts: case.expected_alerts(at)?,
        rule_groups: case.expected_rule_groups(at)?,
        samples: case.expected_samples(at)?,
    })
}

/// The instant `seconds` after `zero_time`, to the millisecond
fn instant_after(zero_time: Timestamp, seconds: f64) -> Result<Timestamp> {
    let offset = Duration::milliseconds((seconds * 1000.0).round() as i64);
    zero_time
        .checked_add_signed(offset)
        .with_context(|| format!("--at {} is past the last representable instant", seconds))
}

/// Outcome of a successful notification verification
#[derive(Debug, Default, PartialEq, Eq)]
struct VerifySummary {
    matched: usize,
    duplicates: usize,
    /// Resends the engine left out because the alert had changed state
    skipped: usize,
    remaining: usize,
}

/// Run a recorded stream through the matcher, in order of receipt
///
/// Events still pending whose window closed before the last received
/// notification are reported as missed.
fn verify_notifications(
    case: &dyn TestCase,
    mut received: Vec<ReceivedNotification>,
) -> Result<VerifySummary> {
    received.sort_by_key(|n| n.received_at);
    let mut matcher = NotificationMatcher::new(case.expected_notifications()?);
    let mut summary = VerifySummary::default();

    for (i, n) in received.iter().enumerate() {
        match matcher
            .observe(n)
            .with_context(|| format!("notification {} of {}", i + 1, received.len()))?
        {
            MatchOutcome::Matched(_) => summary.matched += 1,
            MatchOutcome::Duplicate => summary.duplicates += 1,
        }
    }
    if let Some(last) = received.last() {
        matcher.finish(last.received_at)?;
    }
    summary.skipped = matcher.skipped();
    summary.remaining = matcher.remaining();
    Ok(summary)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn bound_case<'a>(
    registry: &'a mut CaseRegistry,
    name: &str,
    zero_time: Timestamp,
) -> Result<&'a dyn TestCase> {
    let case = registry
        .find_mut(name)
        .with_context(|| format!("Unknown test case '{}'", name))?;
    case.init(zero_time)?;
    Ok(&**case)
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    let mut registry =
        CaseRegistry::with_builtin_cases(&config).context("Failed to build test cases")?;

    match &cli.command {
        Command::List => {
            for case in registry.iter() {
                println!("{}\t{}", case.name(), case.description());
            }
        }
        Command::RuleGroups => print_json(&registry.rule_file())?,
        Command::Samples { case } => {
            let case = registry
                .find(case)
                .with_context(|| format!("Unknown test case '{}'", case))?;
            print_json(&case.samples())?;
        }
        Command::Timeline { case, zero_time } => {
            let case = bound_case(&mut registry, case, *zero_time)?;
            print_json(&case.expected_notifications()?)?;
        }
        Command::Expect {
            case,
            zero_time,
            at,
        } => {
            let case = bound_case(&mut registry, case, *zero_time)?;
            let at = instant_after(*zero_time, *at)?;
            print_json(&expect_at(case, at)?)?;
        }
        Command::VerifyNotifications {
            case,
            zero_time,
            input,
        } => {
            let content = std::fs::read_to_string(input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let received: Vec<ReceivedNotification> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse notifications in {}", input.display()))?;
            let case = bound_case(&mut registry, case, *zero_time)?;
            let summary = verify_notifications(case, received)?;
            if summary.matched == 0 {
                bail!("No notification matched");
            }
            info!(
                "Verified {} notifications ({} duplicates, {} skipped resends, {} still pending)",
                summary.matched, summary.duplicates, summary.skipped, summary.remaining
            );
            println!(
                "ok: {} matched, {} duplicates, {} skipped, {} pending",
                summary.matched, summary.duplicates, summary.skipped, summary.remaining
            );
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(&cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
