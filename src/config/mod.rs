/// Oracle configuration loaded from TOML
#[allow(clippy::module_inception)]
pub mod config;

pub use config::OracleConfig;
