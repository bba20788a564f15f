//! Utils

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human readable single lines
    #[default]
    Compact,

    /// One JSON object per event
    Json,
}

/// Arguments for the scenario runner
#[derive(Debug, Parser)]
#[command(name = "platter", about = "Price and check out a cart scenario", long_about = None)]
pub struct ScenarioArgs {
    /// Scenario to run, from `fixtures/scenarios/<name>.yml`
    #[arg(short, long, default_value = "two-vendors")]
    pub scenario: String,

    /// Fixture directory
    #[arg(short, long, default_value = "./fixtures")]
    pub fixtures: PathBuf,

    /// Engine config file; defaults apply when omitted
    #[arg(short, long, env = "PLATTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "RUST_LOG", default_value = "warn")]
    pub log_level: String,

    /// Log format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` directives win over `log_level` when both are set.
pub fn init_tracing(log_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}
