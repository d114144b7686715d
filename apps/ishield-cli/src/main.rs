//! # ishield-cli
//!
//! Command-line interface for IntegrityShield.
//!
//! - `ishield evaluate` — decide an admission request against a constraint
//! - `ishield diff` — masked structural diff of two manifests
//! - `ishield aggregate` — fold logged denials into exemption records
//! - `ishield exemptions list/show` — inspect stored exemption records

mod commands;
mod settings;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use ishield_policy::{LogConfig, RequestHandlerConfig};
use tracing_subscriber::EnvFilter;

use crate::settings::ShieldSettings;

/// IntegrityShield CLI — admission decisions for signed Kubernetes manifests.
#[derive(Parser)]
#[command(name = "ishield", version, about)]
struct Cli {
    /// Settings file (TOML).
    #[arg(long, env = "ISHIELD_SETTINGS", default_value = "ishield.toml")]
    settings: PathBuf,

    /// Log level; overrides the request handler config.
    #[arg(long, env = "ISHIELD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (`text` or `json`); overrides the request handler config.
    #[arg(long, env = "ISHIELD_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide an admission request.
    Evaluate(commands::evaluate::EvaluateArgs),
    /// Show the structural diff between two manifests.
    Diff(commands::diff::DiffArgs),
    /// Aggregate denials from the event log into exemption records.
    Aggregate(commands::aggregate::AggregateArgs),
    /// Inspect exemption records.
    Exemptions {
        #[command(subcommand)]
        command: commands::exemptions::ExemptionsCommands,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = ShieldSettings::load_or_default(&cli.settings)?;

    let mut log = log_config(&settings.request_handler_config);
    if let Some(level) = &cli.log_level {
        log.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        log.format = format.clone();
    }
    init_tracing(&log);

    match &cli.command {
        Commands::Evaluate(args) => commands::evaluate::execute(args, &settings),
        Commands::Diff(args) => commands::diff::execute(args),
        Commands::Aggregate(args) => commands::aggregate::execute(args, &settings),
        Commands::Exemptions { command } => commands::exemptions::execute(command, &settings),
    }
}

// Logging is configured before anything else can log, so config errors here
// fall back to defaults silently; `evaluate` reloads and reports them.
fn log_config(path: &Path) -> LogConfig {
    if !path.exists() {
        return LogConfig::default();
    }
    RequestHandlerConfig::load(path)
        .map(|c| c.log)
        .unwrap_or_default()
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if log.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
