use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use warden_core::LogLevel;

mod commands;
mod manifest;

use commands::check_config::{execute_check_config, CheckConfigArgs};
use commands::simulate::{execute_simulate, SimulateArgs};

/// Warden command line interface
///
/// Simulates tenants on an in-memory host and reports what they leave
/// behind on the shared global.
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Log level for diagnostics written to stderr
    #[clap(long, global = true, default_value = "warn")]
    log_level: LogLevel,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount and unmount the tenants of a manifest and report leaks
    Simulate(SimulateArgs),

    /// Validate a framework configuration file
    #[clap(name = "check-config")]
    CheckConfig(CheckConfigArgs),
}

fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).without_time())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let result = match &cli.command {
        Commands::Simulate(args) => execute_simulate(args).await,
        Commands::CheckConfig(args) => execute_check_config(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
