//! Configuration checking
//!
//! Validates a framework configuration file and prints the configuration
//! the orchestrator would actually run with on a given host.

use std::path::Path;

use anyhow::{bail, Context};
use clap::Args;
use serde_json::json;
use warden_isolation::HostCapabilities;
use warden_runtime::FrameworkConfig;

/// Arguments for the check-config command
#[derive(Args)]
pub struct CheckConfigArgs {
    /// Path to the configuration file
    #[clap(long)]
    pub config: String,

    /// Assume a host without property interception
    #[clap(long)]
    pub no_interception: bool,

    /// Assume a host without destructuring assignment
    #[clap(long)]
    pub no_destructuring: bool,
}

/// Implementation of the check-config command
pub async fn execute_check_config(args: &CheckConfigArgs) -> anyhow::Result<()> {
    if !Path::new(&args.config).exists() {
        bail!("Configuration file not found: {}", args.config);
    }

    let config = FrameworkConfig::load(Some(&args.config))
        .await
        .with_context(|| format!("invalid configuration {}", args.config))?;

    let capabilities = HostCapabilities {
        interception: !args.no_interception,
        destructuring: !args.no_destructuring,
        ..HostCapabilities::default()
    };
    let effective = config.downgrade_for_host(capabilities);

    let report = json!({
        "valid": true,
        "configured": serde_json::to_value(&config)?,
        "effective": serde_json::to_value(&effective)?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
