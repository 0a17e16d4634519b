//! # Dispatch Configuration Validator
//!
//! Loads the layered configuration for one environment, validates it, and
//! prints the effective values with credentials masked. Exits non-zero when
//! loading or validation fails.
//!
//! ```bash
//! config-validator [environment] [config-dir]
//! ```

use anyhow::Context;
use dispatch_core::config::ConfigManager;
use dispatch_core::logging::init_tracing;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

fn main() {
    init_tracing();

    match run() {
        Ok(()) => {
            info!("Configuration validation completed successfully");
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn run() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let environment = args
        .next()
        .unwrap_or_else(ConfigManager::detect_environment);
    let config_dir = args.next().map(PathBuf::from);

    println!("🔧 Validating dispatch configuration");
    println!("Environment: {environment}");

    let manager = ConfigManager::load_from_directory_with_env(config_dir, &environment)
        .with_context(|| format!("loading configuration for environment '{environment}'"))?;

    println!("Config Directory: {}", manager.config_directory().display());
    println!(
        "{}",
        serde_json::to_string_pretty(&manager.debug_config())
            .context("rendering effective configuration")?
    );
    println!("✅ Configuration is valid");
    Ok(())
}
