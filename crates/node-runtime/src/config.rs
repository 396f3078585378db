//! # Configuration Loading
//!
//! Layers, later ones winning:
//!
//! 1. [`ConsoleConfig::default`]
//! 2. the TOML file given by `--config`
//! 3. `QC_CONSOLE_LISTEN`, `QC_CONSOLE_API_KEY`, `QC_LOG_LEVEL`
//! 4. command line flags

use crate::cli::Args;
use anyhow::{Context, Result};
use qc_18_debug_console::ConsoleConfig;
use std::net::SocketAddr;
use std::path::Path;

pub const ENV_LISTEN: &str = "QC_CONSOLE_LISTEN";
pub const ENV_API_KEY: &str = "QC_CONSOLE_API_KEY";
pub const ENV_LOG_LEVEL: &str = "QC_LOG_LEVEL";

/// Builds the validated configuration from all layers.
pub fn load_config(args: &Args) -> Result<ConsoleConfig> {
    let mut config = match &args.config {
        Some(path) => read_config_file(path)?,
        None => ConsoleConfig::default(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    apply_args(&mut config, args);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

pub fn read_config_file(path: &Path) -> Result<ConsoleConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Applies the `QC_*` variables returned by `lookup`.
pub fn apply_env_overrides<F>(config: &mut ConsoleConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(listen) = lookup(ENV_LISTEN) {
        config.socket.listen = listen
            .parse::<SocketAddr>()
            .with_context(|| format!("{ENV_LISTEN} is not a socket address: {listen}"))?;
        config.socket.enabled = true;
    }
    if let Some(key) = lookup(ENV_API_KEY) {
        config.socket.api_key = Some(key);
    }
    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        config.log_level = level;
    }
    Ok(())
}

pub fn apply_args(config: &mut ConsoleConfig, args: &Args) {
    if let Some(addr) = args.webapi {
        config.socket.listen = addr;
        config.socket.enabled = true;
    }
    if let Some(key) = &args.apikey {
        config.socket.api_key = Some(key.clone());
    }
}
