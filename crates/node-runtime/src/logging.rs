//! Tracing subscriber setup.

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG` if set, otherwise `default_filter`.
///
/// `default_filter` is the configured `log_level`, which already carries
/// the `QC_LOG_LEVEL` override.
pub fn build_filter(default_filter: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_filter)
            .with_context(|| format!("Invalid log level: {default_filter}")),
    }
}

/// Installs the global subscriber. Logs go to stderr so they do not mix
/// with console output on stdout.
pub fn init(default_filter: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(default_filter)?)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))
}
