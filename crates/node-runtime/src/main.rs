//! # Node Runtime
//!
//! Starts the debug console with its terminal session and, when enabled,
//! the `/console` socket endpoint.
//!
//! ## Startup Sequence
//!
//! 1. Parse flags
//! 2. Load configuration (file, then `QC_*` env, then flags)
//! 3. Install logging
//! 4. Run until Ctrl-C, `exit` or the watched process exiting

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use node_runtime::{load_config, logging, Args, NodeRuntime, RuntimeOptions};

/// A pending stdin read cannot be cancelled, so the runtime is not waited
/// on for longer than this.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args).context("Failed to load configuration")?;
    logging::init(&config.log_level)?;

    let options = RuntimeOptions {
        terminal: !args.no_terminal,
        watch_pid: args.watchpid,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let result = runtime.block_on(NodeRuntime::new(config, options).run());
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    let reason = result?;
    info!(?reason, "Node runtime stopped");
    Ok(())
}
