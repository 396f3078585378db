//! # Node Runtime Library
//!
//! Process bootstrap for the debug console. The binary in `main.rs` only
//! parses flags, installs logging and hands over to [`NodeRuntime`].
//!
//! - `cli` - process flags
//! - `config` - layered configuration loading
//! - `logging` - tracing subscriber setup
//! - `pid_watch` - shutdown when a watched process exits
//! - `runtime` - the console, its front ends and graceful shutdown

#![warn(clippy::all)]

pub mod cli;
pub mod config;
pub mod logging;
pub mod pid_watch;
pub mod runtime;

pub use cli::Args;
pub use config::load_config;
pub use runtime::{NodeRuntime, RuntimeOptions, StopReason};
