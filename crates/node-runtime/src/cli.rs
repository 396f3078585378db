//! Process flags.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "node-runtime")]
#[command(about = "Debug console for a peer-to-peer node")]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serve the /console socket on this address
    #[arg(long, value_name = "ADDR")]
    pub webapi: Option<SocketAddr>,

    /// Api key required by the socket endpoint
    #[arg(long, value_name = "KEY")]
    pub apikey: Option<String>,

    /// Shut down once this process exits
    #[arg(long, value_name = "PID")]
    pub watchpid: Option<u32>,

    /// Do not read commands from stdin
    #[arg(long)]
    pub no_terminal: bool,
}
