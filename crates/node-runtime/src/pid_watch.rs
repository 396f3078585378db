//! Parent process watch.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How often the watched process is checked.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Resolves once process `pid` has exited. Returns false if `cancel`
/// fired first or the platform cannot observe other processes.
pub async fn wait_for_exit(pid: u32, interval: Duration, cancel: CancellationToken) -> bool {
    if !supported() {
        warn!(pid, "Process watch is only supported on Linux; ignoring --watchpid");
        cancel.cancelled().await;
        return false;
    }

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = ticker.tick() => {
                if !is_running(pid) {
                    info!(pid, "Watched process exited");
                    return true;
                }
            }
        }
    }
}

fn supported() -> bool {
    cfg!(target_os = "linux")
}

fn is_running(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}
