//! # Node Runtime
//!
//! Hosts one [`DebugConsole`] and the front ends attached to it.
//!
//! ## Startup Sequence
//!
//! 1. Build the backend and the console
//! 2. Bind the socket endpoint (if enabled)
//! 3. Start the terminal session (unless disabled)
//! 4. Start the parent PID watch (if requested)
//!
//! ## Shutdown
//!
//! Ctrl-C, the `exit` command or the watched process exiting all lead to
//! [`DebugConsole::shutdown`], which cancels every session and stops the
//! socket server.

use anyhow::{Context, Result};
use qc_18_debug_console::{
    ConsoleConfig, ConsoleServer, DebugConsole, InMemoryBackend, KeyPair, NetworkBackend,
    OutputSink, SessionEnd, TerminalConsole,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::pid_watch;

/// How long shutdown waits for the front ends to stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Runtime switches that are not part of the console configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Run a session on the process stdin.
    pub terminal: bool,
    /// Shut down once this process exits.
    pub watch_pid: Option<u32>,
}

/// Why the runtime stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    CtrlC,
    ExitCommand,
    WatchedProcessExited,
    TerminalClosed,
}

pub struct NodeRuntime {
    console: Arc<DebugConsole>,
    options: RuntimeOptions,
}

impl NodeRuntime {
    /// Creates the runtime around an in-memory backend with a fresh key
    /// pair.
    pub fn new(config: ConsoleConfig, options: RuntimeOptions) -> Self {
        let backend = Arc::new(InMemoryBackend::new(KeyPair::generate()));
        Self::with_backend(backend, config, options)
    }

    pub fn with_backend(
        backend: Arc<dyn NetworkBackend>,
        config: ConsoleConfig,
        options: RuntimeOptions,
    ) -> Self {
        let console = Arc::new(DebugConsole::new(backend, config, OutputSink::stdout()));
        Self { console, options }
    }

    pub fn console(&self) -> Arc<DebugConsole> {
        Arc::clone(&self.console)
    }

    /// Runs until a shutdown trigger fires, then shuts down gracefully.
    pub async fn run(self) -> Result<StopReason> {
        info!("===========================================");
        info!("  {} v{}", qc_18_debug_console::APP_NAME, qc_18_debug_console::VERSION);
        info!("===========================================");
        info!(node_id = %self.console.backend().self_node_id(), "Node identity");

        let server = self.start_server().await?;
        let mut terminal = self.start_terminal();
        let mut pid_watch = self.start_pid_watch();
        let mut shutdown = self.console.subscribe_shutdown();

        let reason = loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        error!(error = %e, "Failed to listen for Ctrl-C");
                    }
                    break StopReason::CtrlC;
                }
                _ = shutdown.changed() => break StopReason::ExitCommand,
                exited = wait_optional(&mut pid_watch) => {
                    if exited == Some(true) {
                        break StopReason::WatchedProcessExited;
                    }
                    pid_watch = None;
                }
                end = wait_optional(&mut terminal) => {
                    terminal = None;
                    match end {
                        Some(SessionEnd::Exit) => break StopReason::ExitCommand,
                        _ if server.is_none() => break StopReason::TerminalClosed,
                        _ => info!("Terminal input closed; socket endpoint keeps running"),
                    }
                }
            }
        };

        info!(?reason, "Initiating graceful shutdown...");
        self.console.shutdown();
        if let Some(server) = server {
            match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!(error = %e, "Socket server stopped with error"),
                Ok(Err(e)) => warn!(error = %e, "Socket server task failed"),
                Err(_) => warn!("Socket server did not stop in time"),
            }
        }
        info!("Shutdown complete");
        Ok(reason)
    }

    async fn start_server(
        &self,
    ) -> Result<Option<JoinHandle<Result<(), qc_18_debug_console::ServerError>>>> {
        let socket = &self.console.config().socket;
        if !socket.enabled {
            return Ok(None);
        }
        let listener = ConsoleServer::bind(socket.listen)
            .await
            .context("Failed to start console socket")?;
        let server = ConsoleServer::new(Arc::clone(&self.console));
        Ok(Some(tokio::spawn(server.serve(listener))))
    }

    fn start_terminal(&self) -> Option<JoinHandle<SessionEnd>> {
        if !self.options.terminal {
            return None;
        }
        let console = Arc::clone(&self.console);
        Some(tokio::spawn(async move {
            TerminalConsole::new(&console).run().await
        }))
    }

    fn start_pid_watch(&self) -> Option<JoinHandle<bool>> {
        let pid = self.options.watch_pid?;
        info!(pid, "Watching process");
        Some(tokio::spawn(pid_watch::wait_for_exit(
            pid,
            pid_watch::CHECK_INTERVAL,
            self.console.cancel_token().clone(),
        )))
    }
}

/// Waits for `task` if there is one; never resolves otherwise. A failed
/// task resolves to `None`.
async fn wait_optional<T>(task: &mut Option<JoinHandle<T>>) -> Option<T> {
    match task {
        Some(handle) => match handle.await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "Runtime task failed");
                None
            }
        },
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> ConsoleConfig {
        let mut config = ConsoleConfig::default();
        config.session.show_banner = false;
        config
    }

    #[tokio::test]
    async fn test_exit_command_stops_runtime() {
        let runtime = NodeRuntime::new(quiet_config(), RuntimeOptions::default());
        let console = runtime.console();
        let run = tokio::spawn(runtime.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let input = qc_18_debug_console::service::InputBuffer::new();
        let session = console.open_session(
            qc_18_debug_console::SessionKind::Socket,
            Box::new(input.reader()),
            OutputSink::from(qc_18_debug_console::domain::BufferWriter::new()),
        );
        input.push_message("exit");
        assert_eq!(console.run_session(session).await, SessionEnd::Exit);

        let reason = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reason, StopReason::ExitCommand);
        assert!(console.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_socket_server_starts_and_stops() {
        let mut config = quiet_config();
        config.socket.enabled = true;
        config.socket.listen = "127.0.0.1:0".parse().unwrap();
        let runtime = NodeRuntime::new(config, RuntimeOptions::default());
        let console = runtime.console();
        let run = tokio::spawn(runtime.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        console.shutdown();
        let reason = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reason, StopReason::ExitCommand);
    }
}
