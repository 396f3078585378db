//! # Debug Console Service
//!
//! Owns the process-wide pieces of the console: the key registry, the
//! event filters registered with the backend, the shared interpreter and
//! the shutdown signal. Front ends (the terminal, the socket server) only
//! open sessions on it and run them.
//!
//! ## Lifecycle
//!
//! The registry is created with the console and cleared by
//! [`DebugConsole::shutdown`]. Every session's token is a child of the
//! console's root token, so shutdown cancels all sessions at once.

use crate::domain::{ConsoleConfig, KeyRegistry, OutputSink};
use crate::ports::{EventHooks, NetworkBackend};
use crate::service::filters::{ErrorOutputSwitch, EventFilters};
use crate::service::input::{LineSource, SessionInput};
use crate::service::interpreter::CommandInterpreter;
use crate::service::session::{Session, SessionEnd, SessionKind, SessionRunner};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct DebugConsole {
    backend: Arc<dyn NetworkBackend>,
    registry: Arc<KeyRegistry>,
    config: ConsoleConfig,
    error_output: Arc<ErrorOutputSwitch>,
    runner: SessionRunner,
    root: CancellationToken,
    shutdown: watch::Sender<bool>,
}

impl DebugConsole {
    /// Builds the console and registers its event filters with `backend`.
    ///
    /// `console` receives backend error reports routed to the command line.
    pub fn new(backend: Arc<dyn NetworkBackend>, config: ConsoleConfig, console: OutputSink) -> Self {
        let registry = Arc::new(KeyRegistry::new());
        let error_output = Arc::new(ErrorOutputSwitch::new(config.error_output));
        let (shutdown, _) = watch::channel(false);

        let filters = Arc::new(EventFilters::new(
            Arc::clone(&registry),
            console,
            Arc::clone(&error_output),
        ));
        backend.register_hooks(EventHooks::from_shared(filters));

        let interpreter = Arc::new(CommandInterpreter::new(
            Arc::clone(&backend),
            Arc::clone(&registry),
            config.clone(),
            Arc::clone(&error_output),
            shutdown.clone(),
        ));
        let runner = SessionRunner::new(interpreter, config.session.show_banner);

        info!(node_id = %backend.self_node_id(), "Debug console initialised");
        Self {
            backend,
            registry,
            config,
            error_output,
            runner,
            root: CancellationToken::new(),
            shutdown,
        }
    }

    pub fn backend(&self) -> &Arc<dyn NetworkBackend> {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn error_output(&self) -> &Arc<ErrorOutputSwitch> {
        &self.error_output
    }

    /// Root token; cancelled by [`shutdown`](Self::shutdown).
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.root
    }

    /// Opens a session reading from `source` and writing to `output`.
    pub fn open_session(
        &self,
        kind: SessionKind,
        source: Box<dyn LineSource>,
        output: OutputSink,
    ) -> Session {
        let input = SessionInput::new(
            source,
            self.root.child_token(),
            self.config.session.poll_interval,
        );
        Session::new(kind, input, output, Arc::clone(&self.registry))
    }

    /// Runs `session` to completion.
    pub async fn run_session(&self, session: Session) -> SessionEnd {
        self.runner.run(session).await
    }

    pub fn runner(&self) -> &SessionRunner {
        &self.runner
    }

    /// Fires when any session runs `exit` or [`shutdown`](Self::shutdown)
    /// is called.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Cancels every session and clears the registry.
    pub fn shutdown(&self) {
        info!("Shutting down debug console");
        self.shutdown.send_replace(true);
        self.root.cancel();
        self.registry.clear();
    }
}

impl fmt::Debug for DebugConsole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugConsole")
            .field("monitored", &self.registry.len())
            .field("cancelled", &self.root.is_cancelled())
            .finish_non_exhaustive()
    }
}
