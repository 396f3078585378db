//! # Sessions
//!
//! One session is one read-eval-write loop bound to one input and one
//! output. The terminal and every `/console` socket connection each get
//! their own.
//!
//! ## Ownership
//!
//! A session owns the monitor keys it added and the background tasks it
//! started. Both are released when the session is dropped, whichever way
//! the loop ended. A key is only removed at teardown while it is still
//! bound to this session's sink, so a sentinel another session enabled
//! stays enabled.

use crate::domain::{KeyRegistry, MonitorKey, OutputSink};
use crate::service::input::{ReadLine, SessionInput};
use crate::service::interpreter::CommandInterpreter;
use crate::service::render::HELP_TEXT;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// How long teardown waits for background tasks to observe cancellation
/// before aborting them.
const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Terminal,
    Socket,
}

/// Why a session loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The input was exhausted.
    InputClosed,
    /// The session's cancellation token fired.
    Cancelled,
    /// The operator asked the process to exit.
    Exit,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputClosed => f.write_str("input closed"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Exit => f.write_str("exit requested"),
        }
    }
}

pub struct Session {
    id: Uuid,
    kind: SessionKind,
    input: SessionInput,
    output: OutputSink,
    registry: Arc<KeyRegistry>,
    owned_keys: HashSet<MonitorKey>,
    tasks: JoinSet<()>,
}

impl Session {
    pub fn new(
        kind: SessionKind,
        input: SessionInput,
        output: OutputSink,
        registry: Arc<KeyRegistry>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            input,
            output,
            registry,
            owned_keys: HashSet::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn output(&self) -> &OutputSink {
        &self.output
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        self.input.cancel_token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token().is_cancelled()
    }

    pub async fn read_line(&mut self) -> ReadLine {
        self.input.read_line().await
    }

    /// Reads the follow-up line of a multi-step command.
    pub async fn read_follow_up(&mut self) -> Result<String, SessionEnd> {
        match self.input.read_line().await {
            ReadLine::Line(line) => Ok(line),
            ReadLine::Ended => Err(SessionEnd::InputClosed),
            ReadLine::Cancelled => Err(SessionEnd::Cancelled),
        }
    }

    /// Toggles `key` in the registry, bound to this session's output.
    /// Returns true when the key was added.
    pub fn toggle_watch(&mut self, key: MonitorKey) -> bool {
        let added = self.registry.toggle(key.clone(), self.output.clone());
        if added {
            self.owned_keys.insert(key);
        } else {
            self.owned_keys.remove(&key);
        }
        added
    }

    pub fn owns_key(&self, key: &MonitorKey) -> bool {
        self.owned_keys.contains(key)
    }

    /// Runs `task` in the background for at most the lifetime of this
    /// session. The task receives a child of the session's token.
    pub fn spawn<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        while self.tasks.try_join_next().is_some() {}
        let token = self.cancel_token().child_token();
        self.tasks.spawn(task(token));
    }

    pub fn background_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Cancels the session and waits briefly for its background tasks.
    /// Owned keys are released when the session is dropped right after.
    pub async fn close(mut self) {
        self.cancel_token().cancel();
        let drain = async { while self.tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(TASK_DRAIN_TIMEOUT, drain).await.is_err() {
            debug!(session_id = %self.id, "Aborting background tasks");
        }
    }

    fn release_keys(&mut self) {
        for key in self.owned_keys.drain() {
            self.registry.remove_if_bound(key.as_bytes(), &self.output);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release_keys();
        self.tasks.abort_all();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("owned_keys", &self.owned_keys.len())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Drives sessions through the command interpreter.
#[derive(Clone)]
pub struct SessionRunner {
    interpreter: Arc<CommandInterpreter>,
    show_banner: bool,
}

impl SessionRunner {
    pub fn new(interpreter: Arc<CommandInterpreter>, show_banner: bool) -> Self {
        Self {
            interpreter,
            show_banner,
        }
    }

    /// Runs `session` until its input ends, it is cancelled or the operator
    /// exits. Commands execute strictly one after another.
    pub async fn run(&self, mut session: Session) -> SessionEnd {
        info!(session_id = %session.id(), kind = ?session.kind(), "Session started");
        if self.show_banner {
            session.output().write(format!(
                "{} {}\n------------------------------\n{}",
                crate::APP_NAME,
                crate::VERSION,
                HELP_TEXT
            ));
        }

        let end = loop {
            let line = match session.read_line().await {
                ReadLine::Line(line) => line,
                ReadLine::Ended => break SessionEnd::InputClosed,
                ReadLine::Cancelled => break SessionEnd::Cancelled,
            };
            if line.is_empty() {
                continue;
            }
            if let Err(end) = self.interpreter.execute(&line, &mut session).await {
                break end;
            }
        };

        let id = session.id();
        session.close().await;
        info!(session_id = %id, reason = %end, "Session ended");
        end
    }
}

impl fmt::Debug for SessionRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRunner")
            .field("show_banner", &self.show_banner)
            .finish_non_exhaustive()
    }
}
