//! Terminal session on the process stdin and stdout.
//!
//! Stdin is read by a detached task that pushes complete lines into an
//! [`InputBuffer`]. The session polls that buffer, so it stays responsive
//! to cancellation while the blocking stdin read is still pending.

use crate::domain::OutputSink;
use crate::service::{DebugConsole, InputBuffer, SessionEnd, SessionKind};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, warn};

pub struct TerminalConsole<'a> {
    console: &'a DebugConsole,
    output: OutputSink,
}

impl<'a> TerminalConsole<'a> {
    pub fn new(console: &'a DebugConsole) -> Self {
        Self {
            console,
            output: OutputSink::stdout(),
        }
    }

    /// Replaces the stdout sink.
    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    /// Runs a session on the process stdin.
    pub async fn run(self) -> SessionEnd {
        self.run_with(tokio::io::stdin()).await
    }

    /// Runs a session reading lines from `reader`.
    pub async fn run_with<R>(self, reader: R) -> SessionEnd
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let input = InputBuffer::new();
        tokio::spawn(pump_lines(reader, Arc::clone(&input)));

        let session =
            self.console
                .open_session(SessionKind::Terminal, Box::new(input.reader()), self.output);
        let end = self.console.run_session(session).await;
        input.close();
        end
    }
}

/// Copies lines from `reader` into `buffer` and closes it at end of input.
pub async fn pump_lines<R>(reader: R, buffer: Arc<InputBuffer>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if buffer.is_closed() {
                    break;
                }
                buffer.push_message(&line);
            }
            Ok(None) => {
                debug!("Terminal input reached end of file");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Terminal input failed");
                break;
            }
        }
    }
    buffer.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBackend;
    use crate::domain::{BufferWriter, ConsoleConfig, KeyPair};
    use std::time::Duration;

    fn quiet_console() -> DebugConsole {
        let mut config = ConsoleConfig::default();
        config.session.show_banner = false;
        config.session.poll_interval = Duration::from_millis(20);
        DebugConsole::new(
            Arc::new(InMemoryBackend::new(KeyPair::generate())),
            config,
            OutputSink::from(BufferWriter::new()),
        )
    }

    #[tokio::test]
    async fn test_pump_lines_closes_at_eof() {
        let buffer = InputBuffer::new();
        pump_lines(&b"help\nhash\n"[..], Arc::clone(&buffer)).await;
        assert!(buffer.is_closed());
    }

    #[tokio::test]
    async fn test_session_ends_when_input_ends() {
        let console = quiet_console();
        let output = BufferWriter::new();
        let end = TerminalConsole::new(&console)
            .with_output(OutputSink::from(output.clone()))
            .run_with(&b"hash\nabc\n"[..])
            .await;

        assert_eq!(end, SessionEnd::InputClosed);
        assert!(output.contents().contains("blake3 hash: "));
    }

    #[tokio::test]
    async fn test_exit_stops_session() {
        let console = quiet_console();
        let output = BufferWriter::new();
        let end = TerminalConsole::new(&console)
            .with_output(OutputSink::from(output.clone()))
            .run_with(&b"exit\nhelp\n"[..])
            .await;

        assert_eq!(end, SessionEnd::Exit);
        assert!(console.is_shutting_down());
        assert!(!output.contents().contains("net list"));
    }
}
