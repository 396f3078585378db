//! Cancellable line input.
//!
//! A session never blocks on its input without bound. [`SessionInput`]
//! polls the underlying [`LineSource`] for at most one poll interval, then
//! checks its cancellation token and tries again. Cancellation latency is
//! therefore bounded by `session.poll_interval`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Result of one bounded wait for a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinePoll {
    Line(String),
    /// Nothing complete arrived within the wait.
    Pending,
    /// The source is exhausted.
    Closed,
}

/// A source of newline terminated text.
#[async_trait]
pub trait LineSource: Send {
    /// Waits at most `max_wait` for the next complete line.
    async fn poll_line(&mut self, max_wait: Duration) -> LinePoll;
}

/// Result of a cancellable read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadLine {
    Line(String),
    Ended,
    Cancelled,
}

/// Line input of one session.
pub struct SessionInput {
    source: Box<dyn LineSource>,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl SessionInput {
    pub fn new(
        source: Box<dyn LineSource>,
        cancel: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            cancel,
            poll_interval,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Reads the next line, trimmed. Cancellation wins over pending input.
    pub async fn read_line(&mut self) -> ReadLine {
        loop {
            if self.cancel.is_cancelled() {
                return ReadLine::Cancelled;
            }
            match self.source.poll_line(self.poll_interval).await {
                LinePoll::Line(_) if self.cancel.is_cancelled() => return ReadLine::Cancelled,
                LinePoll::Line(line) => return ReadLine::Line(line.trim().to_string()),
                LinePoll::Closed => return ReadLine::Ended,
                LinePoll::Pending => continue,
            }
        }
    }
}

// =============================================================================
// Shared input buffer
// =============================================================================

#[derive(Debug, Default)]
struct BufferState {
    pending: String,
    closed: bool,
}

/// Append-only text buffer feeding a session.
///
/// Producers (the socket bridge, the stdin reader) push text; the session
/// consumes it line by line through [`InputBufferReader`].
#[derive(Debug, Default)]
pub struct InputBuffer {
    state: Mutex<BufferState>,
    notify: Notify,
}

impl InputBuffer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Appends one message. A missing trailing newline is added so that
    /// each message ends at least one line.
    pub fn push_message(&self, text: &str) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.pending.push_str(text);
            if !text.ends_with('\n') {
                state.pending.push('\n');
            }
        }
        self.notify.notify_one();
    }

    /// Marks the end of input. Lines already pushed can still be read.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn take_line(&self) -> LinePoll {
        let mut state = self.state.lock();
        if let Some(end) = state.pending.find('\n') {
            let rest = state.pending.split_off(end + 1);
            let mut line = std::mem::replace(&mut state.pending, rest);
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            return LinePoll::Line(line);
        }
        if state.closed {
            LinePoll::Closed
        } else {
            LinePoll::Pending
        }
    }

    pub fn reader(self: &Arc<Self>) -> InputBufferReader {
        InputBufferReader {
            buffer: Arc::clone(self),
        }
    }
}

/// [`LineSource`] reading from a shared [`InputBuffer`].
#[derive(Debug, Clone)]
pub struct InputBufferReader {
    buffer: Arc<InputBuffer>,
}

#[async_trait]
impl LineSource for InputBufferReader {
    async fn poll_line(&mut self, max_wait: Duration) -> LinePoll {
        match self.buffer.take_line() {
            LinePoll::Pending => {}
            ready => return ready,
        }
        let _ = tokio::time::timeout(max_wait, self.buffer.notify.notified()).await;
        self.buffer.take_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_push_message_enforces_line_terminator() {
        let buffer = InputBuffer::new();
        let mut reader = buffer.reader();
        buffer.push_message("help");
        buffer.push_message("status\r\nexit\n");

        let wait = Duration::from_millis(10);
        assert_eq!(reader.poll_line(wait).await, LinePoll::Line("help".into()));
        assert_eq!(reader.poll_line(wait).await, LinePoll::Line("status".into()));
        assert_eq!(reader.poll_line(wait).await, LinePoll::Line("exit".into()));
        assert_eq!(reader.poll_line(wait).await, LinePoll::Pending);
    }

    #[tokio::test]
    async fn test_closed_buffer_drains_before_ending() {
        let buffer = InputBuffer::new();
        let cancel = CancellationToken::new();
        let mut input = SessionInput::new(
            Box::new(buffer.reader()),
            cancel,
            Duration::from_millis(10),
        );
        buffer.push_message("  peer list  ");
        buffer.close();
        buffer.push_message("ignored");

        assert_eq!(input.read_line().await, ReadLine::Line("peer list".into()));
        assert_eq!(input.read_line().await, ReadLine::Ended);
    }

    #[tokio::test]
    async fn test_cancellation_is_observed_within_one_poll() {
        let buffer = InputBuffer::new();
        let cancel = CancellationToken::new();
        let mut input = SessionInput::new(
            Box::new(buffer.reader()),
            cancel.clone(),
            Duration::from_millis(50),
        );

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        assert_eq!(input.read_line().await, ReadLine::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_reader_wakes_on_push() {
        let buffer = InputBuffer::new();
        let mut reader = buffer.reader();
        let producer = buffer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.push_message("hash");
        });

        let mut line = LinePoll::Pending;
        for _ in 0..100 {
            line = reader.poll_line(Duration::from_millis(50)).await;
            if line != LinePoll::Pending {
                break;
            }
        }
        assert_eq!(line, LinePoll::Line("hash".into()));
    }
}
