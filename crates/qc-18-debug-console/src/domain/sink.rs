//! Output sinks
//!
//! Every text destination (the process console, a socket session's output
//! buffer) is an [`OutputSink`]. Event filters running on backend tasks and
//! the owning session write to the same sink concurrently, so each
//! `write` call lands as one uninterrupted block.

use parking_lot::Mutex;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// A text destination. Implementations must write each call atomically.
pub trait ConsoleWriter: Send + Sync {
    fn write_text(&self, text: &str);
}

/// Cloneable handle to a shared [`ConsoleWriter`].
#[derive(Clone)]
pub struct OutputSink {
    writer: Arc<dyn ConsoleWriter>,
}

impl OutputSink {
    pub fn new<W: ConsoleWriter + 'static>(writer: W) -> Self {
        Self {
            writer: Arc::new(writer),
        }
    }

    /// Sink writing to the process standard output.
    pub fn stdout() -> Self {
        Self::new(StdoutWriter)
    }

    pub fn write(&self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            self.writer.write_text(text);
        }
    }

    /// Writes `text` followed by a newline as a single block.
    pub fn line(&self, text: impl AsRef<str>) {
        let mut text = text.as_ref().to_string();
        text.push('\n');
        self.writer.write_text(&text);
    }

    /// True when both handles point at the same destination.
    pub fn same_destination(&self, other: &OutputSink) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.writer), Arc::as_ptr(&other.writer))
    }
}

impl<W: ConsoleWriter + 'static> From<Arc<W>> for OutputSink {
    fn from(writer: Arc<W>) -> Self {
        Self { writer }
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputSink({:p})", Arc::as_ptr(&self.writer))
    }
}

/// Writes to stdout while holding the stdout lock for the whole block.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutWriter;

impl ConsoleWriter for StdoutWriter {
    fn write_text(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

/// In-memory output buffer drained by a forwarding task.
///
/// Used as the output side of socket-backed sessions and as a capture
/// sink in tests.
#[derive(Debug, Default)]
pub struct BufferWriter {
    buffer: Mutex<String>,
    notify: Notify,
}

impl BufferWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Removes and returns up to `max_bytes` of pending output, split on a
    /// character boundary. Returns `None` when nothing is pending.
    pub fn drain_chunk(&self, max_bytes: usize) -> Option<String> {
        let mut buffer = self.buffer.lock();
        if buffer.is_empty() {
            return None;
        }
        if buffer.len() <= max_bytes {
            return Some(std::mem::take(&mut *buffer));
        }
        let mut split = max_bytes.max(1);
        while !buffer.is_char_boundary(split) {
            split += 1;
        }
        let rest = buffer.split_off(split);
        Some(std::mem::replace(&mut *buffer, rest))
    }

    /// Removes and returns everything pending.
    pub fn drain(&self) -> String {
        std::mem::take(&mut *self.buffer.lock())
    }

    /// Copy of the pending output without consuming it.
    pub fn contents(&self) -> String {
        self.buffer.lock().clone()
    }

    /// Waits until output is written or `max_wait` elapses.
    pub async fn wait_for_output(&self, max_wait: Duration) {
        if !self.buffer.lock().is_empty() {
            return;
        }
        let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
    }
}

impl ConsoleWriter for BufferWriter {
    fn write_text(&self, text: &str) {
        self.buffer.lock().push_str(text);
        self.notify.notify_one();
    }
}
