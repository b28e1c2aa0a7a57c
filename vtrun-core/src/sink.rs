//! Output destinations and the per-stream fan-out.
//!
//! A sink receives every captured line, trailing newline included, as soon as
//! the child produces it. Sinks are shared (`Arc`) between the defaults, the
//! context stack, and explicit arguments, so each implementation serialises
//! its own writes.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{Level, warn};

/// A destination for captured output lines.
pub trait LineSink: Send + Sync {
    fn write_line(&self, line: &str) -> io::Result<()>;
}

/// Shared handle to a line sink.
pub type Sink = Arc<dyn LineSink>;

/// Wrap any writer. Each line is written and flushed under a lock.
pub fn writer<W: Write + Send + 'static>(inner: W) -> Sink {
    Arc::new(WriterSink {
        inner: Mutex::new(inner),
    })
}

/// The parent's standard output.
pub fn stdout() -> Sink {
    Arc::new(StdStream::Stdout)
}

/// The parent's standard error.
pub fn stderr() -> Sink {
    Arc::new(StdStream::Stderr)
}

/// A sink that drops everything.
pub fn null() -> Sink {
    Arc::new(NullSink)
}

/// Build a sink from a closure.
pub fn from_fn<F>(f: F) -> Sink
where
    F: Fn(&str) -> io::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnSink(f))
}

struct WriterSink<W> {
    inner: Mutex<W>,
}

impl<W: Write + Send> LineSink for WriterSink<W> {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut inner = self.inner.lock();
        inner.write_all(line.as_bytes())?;
        inner.flush()
    }
}

enum StdStream {
    Stdout,
    Stderr,
}

impl LineSink for StdStream {
    fn write_line(&self, line: &str) -> io::Result<()> {
        match self {
            Self::Stdout => {
                let mut lock = io::stdout().lock();
                lock.write_all(line.as_bytes())?;
                lock.flush()
            }
            Self::Stderr => {
                let mut lock = io::stderr().lock();
                lock.write_all(line.as_bytes())?;
                lock.flush()
            }
        }
    }
}

struct NullSink;

impl LineSink for NullSink {
    fn write_line(&self, _line: &str) -> io::Result<()> {
        Ok(())
    }
}

struct FnSink<F>(F);

impl<F> LineSink for FnSink<F>
where
    F: Fn(&str) -> io::Result<()> + Send + Sync,
{
    fn write_line(&self, line: &str) -> io::Result<()> {
        (self.0)(line)
    }
}

/// In-memory sink whose contents can be read back from any clone.
#[derive(Clone, Default)]
pub struct BufferSink {
    buffer: Arc<Mutex<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink handle that appends into this buffer.
    pub fn sink(&self) -> Sink {
        Arc::new(self.clone())
    }

    pub fn contents(&self) -> String {
        self.buffer.lock().clone()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl fmt::Debug for BufferSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferSink")
            .field("len", &self.buffer.lock().len())
            .finish()
    }
}

impl LineSink for BufferSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        self.buffer.lock().push_str(line);
        Ok(())
    }
}

/// Routes lines into `tracing` events tagged with the stream they came from.
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    stream: Stream,
    level: Level,
}

impl TracingSink {
    pub fn new(stream: Stream, level: Level) -> Self {
        Self { stream, level }
    }

    pub fn sink(self) -> Sink {
        Arc::new(self)
    }
}

impl LineSink for TracingSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        emit_event(self.level, self.stream.as_str(), line.trim_end_matches(['\r', '\n']));
        Ok(())
    }
}

pub(crate) fn emit_event(level: Level, stream: &str, line: &str) {
    match level {
        Level::ERROR => tracing::error!(target: "vtrun::output", stream, "{line}"),
        Level::WARN => tracing::warn!(target: "vtrun::output", stream, "{line}"),
        Level::INFO => tracing::info!(target: "vtrun::output", stream, "{line}"),
        Level::DEBUG => tracing::debug!(target: "vtrun::output", stream, "{line}"),
        _ => tracing::trace!(target: "vtrun::output", stream, "{line}"),
    }
}

/// Which child stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Delivers each line to every sink of one stream and accumulates it for the
/// result.
pub(crate) struct FanOut {
    stream: Stream,
    sinks: Vec<Sink>,
    captured: String,
    failures: usize,
}

impl FanOut {
    pub(crate) fn new(stream: Stream, sinks: Vec<Sink>) -> Self {
        Self {
            stream,
            sinks,
            captured: String::new(),
            failures: 0,
        }
    }

    /// Append `line` to the accumulator and write it to every sink in order.
    /// A failing sink is reported and skipped; the rest still receive the line.
    pub(crate) fn deliver(&mut self, line: &str) {
        self.captured.push_str(line);
        for (index, sink) in self.sinks.iter().enumerate() {
            if let Err(error) = sink.write_line(line) {
                self.failures += 1;
                warn!(
                    stream = self.stream.as_str(),
                    sink = index,
                    %error,
                    "output sink write failed"
                );
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn failures(&self) -> usize {
        self.failures
    }

    pub(crate) fn into_captured(self) -> String {
        self.captured
    }
}
