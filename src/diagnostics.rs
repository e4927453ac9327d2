//! Diagnostics sink.
//!
//! The driver receives a sink at construction instead of writing to a
//! process-wide stream. [`LogSink`] forwards to the `log` crate and is the
//! default; [`MemorySink`] keeps events in memory so tests can inspect them.

use log::Level;
use parking_lot::Mutex;

/// Receiver for engine diagnostics.
pub trait DiagnosticsSink: Send + Sync {
    /// Record one event.
    fn event(&self, level: Level, message: &str);

    /// Informational event.
    fn info(&self, message: &str) {
        self.event(Level::Info, message);
    }

    /// Warning event.
    fn warn(&self, message: &str) {
        self.event(Level::Warn, message);
    }

    /// Error event.
    fn error(&self, message: &str) {
        self.event(Level::Error, message);
    }

    /// Debug event.
    fn debug(&self, message: &str) {
        self.event(Level::Debug, message);
    }
}

/// Sink forwarding to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticsSink for LogSink {
    fn event(&self, level: Level, message: &str) {
        log::log!(target: "fdtd_core", level, "{}", message);
    }
}

/// Sink that stores every event.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<(Level, String)>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<(Level, String)> {
        self.events.lock().clone()
    }

    /// Number of events at exactly `level`.
    pub fn count(&self, level: Level) -> usize {
        self.events.lock().iter().filter(|(l, _)| *l == level).count()
    }

    /// Whether any event message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.events.lock().iter().any(|(_, m)| m.contains(needle))
    }
}

impl DiagnosticsSink for MemorySink {
    fn event(&self, level: Level, message: &str) {
        self.events.lock().push((level, message.to_string()));
    }
}
