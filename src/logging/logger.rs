// Logger handles and sinks

use super::{Facility, Severity};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single formatted log event handed to a sink.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: SystemTime,
    pub severity: Severity,
    pub facility: Facility,
    pub message: String,
    pub kvs: Vec<(String, String)>,
}

impl LogEntry {
    pub fn new(severity: Severity, facility: Facility, message: &str) -> Self {
        Self {
            timestamp: SystemTime::now(),
            severity,
            facility,
            message: message.to_string(),
            kvs: Vec::new(),
        }
    }

    pub fn add_kv(&mut self, key: &str, value: &str) {
        self.kvs.push((key.to_string(), value.to_string()));
    }

    /// Renders the entry as a single log line.
    pub fn format_line(&self) -> String {
        let since_epoch = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let mut line = format!(
            "{}.{:03} {} {}: {}",
            since_epoch.as_secs(),
            since_epoch.subsec_millis(),
            self.severity,
            self.facility,
            self.message
        );
        for (key, value) in &self.kvs {
            line.push_str(&format!(" {}={}", key, value));
        }
        line
    }
}

/// Destination for log entries. Sinks must tolerate being called from
/// any task on the runtime.
pub trait LogSink: Send + Sync {
    fn write(&self, entry: &LogEntry);
}

/// Sink that writes formatted lines to standard error.
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write(&self, entry: &LogEntry) {
        eprintln!("{}", entry.format_line());
    }
}

/// Sink that discards everything. Used by tests and as a placeholder
/// while the daemon is bootstrapping.
pub struct NullSink;

impl LogSink for NullSink {
    fn write(&self, _entry: &LogEntry) {}
}

/// Logger handle for writing log entries
///
/// This is a lightweight handle that can be cloned and passed around.
/// The sink and the level threshold are shared between clones, so
/// `set_level` on any handle takes effect everywhere.
pub struct Logger {
    sink: Arc<dyn LogSink>,
    max_severity: Arc<AtomicU8>,
}

impl Logger {
    /// Create a logger writing to the given sink, passing everything
    /// up to and including Info.
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self::with_level(sink, Severity::Info)
    }

    /// Create a logger with an explicit severity threshold.
    pub fn with_level(sink: Arc<dyn LogSink>, level: Severity) -> Self {
        Self {
            sink,
            max_severity: Arc::new(AtomicU8::new(level.as_u8())),
        }
    }

    /// Convenience constructor for the daemon's default output.
    pub fn stderr(level: Severity) -> Self {
        Self::with_level(Arc::new(StderrSink), level)
    }

    /// Convenience constructor for a logger that discards everything.
    pub fn null() -> Self {
        Self::with_level(Arc::new(NullSink), Severity::Emergency)
    }

    /// Change the severity threshold at runtime.
    pub fn set_level(&self, level: Severity) {
        self.max_severity.store(level.as_u8(), Ordering::Relaxed);
    }

    /// Current severity threshold.
    pub fn level(&self) -> Severity {
        Severity::from_u8(self.max_severity.load(Ordering::Relaxed)).unwrap_or(Severity::Debug)
    }

    /// Whether a message at the given severity would be written.
    #[inline]
    pub fn enabled(&self, severity: Severity) -> bool {
        severity.as_u8() <= self.max_severity.load(Ordering::Relaxed)
    }

    /// Write a log entry
    #[inline]
    pub fn log(&self, severity: Severity, facility: Facility, message: &str) {
        if !self.enabled(severity) {
            return;
        }
        let entry = LogEntry::new(severity, facility, message);
        self.sink.write(&entry);
    }

    /// Write a log entry with key-value pairs
    #[inline]
    pub fn log_kv(
        &self,
        severity: Severity,
        facility: Facility,
        message: &str,
        kvs: &[(&str, &str)],
    ) {
        if !self.enabled(severity) {
            return;
        }
        let mut entry = LogEntry::new(severity, facility, message);
        for (key, value) in kvs {
            entry.add_kv(key, value);
        }
        self.sink.write(&entry);
    }

    /// Log with emergency severity
    #[inline]
    pub fn emergency(&self, facility: Facility, message: &str) {
        self.log(Severity::Emergency, facility, message);
    }

    /// Log with alert severity
    #[inline]
    pub fn alert(&self, facility: Facility, message: &str) {
        self.log(Severity::Alert, facility, message);
    }

    /// Log with critical severity
    #[inline]
    pub fn critical(&self, facility: Facility, message: &str) {
        self.log(Severity::Critical, facility, message);
    }

    /// Log with error severity
    #[inline]
    pub fn error(&self, facility: Facility, message: &str) {
        self.log(Severity::Error, facility, message);
    }

    /// Log with warning severity
    #[inline]
    pub fn warning(&self, facility: Facility, message: &str) {
        self.log(Severity::Warning, facility, message);
    }

    /// Log with notice severity
    #[inline]
    pub fn notice(&self, facility: Facility, message: &str) {
        self.log(Severity::Notice, facility, message);
    }

    /// Log with info severity
    #[inline]
    pub fn info(&self, facility: Facility, message: &str) {
        self.log(Severity::Info, facility, message);
    }

    /// Log with debug severity
    #[inline]
    pub fn debug(&self, facility: Facility, message: &str) {
        self.log(Severity::Debug, facility, message);
    }
}

impl Clone for Logger {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            max_severity: Arc::clone(&self.max_severity),
        }
    }
}
