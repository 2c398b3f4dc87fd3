// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logger handle and output sinks

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use super::{Facility, Severity};

/// Destination for formatted log entries.
pub trait LogSink: Send + Sync {
    fn write(&self, severity: Severity, facility: Facility, message: &str);
}

/// Sink that writes one line per entry to stderr.
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write(&self, severity: Severity, facility: Facility, message: &str) {
        eprintln!("bbmrd[{}] {}: {}", facility, severity, message);
    }
}

/// Sink that records entries in memory; used by tests to assert on logs.
#[derive(Default)]
pub struct CaptureSink {
    entries: Mutex<Vec<(Severity, Facility, String)>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Severity, Facility, String)> {
        self.entries.lock().unwrap().clone()
    }
}

impl LogSink for CaptureSink {
    fn write(&self, severity: Severity, facility: Facility, message: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((severity, facility, message.to_string()));
    }
}

/// Logger handle for writing log entries.
///
/// This is a lightweight handle that can be cloned and passed around; the
/// sink and the severity threshold are shared between clones.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

struct LoggerInner {
    sink: Arc<dyn LogSink>,
    threshold: AtomicU8,
}

impl Logger {
    pub fn new(sink: Arc<dyn LogSink>, threshold: Severity) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                sink,
                threshold: AtomicU8::new(threshold as u8),
            }),
        }
    }

    /// Logger writing to stderr, the daemon's default.
    pub fn stderr(threshold: Severity) -> Self {
        Self::new(Arc::new(StderrSink), threshold)
    }

    /// Change the severity threshold for all clones of this logger.
    pub fn set_threshold(&self, threshold: Severity) {
        self.inner.threshold.store(threshold as u8, Ordering::Relaxed);
    }

    pub fn threshold(&self) -> Severity {
        Severity::from_u8(self.inner.threshold.load(Ordering::Relaxed))
            .unwrap_or(Severity::Debug)
    }

    /// Write a log entry if `severity` passes the threshold.
    pub fn log(&self, severity: Severity, facility: Facility, message: &str) {
        if severity <= self.threshold() {
            self.inner.sink.write(severity, facility, message);
        }
    }

    #[inline]
    pub fn critical(&self, facility: Facility, message: &str) {
        self.log(Severity::Critical, facility, message);
    }

    #[inline]
    pub fn error(&self, facility: Facility, message: &str) {
        self.log(Severity::Error, facility, message);
    }

    #[inline]
    pub fn warning(&self, facility: Facility, message: &str) {
        self.log(Severity::Warning, facility, message);
    }

    #[inline]
    pub fn notice(&self, facility: Facility, message: &str) {
        self.log(Severity::Notice, facility, message);
    }

    #[inline]
    pub fn info(&self, facility: Facility, message: &str) {
        self.log(Severity::Info, facility, message);
    }

    #[inline]
    pub fn debug(&self, facility: Facility, message: &str) {
        self.log(Severity::Debug, facility, message);
    }
}
