use chrono::Utc;
use std::borrow::Cow;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::Core;
use crate::encoder::iso8601;
use crate::error::CoreError;
use crate::record::{Caller, Field, LogRecord, Severity};
use crate::sink::LogSink;

/// Counters kept by a [`Logger`] across all of its clones.
#[derive(Debug, Default)]
pub struct LoggerStats {
    /// Records built and passed to the core.
    pub handled: AtomicU64,
    /// Records written by at least one core.
    pub written: AtomicU64,
    /// Records whose handling hit a destination error.
    pub failed: AtomicU64,
}

/// Point-in-time copy of [`LoggerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggerSnapshot {
    pub handled: u64,
    pub written: u64,
    pub failed: u64,
}

struct Shared {
    core: Arc<dyn Core>,
    error_output: Arc<dyn LogSink>,
    add_caller: bool,
    stats: LoggerStats,
}

/// Entry point for emitting records.
///
/// A `Logger` is a cheap handle: clones and child loggers created with
/// [`Logger::with`] share the same core and counters. Construct the
/// pipeline once (see [`Pipeline`](crate::init::Pipeline)) and pass the
/// handle to whatever needs to log.
///
/// Logging never fails from the caller's point of view. Destination
/// errors are written to the error output and counted in [`Logger::stats`].
#[derive(Clone)]
pub struct Logger {
    shared: Arc<Shared>,
    fields: Arc<[Field]>,
}

impl Logger {
    pub fn new(core: Arc<dyn Core>, error_output: Arc<dyn LogSink>) -> Self {
        Self {
            shared: Arc::new(Shared {
                core,
                error_output,
                add_caller: true,
                stats: LoggerStats::default(),
            }),
            fields: Arc::from(Vec::new()),
        }
    }

    /// Disable caller resolution for every record of this logger.
    pub fn without_caller(core: Arc<dyn Core>, error_output: Arc<dyn LogSink>) -> Self {
        let mut logger = Self::new(core, error_output);
        if let Some(shared) = Arc::get_mut(&mut logger.shared) {
            shared.add_caller = false;
        }
        logger
    }

    /// Child logger that attaches `fields` to every record before the
    /// per-call fields.
    pub fn with(&self, fields: impl IntoIterator<Item = Field>) -> Self {
        let bound: Vec<Field> = self.fields.iter().cloned().chain(fields).collect();
        Self {
            shared: Arc::clone(&self.shared),
            fields: Arc::from(bound),
        }
    }

    /// Child logger tagged with a `logger` field.
    pub fn named(&self, name: impl Into<Cow<'static, str>>) -> Self {
        let name: Cow<'static, str> = name.into();
        self.with([Field::str("logger", name.into_owned())])
    }

    /// Whether any core would take a record of this severity.
    pub fn enabled(&self, severity: Severity) -> bool {
        self.shared.core.enabled(severity)
    }

    #[track_caller]
    pub fn log(
        &self,
        severity: Severity,
        message: impl Into<String>,
        fields: impl IntoIterator<Item = Field>,
    ) {
        if !self.enabled(severity) {
            return;
        }
        let mut record = LogRecord::new(severity, message)
            .with_fields(self.fields.iter().cloned())
            .with_fields(fields);
        if self.shared.add_caller {
            record.caller = Some(Caller::from(Location::caller()));
        }
        self.dispatch(&record);
    }

    #[track_caller]
    pub fn debug(&self, message: impl Into<String>, fields: impl IntoIterator<Item = Field>) {
        self.log(Severity::Debug, message, fields);
    }

    #[track_caller]
    pub fn info(&self, message: impl Into<String>, fields: impl IntoIterator<Item = Field>) {
        self.log(Severity::Info, message, fields);
    }

    #[track_caller]
    pub fn warn(&self, message: impl Into<String>, fields: impl IntoIterator<Item = Field>) {
        self.log(Severity::Warn, message, fields);
    }

    #[track_caller]
    pub fn error(&self, message: impl Into<String>, fields: impl IntoIterator<Item = Field>) {
        self.log(Severity::Error, message, fields);
    }

    /// Log at fatal severity and flush. Terminating the process is left
    /// to the caller.
    #[track_caller]
    pub fn fatal(&self, message: impl Into<String>, fields: impl IntoIterator<Item = Field>) {
        self.log(Severity::Fatal, message, fields);
        if let Err(e) = self.sync() {
            self.report(&e);
        }
    }

    /// Route an already built record through the core. Bound fields of
    /// this logger are not added.
    pub fn dispatch(&self, record: &LogRecord) {
        let stats = &self.shared.stats;
        stats.handled.fetch_add(1, Ordering::Relaxed);
        match self.shared.core.handle(record) {
            Ok(true) => {
                stats.written.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                self.report(&e);
            }
        }
    }

    /// Flush every destination.
    ///
    /// **Returns**
    /// - `Err(..)` if any destination could not be made durable; at
    ///   shutdown the host must treat this as fatal.
    pub fn sync(&self) -> Result<(), CoreError> {
        self.shared.core.sync()
    }

    pub fn stats(&self) -> LoggerSnapshot {
        let stats = &self.shared.stats;
        LoggerSnapshot {
            handled: stats.handled.load(Ordering::Relaxed),
            written: stats.written.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
        }
    }

    fn report(&self, err: &CoreError) {
        let line = format!("{} log write error: {}\n", iso8601(&Utc::now()), err);
        // Nowhere left to report a failing error output.
        let _ = self.shared.error_output.write(line.as_bytes());
    }
}
