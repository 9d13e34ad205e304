use std::sync::Arc;

use crate::encoder::Encoder;
use crate::error::CoreError;
use crate::record::{LogRecord, Severity};
use crate::sink::LogSink;

/// A unit of the pipeline that decides whether to take a record and,
/// if so, writes it somewhere.
///
/// Implemented by [`FilteredCore`], [`Sampler`](crate::sampler::Sampler)
/// and [`Tee`], which compose by wrapping each other.
pub trait Core: Send + Sync {
    /// Short name used in error reports.
    fn name(&self) -> &str;

    /// Whether a record of this severity could be written at all.
    fn enabled(&self, severity: Severity) -> bool;

    /// Side-effect-free acceptance check.
    fn accepts(&self, record: &LogRecord) -> bool {
        self.enabled(record.severity)
    }

    /// Process one record.
    ///
    /// **Returns**
    /// - `Ok(true)` if the record was written by this core (or a child).
    /// - `Ok(false)` if it was declined by filtering or sampling.
    /// - `Err(..)` if a destination failed.
    fn handle(&self, record: &LogRecord) -> Result<bool, CoreError>;

    /// Flush every destination reachable from this core.
    fn sync(&self) -> Result<(), CoreError>;
}

/// Encoder + destination + minimum severity.
pub struct FilteredCore {
    name: String,
    encoder: Box<dyn Encoder>,
    sink: Arc<dyn LogSink>,
    min_severity: Severity,
}

impl FilteredCore {
    pub fn new(
        name: impl Into<String>,
        encoder: Box<dyn Encoder>,
        sink: Arc<dyn LogSink>,
        min_severity: Severity,
    ) -> Self {
        Self {
            name: name.into(),
            encoder,
            sink,
            min_severity,
        }
    }

    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }
}

impl Core for FilteredCore {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self, severity: Severity) -> bool {
        severity >= self.min_severity
    }

    fn handle(&self, record: &LogRecord) -> Result<bool, CoreError> {
        if !self.accepts(record) {
            return Ok(false);
        }
        let line = self.encoder.encode(record);
        self.sink.write(&line).map_err(|source| CoreError::Write {
            core: self.name.clone(),
            source,
        })?;
        Ok(true)
    }

    fn sync(&self) -> Result<(), CoreError> {
        self.sink.flush().map_err(|source| CoreError::Flush {
            core: self.name.clone(),
            source,
        })
    }
}

/// Fan-out to any number of child cores.
///
/// Every child sees every record and filters on its own; a failing child
/// does not stop the others.
#[derive(Default)]
pub struct Tee {
    children: Vec<Arc<dyn Core>>,
}

impl Tee {
    pub fn new(children: Vec<Arc<dyn Core>>) -> Self {
        Self { children }
    }

    pub fn push(&mut self, child: Arc<dyn Core>) {
        self.children.push(child);
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Core for Tee {
    fn name(&self) -> &str {
        "tee"
    }

    fn enabled(&self, severity: Severity) -> bool {
        self.children.iter().any(|c| c.enabled(severity))
    }

    fn accepts(&self, record: &LogRecord) -> bool {
        self.children.iter().any(|c| c.accepts(record))
    }

    fn handle(&self, record: &LogRecord) -> Result<bool, CoreError> {
        let mut written = false;
        let mut errors = Vec::new();
        for child in &self.children {
            match child.handle(record) {
                Ok(w) => written |= w,
                Err(e) => errors.push(e),
            }
        }
        match CoreError::combine(errors) {
            Some(err) => Err(err),
            None => Ok(written),
        }
    }

    fn sync(&self) -> Result<(), CoreError> {
        let errors = self
            .children
            .iter()
            .filter_map(|c| c.sync().err())
            .collect();
        match CoreError::combine(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::encoder::{ConsoleEncoder, JsonEncoder};
    use crate::error::SinkError;
    use crate::memory_sink::MemorySink;

    /// Sink whose writes and flushes always fail.
    pub(crate) struct BrokenSink;

    impl LogSink for BrokenSink {
        fn write(&self, _buf: &[u8]) -> Result<(), SinkError> {
            Err(SinkError::Stream(std::io::Error::other("disk full")))
        }

        fn flush(&self) -> Result<(), SinkError> {
            Err(SinkError::Stream(std::io::Error::other("storage unavailable")))
        }
    }

    fn json_core(name: &str, sink: &MemorySink, min: Severity) -> FilteredCore {
        FilteredCore::new(name, Box::new(JsonEncoder), Arc::new(sink.clone()), min)
    }

    #[test]
    fn test_filtered_core_drops_below_threshold() {
        let sink = MemorySink::new();
        let core = json_core("file", &sink, Severity::Warn);
        for severity in Severity::ALL {
            let written = core.handle(&LogRecord::new(severity, "m")).unwrap();
            assert_eq!(written, severity >= Severity::Warn);
        }
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_filtered_core_reports_write_errors() {
        let core = FilteredCore::new(
            "file",
            Box::new(JsonEncoder),
            Arc::new(BrokenSink),
            Severity::Debug,
        );
        let err = core.handle(&LogRecord::new(Severity::Info, "m")).unwrap_err();
        assert!(matches!(err, CoreError::Write { ref core, .. } if core == "file"));
    }

    #[test]
    fn test_tee_thresholds_are_independent() {
        let console = MemorySink::new();
        let file = MemorySink::new();
        let tee = Tee::new(vec![
            Arc::new(FilteredCore::new(
                "console",
                Box::new(ConsoleEncoder::new(false)),
                Arc::new(console.clone()),
                Severity::Info,
            )),
            Arc::new(json_core("file", &file, Severity::Debug)),
        ]);

        assert!(tee.handle(&LogRecord::new(Severity::Debug, "debug")).unwrap());
        assert!(tee.handle(&LogRecord::new(Severity::Info, "info")).unwrap());
        assert_eq!(console.len(), 1);
        assert_eq!(file.len(), 2);
    }

    #[test]
    fn test_tee_accepts_if_any_child_accepts() {
        let sink = MemorySink::new();
        let tee = Tee::new(vec![
            Arc::new(json_core("a", &sink, Severity::Error)),
            Arc::new(json_core("b", &sink, Severity::Info)),
        ]);
        assert!(tee.accepts(&LogRecord::new(Severity::Info, "m")));
        assert!(!tee.accepts(&LogRecord::new(Severity::Debug, "m")));
        assert!(!tee.enabled(Severity::Debug));
    }

    #[test]
    fn test_tee_failure_does_not_block_other_children() {
        let healthy = MemorySink::new();
        let tee = Tee::new(vec![
            Arc::new(FilteredCore::new(
                "broken",
                Box::new(JsonEncoder),
                Arc::new(BrokenSink),
                Severity::Debug,
            )),
            Arc::new(json_core("healthy", &healthy, Severity::Debug)),
        ]);
        let err = tee.handle(&LogRecord::new(Severity::Info, "m")).unwrap_err();
        assert!(matches!(err, CoreError::Write { .. }));
        assert_eq!(healthy.len(), 1);
    }

    #[test]
    fn test_tee_sync_collects_flush_errors() {
        let tee = Tee::new(vec![
            Arc::new(FilteredCore::new("a", Box::new(JsonEncoder), Arc::new(BrokenSink), Severity::Debug)),
            Arc::new(FilteredCore::new("b", Box::new(JsonEncoder), Arc::new(BrokenSink), Severity::Debug)),
        ]);
        let err = tee.sync().unwrap_err();
        assert!(matches!(err, CoreError::Multiple(ref errs) if errs.len() == 2));
    }

    #[test]
    fn test_empty_tee_writes_nothing() {
        let tee = Tee::default();
        assert!(tee.is_empty());
        assert!(!tee.handle(&LogRecord::new(Severity::Fatal, "m")).unwrap());
        assert!(tee.sync().is_ok());
    }
}
