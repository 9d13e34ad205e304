use crate::error::SinkError;
use crate::sink::LogSink;
use std::sync::{Arc, Mutex, MutexGuard};

/// Sink that keeps every write in memory.
///
/// Clones share the same buffer, so one handle can be given to a core
/// while another is kept to inspect what was written.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        // A panicked writer cannot leave a half-pushed entry behind.
        self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Each write as a UTF-8 string (lossy), newline kept.
    pub fn lines(&self) -> Vec<String> {
        self.guard()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    pub fn clear(&self) {
        self.guard().clear();
    }
}

impl LogSink for MemorySink {
    fn write(&self, buf: &[u8]) -> Result<(), SinkError> {
        self.guard().push(buf.to_vec());
        Ok(())
    }
}
