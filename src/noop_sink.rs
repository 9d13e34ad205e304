use crate::error::SinkError;
use crate::sink::LogSink;

/// A sink that simply drops all bytes.
///
/// Useful for measuring the overhead of encoding and fan-out without
/// any I/O, and for tests that don't care about output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl LogSink for NoopSink {
    fn write(&self, _buf: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }
}
