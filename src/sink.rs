use crate::error::SinkError;

/// Byte-level destination for encoded log lines.
///
/// Implementations own a concrete output (a rotating file, stdout, an
/// in-memory buffer, etc). Cores call `write` once per accepted record
/// with the complete encoded line, so an implementation must write the
/// whole payload as one unit and serialize concurrent callers itself.
pub trait LogSink: Send + Sync {
    /// Append one encoded record.
    ///
    /// **Parameters**
    /// - `buf`: a complete encoded record, newline included.
    ///
    /// **Returns**
    /// - `Ok(())` if the bytes reached the destination.
    /// - `Err(..)` if the destination failed (I/O error, failed rotation,
    ///   oversized payload). The core reports this as degraded logging;
    ///   it never reaches application code.
    fn write(&self, buf: &[u8]) -> Result<(), SinkError>;

    /// Push any buffered bytes to durable storage.
    ///
    /// **Returns**
    /// - `Ok(())` once everything written so far is durable.
    /// - `Err(..)` if the destination could not be synced. At shutdown
    ///   this is fatal for the host process.
    ///
    /// Default implementation is a no-op.
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
