use crate::error::SinkError;
use crate::sink::LogSink;
use std::io::{self, Write};

/// Which standard stream a [`ConsoleSink`] writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Sink writing to the process's standard output or standard error.
///
/// Each payload is written under the stream's lock, so lines from
/// concurrent callers never interleave.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleSink {
    stream: Stream,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self {
            stream: Stream::Stdout,
        }
    }

    pub fn stderr() -> Self {
        Self {
            stream: Stream::Stderr,
        }
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }
}

impl LogSink for ConsoleSink {
    fn write(&self, buf: &[u8]) -> Result<(), SinkError> {
        match self.stream {
            Stream::Stdout => io::stdout().lock().write_all(buf)?,
            Stream::Stderr => io::stderr().lock().write_all(buf)?,
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        match self.stream {
            Stream::Stdout => io::stdout().lock().flush()?,
            Stream::Stderr => io::stderr().lock().flush()?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_sink_streams() {
        assert_eq!(ConsoleSink::stdout().stream(), Stream::Stdout);
        assert_eq!(ConsoleSink::stderr().stream(), Stream::Stderr);
    }

    #[test]
    fn test_console_sink_flush() {
        assert!(ConsoleSink::stderr().flush().is_ok());
    }
}
