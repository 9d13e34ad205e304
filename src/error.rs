use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Error returned by a [`LogSink`](crate::sink::LogSink) write or flush.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("write of {len} bytes exceeds maximum file size {max}")]
    PayloadTooLarge { len: usize, max: u64 },

    #[error("failed to rotate {}: {source}", .path.display())]
    Rotate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to compress backup {}: {source}", .path.display())]
    Compress {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Stream(#[from] io::Error),
}

/// Error surfaced by a [`Core`](crate::core::Core) while handling a record.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("core {core:?} failed to write: {source}")]
    Write {
        core: String,
        #[source]
        source: SinkError,
    },

    #[error("core {core:?} failed to flush: {source}")]
    Flush {
        core: String,
        #[source]
        source: SinkError,
    },

    #[error("{} cores failed: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<CoreError>),
}

impl CoreError {
    /// Fold a list of child errors into a single error, if any.
    pub fn combine(mut errors: Vec<CoreError>) -> Option<CoreError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(CoreError::Multiple(errors)),
        }
    }
}

fn join_errors(errors: &[CoreError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error raised while building a pipeline from configuration.
///
/// These are fatal at startup: a misconfigured pipeline is rejected
/// instead of being started in a degraded state.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("log file path must not be empty")]
    EmptyPath,

    #[error("invalid value for {name}: {value}")]
    InvalidThreshold { name: &'static str, value: String },

    #[error("unknown severity {0:?}")]
    InvalidSeverity(String),

    #[error("unknown or unsupported destination {0:?}")]
    InvalidDestination(String),

    #[error("invalid environment variable {key}={value:?}")]
    Env { key: &'static str, value: String },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to prepare {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open log destination: {0}")]
    Sink(#[from] SinkError),

    #[error("a global tracing subscriber is already installed")]
    SubscriberAlreadySet,
}

/// Final flush at shutdown failed; buffered log data may be lost.
#[derive(thiserror::Error, Debug)]
#[error("failed to flush logs at shutdown: {0}")]
pub struct ShutdownError(#[from] pub CoreError);

impl ShutdownError {
    /// Process exit code a host should return after a failed shutdown.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_error(core: &str) -> CoreError {
        CoreError::Write {
            core: core.to_string(),
            source: SinkError::PayloadTooLarge { len: 10, max: 5 },
        }
    }

    #[test]
    fn test_combine_empty_is_none() {
        assert!(CoreError::combine(Vec::new()).is_none());
    }

    #[test]
    fn test_combine_single_is_unwrapped() {
        let err = CoreError::combine(vec![write_error("file")]).unwrap();
        assert!(matches!(err, CoreError::Write { .. }));
    }

    #[test]
    fn test_combine_many_lists_every_child() {
        let err = CoreError::combine(vec![write_error("file"), write_error("console")]).unwrap();
        let text = err.to_string();
        assert!(text.starts_with("2 cores failed"));
        assert!(text.contains("\"file\""));
        assert!(text.contains("\"console\""));
    }

    #[test]
    fn test_payload_too_large_message() {
        let err = SinkError::PayloadTooLarge { len: 10, max: 5 };
        assert_eq!(err.to_string(), "write of 10 bytes exceeds maximum file size 5");
    }
}
