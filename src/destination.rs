use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{env, fs};

use crate::console_sink::ConsoleSink;
use crate::error::ConfigError;
use crate::rotate::{RotatingFileSink, SinkConfig};
use crate::sink::LogSink;

/// Supported destination kinds that can be selected by name in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    Stdout,
    Stderr,
    File,
}

/// Parsed destination string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub kind: DestinationKind,
    /// Only set for [`DestinationKind::File`].
    pub path: Option<PathBuf>,
}

impl Destination {
    pub fn stdout() -> Self {
        Self {
            kind: DestinationKind::Stdout,
            path: None,
        }
    }

    pub fn stderr() -> Self {
        Self {
            kind: DestinationKind::Stderr,
            path: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: DestinationKind::File,
            path: Some(path.into()),
        }
    }
}

/// Parse a destination string.
///
/// Examples:
/// - "stdout"
/// - "stderr"
/// - "file:./logs/errors.log"
/// - "file:///var/log/app/errors.log"
pub fn parse_destination(value: &str) -> Result<Destination, ConfigError> {
    let trimmed = value.trim();
    let lower = trimmed.to_ascii_lowercase();

    if lower == "stdout" {
        Ok(Destination::stdout())
    } else if lower == "stderr" {
        Ok(Destination::stderr())
    } else if lower.starts_with("file://") {
        non_empty_file(&trimmed["file://".len()..], value)
    } else if lower.starts_with("file:") {
        non_empty_file(&trimmed["file:".len()..], value)
    } else {
        Err(ConfigError::InvalidDestination(value.to_string()))
    }
}

fn non_empty_file(path: &str, value: &str) -> Result<Destination, ConfigError> {
    if path.is_empty() {
        Err(ConfigError::InvalidDestination(value.to_string()))
    } else {
        Ok(Destination::file(path))
    }
}

/// Rotating sinks opened so far, keyed by resolved path.
///
/// Every destination naming the same file gets the same sink, so all
/// writes and rotations of that file go through one lock. The limits of
/// the first opener apply.
#[derive(Default)]
pub struct SinkRegistry {
    open: HashMap<PathBuf, Arc<RotatingFileSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the sink already open for `config.path`, or open it.
    pub fn open(&mut self, config: SinkConfig) -> Result<Arc<RotatingFileSink>, ConfigError> {
        if let Some(sink) = self.open.get(&resolve(&config.path)) {
            return Ok(Arc::clone(sink));
        }
        let sink = Arc::new(RotatingFileSink::open(config)?);
        // The file exists now, so this resolves through symlinks and `..`.
        self.open.insert(resolve(&sink.config().path), Arc::clone(&sink));
        Ok(sink)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

fn resolve(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| match env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    })
}

/// Create a concrete [`LogSink`] for a destination.
///
/// File destinations rotate with the limits in `rotation` (only its
/// `path` is replaced) and are shared through `registry`.
pub fn make_sink(
    dest: &Destination,
    rotation: &SinkConfig,
    registry: &mut SinkRegistry,
) -> Result<Arc<dyn LogSink>, ConfigError> {
    match dest.kind {
        DestinationKind::Stdout => Ok(Arc::new(ConsoleSink::stdout())),
        DestinationKind::Stderr => Ok(Arc::new(ConsoleSink::stderr())),
        DestinationKind::File => {
            let path = dest
                .path
                .clone()
                .ok_or_else(|| ConfigError::InvalidDestination("file:".to_string()))?;
            let config = SinkConfig {
                path,
                ..rotation.clone()
            };
            let sink = registry.open(config)?;
            Ok(sink)
        }
    }
}
