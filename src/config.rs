use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::destination::parse_destination;
use crate::error::ConfigError;
use crate::record::Severity;
use crate::rotate::SinkConfig;
use crate::sampler::SamplingPolicy;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Largest accepted `max_age_days`, about a thousand years.
pub const MAX_AGE_DAYS: u64 = 365_000;

/// Settings for the machine-readable file core.
///
/// **Fields**
/// - `path`: active log file; rotated backups are written next to it.
/// - `max_size_mb`: rotate before the active file would exceed this size.
/// - `max_backups`: backups to keep, `0` keeps all.
/// - `max_age_days`: remove backups older than this, `0` keeps them forever.
/// - `compress`: gzip rotated backups.
/// - `sampled` / `sampling`: whether and how repeated records are sampled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub max_size_mb: u64,
    pub max_backups: usize,
    pub max_age_days: u64,
    pub compress: bool,
    pub min_severity: Severity,
    pub sampled: bool,
    pub sampling: SamplingPolicy,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("./app.log"),
            max_size_mb: 5,
            max_backups: 3,
            max_age_days: 28,
            compress: true,
            min_severity: Severity::Debug,
            sampled: true,
            sampling: SamplingPolicy::default(),
        }
    }
}

/// Settings for the human-readable console core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    /// `stdout`, `stderr` or `file:<path>`.
    pub destination: String,
    pub min_severity: Severity,
    pub color: bool,
    pub sampled: bool,
    pub sampling: SamplingPolicy,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            destination: "stdout".to_string(),
            min_severity: Severity::Info,
            color: true,
            sampled: false,
            sampling: SamplingPolicy::default(),
        }
    }
}

/// Full pipeline configuration.
///
/// Defaults reproduce the usual service setup: colored `info` console
/// output plus a sampled `debug` JSON file rotated at 5 MB, three gzip
/// backups kept for at most 28 days.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub file: FileConfig,
    pub console: ConsoleConfig,
    /// Where the pipeline reports its own write failures.
    pub error_output: ErrorOutput,
}

/// Destination string for internal failure reports, `stderr` by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorOutput(pub String);

impl Default for ErrorOutput {
    fn default() -> Self {
        Self("stderr".to_string())
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject configurations that cannot produce a working pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file.enabled {
            if self.file.path.as_os_str().is_empty() {
                return Err(ConfigError::EmptyPath);
            }
            self.max_size_bytes()?;
            if self.file.max_age_days > MAX_AGE_DAYS {
                return Err(ConfigError::InvalidThreshold {
                    name: "max_age_days",
                    value: self.file.max_age_days.to_string(),
                });
            }
            if self.file.sampled {
                validate_sampling(&self.file.sampling)?;
            }
        }
        if self.console.enabled {
            parse_destination(&self.console.destination)?;
            if self.console.sampled {
                validate_sampling(&self.console.sampling)?;
            }
        }
        parse_destination(&self.error_output.0)?;
        Ok(())
    }

    fn max_size_bytes(&self) -> Result<u64, ConfigError> {
        let mb = self.file.max_size_mb;
        if mb == 0 {
            return Err(ConfigError::InvalidThreshold {
                name: "max_size_mb",
                value: mb.to_string(),
            });
        }
        mb.checked_mul(BYTES_PER_MB)
            .ok_or_else(|| ConfigError::InvalidThreshold {
                name: "max_size_mb",
                value: mb.to_string(),
            })
    }

    /// Rotation settings for the file core.
    pub fn sink_config(&self) -> Result<SinkConfig, ConfigError> {
        Ok(SinkConfig {
            path: self.file.path.clone(),
            max_size_bytes: self.max_size_bytes()?,
            max_backups: self.file.max_backups,
            max_age_days: self.file.max_age_days,
            compress_backups: self.file.compress,
        })
    }
}

fn validate_sampling(policy: &SamplingPolicy) -> Result<(), ConfigError> {
    if policy.tick.is_zero() {
        return Err(ConfigError::InvalidThreshold {
            name: "sampling.tick_ms",
            value: "0".to_string(),
        });
    }
    if policy.thereafter == 0 {
        return Err(ConfigError::InvalidThreshold {
            name: "sampling.thereafter",
            value: "0".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.file.path, PathBuf::from("./app.log"));
        assert_eq!(config.file.max_size_mb, 5);
        assert_eq!(config.file.max_backups, 3);
        assert_eq!(config.file.max_age_days, 28);
        assert!(config.file.compress);
        assert_eq!(config.file.min_severity, Severity::Debug);
        assert!(config.file.sampled);
        assert_eq!(config.console.min_severity, Severity::Info);
        assert!(!config.console.sampled);
        assert_eq!(config.error_output.0, "stderr");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sink_config_in_bytes() {
        let sink = PipelineConfig::default().sink_config().unwrap();
        assert_eq!(sink.max_size_bytes, 5 * 1024 * 1024);
        assert!(sink.compress_backups);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = PipelineConfig::from_toml_str(
            r#"
            error_output = "file:./errors.log"

            [file]
            path = "/var/log/svc/app.log"
            max_size_mb = 50
            min_severity = "info"
            sampling = { tick_ms = 500, first = 2, thereafter = 3 }

            [console]
            min_severity = "warn"
            color = false
            "#,
        )
        .unwrap();

        assert_eq!(config.file.path, PathBuf::from("/var/log/svc/app.log"));
        assert_eq!(config.file.max_size_mb, 50);
        assert_eq!(config.file.max_backups, 3);
        assert_eq!(config.file.min_severity, Severity::Info);
        assert_eq!(config.file.sampling.tick, Duration::from_millis(500));
        assert_eq!(config.file.sampling.first, 2);
        assert_eq!(config.console.min_severity, Severity::Warn);
        assert!(!config.console.color);
        assert_eq!(config.error_output.0, "file:./errors.log");
    }

    #[test]
    fn test_rejects_bad_severity() {
        let err = PipelineConfig::from_toml_str("[console]\nmin_severity = \"loud\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_rejects_zero_size() {
        let err = PipelineConfig::from_toml_str("[file]\nmax_size_mb = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold { name: "max_size_mb", .. }));
    }

    #[test]
    fn test_rejects_unrepresentable_age_limit() {
        let mut config = PipelineConfig::default();
        config.file.max_age_days = u64::MAX / 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold { name: "max_age_days", .. })
        ));
        config.file.max_age_days = MAX_AGE_DAYS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_path() {
        let err = PipelineConfig::from_toml_str("[file]\npath = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPath));
    }

    #[test]
    fn test_disabled_file_skips_file_checks() {
        let config = PipelineConfig::from_toml_str("[file]\nenabled = false\npath = \"\"\n").unwrap();
        assert!(!config.file.enabled);
    }

    #[test]
    fn test_rejects_zero_thereafter() {
        let err = PipelineConfig::from_toml_str("[file.sampling]\nthereafter = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidThreshold { name: "sampling.thereafter", .. }
        ));
    }

    #[test]
    fn test_unsampled_core_ignores_sampling_values() {
        let config =
            PipelineConfig::from_toml_str("[console.sampling]\nthereafter = 0\n").unwrap();
        assert!(!config.console.sampled);
    }

    #[test]
    fn test_rejects_unknown_console_destination() {
        let err = PipelineConfig::from_toml_str("[console]\ndestination = \"syslog\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDestination(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = PipelineConfig::from_toml_file("/nonexistent/pipeline.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
