//! Environment variable overrides for [`PipelineConfig`].
//!
//! These are purely helpers for services that configure logging from
//! their deployment environment; the pipeline types themselves never
//! read the environment.

use std::str::FromStr;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::record::Severity;

/// Active log file path, e.g. `/var/log/svc/app.log`.
pub const LOG_FILE_PATH_ENV: &str = "LOG_FILE_PATH";

/// Rotation threshold in megabytes.
pub const LOG_FILE_MAX_SIZE_MB_ENV: &str = "LOG_FILE_MAX_SIZE_MB";

/// Number of rotated backups to keep, `0` keeps all.
pub const LOG_FILE_MAX_BACKUPS_ENV: &str = "LOG_FILE_MAX_BACKUPS";

/// Maximum backup age in days, `0` disables age pruning.
pub const LOG_FILE_MAX_AGE_DAYS_ENV: &str = "LOG_FILE_MAX_AGE_DAYS";

/// `true` / `false`: gzip rotated backups.
pub const LOG_FILE_COMPRESS_ENV: &str = "LOG_FILE_COMPRESS";

/// Minimum severity of the file core.
pub const LOG_FILE_LEVEL_ENV: &str = "LOG_FILE_LEVEL";

/// Minimum severity of the console core.
pub const LOG_CONSOLE_LEVEL_ENV: &str = "LOG_CONSOLE_LEVEL";

/// Sampling tick of the file core in milliseconds.
pub const LOG_SAMPLE_TICK_MS_ENV: &str = "LOG_SAMPLE_TICK_MS";

/// Records per key and tick that always pass the file sampler.
pub const LOG_SAMPLE_FIRST_ENV: &str = "LOG_SAMPLE_FIRST";

/// After `first`, every n-th record per key and tick passes.
pub const LOG_SAMPLE_THEREAFTER_ENV: &str = "LOG_SAMPLE_THEREAFTER";

/// Optional TOML file loaded before the other overrides are applied.
pub const LOG_CONFIG_PATH_ENV: &str = "LOG_CONFIG_PATH";

/// Build a configuration from the process environment: the file named by
/// `LOG_CONFIG_PATH` (or the defaults), then the `LOG_*` overrides.
pub fn config_from_env() -> Result<PipelineConfig, ConfigError> {
    let base = match std::env::var(LOG_CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => PipelineConfig::from_toml_file(path.trim())?,
        _ => PipelineConfig::default(),
    };
    apply_env(base)
}

/// Apply `LOG_*` variables from the process environment on top of
/// `config` and validate the result.
pub fn apply_env(config: PipelineConfig) -> Result<PipelineConfig, ConfigError> {
    apply_overrides(config, |key| std::env::var(key).ok())
}

/// Same as [`apply_env`], reading variables through `lookup`.
///
/// Unset or empty variables leave the corresponding setting untouched.
/// A variable that does not parse fails with [`ConfigError::Env`].
pub fn apply_overrides<F>(mut config: PipelineConfig, lookup: F) -> Result<PipelineConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(path) = get(LOG_FILE_PATH_ENV) {
        config.file.path = path.into();
    }
    if let Some(v) = parse_var(&get, LOG_FILE_MAX_SIZE_MB_ENV)? {
        config.file.max_size_mb = v;
    }
    if let Some(v) = parse_var(&get, LOG_FILE_MAX_BACKUPS_ENV)? {
        config.file.max_backups = v;
    }
    if let Some(v) = parse_var(&get, LOG_FILE_MAX_AGE_DAYS_ENV)? {
        config.file.max_age_days = v;
    }
    if let Some(v) = parse_var(&get, LOG_FILE_COMPRESS_ENV)? {
        config.file.compress = v;
    }
    if let Some(v) = parse_var::<Severity, _>(&get, LOG_FILE_LEVEL_ENV)? {
        config.file.min_severity = v;
    }
    if let Some(v) = parse_var::<Severity, _>(&get, LOG_CONSOLE_LEVEL_ENV)? {
        config.console.min_severity = v;
    }
    if let Some(v) = parse_var(&get, LOG_SAMPLE_TICK_MS_ENV)? {
        config.file.sampling.tick = Duration::from_millis(v);
    }
    if let Some(v) = parse_var(&get, LOG_SAMPLE_FIRST_ENV)? {
        config.file.sampling.first = v;
    }
    if let Some(v) = parse_var(&get, LOG_SAMPLE_THEREAFTER_ENV)? {
        config.file.sampling.thereafter = v;
    }

    config.validate()?;
    Ok(config)
}

fn parse_var<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { key, value: raw }),
    }
}
