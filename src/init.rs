use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use crate::config::PipelineConfig;
use crate::core::{Core, FilteredCore, Tee};
use crate::destination::{make_sink, parse_destination, DestinationKind, SinkRegistry};
use crate::encoder::EncoderKind;
use crate::env::config_from_env;
use crate::error::{ConfigError, ShutdownError};
use crate::instrument::RequestInstrumentation;
use crate::layer::PipelineLayer;
use crate::logger::Logger;
use crate::noop_sink::NoopSink;
use crate::record::{Field, Severity};
use crate::rotate::{RotatingFileSink, SinkConfig};
use crate::sampler::{Sampler, SamplerSnapshot, SamplingPolicy};
use crate::sink::LogSink;

/// Destinations a [`Pipeline`] writes to.
///
/// [`Pipeline::build`] opens them from config; [`Pipeline::build_with`]
/// takes them as given, which is how tests and embedders substitute
/// in-memory or failing sinks.
#[derive(Clone)]
pub struct PipelineSinks {
    pub console: Arc<dyn LogSink>,
    pub file: Arc<dyn LogSink>,
    pub error_output: Arc<dyn LogSink>,
}

impl Default for PipelineSinks {
    fn default() -> Self {
        Self {
            console: Arc::new(NoopSink),
            file: Arc::new(NoopSink),
            error_output: Arc::new(NoopSink),
        }
    }
}

/// The assembled logging pipeline.
///
/// Console core (human-readable) and file core (JSON lines) behind a
/// [`Tee`], each optionally wrapped in a [`Sampler`]. Built once at
/// startup; hand out [`Pipeline::logger`] clones to the rest of the
/// program and call [`Pipeline::shutdown`] before exiting.
pub struct Pipeline {
    logger: Logger,
    file: Option<Arc<RotatingFileSink>>,
    samplers: Vec<Arc<Sampler>>,
}

impl Pipeline {
    /// Validate `config`, open its destinations and assemble the cores.
    ///
    /// Destinations naming the same file share one rotating sink.
    ///
    /// **Errors**
    /// - any [`ConfigError`]; nothing is started in a degraded state.
    pub fn build(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut registry = SinkRegistry::new();
        let mut sinks = PipelineSinks::default();
        let mut file = None;
        if config.file.enabled {
            let rotating = registry.open(config.sink_config()?)?;
            sinks.file = rotating.clone();
            file = Some(rotating);
        }

        sinks.error_output = open_destination(&config.error_output.0, config, &mut registry)?;
        if config.console.enabled {
            sinks.console = open_destination(&config.console.destination, config, &mut registry)?;
        }

        let mut pipeline = Self::build_with(config, sinks)?;
        pipeline.file = file;
        Ok(pipeline)
    }

    /// Assemble the cores of `config` on top of the given sinks.
    pub fn build_with(config: &PipelineConfig, sinks: PipelineSinks) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut samplers = Vec::new();
        let mut tee = Tee::default();

        if config.console.enabled {
            let core = FilteredCore::new(
                "console",
                EncoderKind::Console.build(config.console.color),
                sinks.console,
                config.console.min_severity,
            );
            tee.push(sampled(
                Arc::new(core),
                config.console.sampled.then_some(config.console.sampling),
                &mut samplers,
            ));
        }

        if config.file.enabled {
            let core = FilteredCore::new(
                "file",
                EncoderKind::Json.build(false),
                sinks.file,
                config.file.min_severity,
            );
            tee.push(sampled(
                Arc::new(core),
                config.file.sampled.then_some(config.file.sampling),
                &mut samplers,
            ));
        }

        Ok(Self {
            logger: Logger::new(Arc::new(tee), sinks.error_output),
            file: None,
            samplers,
        })
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Whether a record of `severity` would reach any destination.
    pub fn enabled(&self, severity: Severity) -> bool {
        self.logger.enabled(severity)
    }

    /// Request instrumentation emitting through this pipeline.
    pub fn instrumentation(&self) -> RequestInstrumentation {
        RequestInstrumentation::new(self.logger.clone())
    }

    /// `tracing_subscriber` layer feeding `tracing` events into this
    /// pipeline.
    pub fn layer(&self) -> PipelineLayer {
        PipelineLayer::new(self.logger.clone())
    }

    /// Install [`Pipeline::layer`] as the process-wide `tracing`
    /// subscriber.
    pub fn install_global(&self) -> Result<(), ConfigError> {
        let subscriber = Registry::default().with(self.layer());
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|_| ConfigError::SubscriberAlreadySet)
    }

    /// The rotating sink behind the file core, when opened by
    /// [`Pipeline::build`].
    pub fn file_sink(&self) -> Option<&Arc<RotatingFileSink>> {
        self.file.as_ref()
    }

    /// Sampled/dropped counters per sampled core.
    pub fn sampler_stats(&self) -> Vec<(String, SamplerSnapshot)> {
        self.samplers
            .iter()
            .map(|s| (s.name().to_string(), s.stats()))
            .collect()
    }

    /// Flush every destination.
    ///
    /// **Returns**
    /// - `Err(ShutdownError)` if buffered records could not be made
    ///   durable; hosts should exit with [`ShutdownError::exit_code`].
    pub fn shutdown(self) -> Result<(), ShutdownError> {
        self.logger.sync()?;
        Ok(())
    }
}

fn sampled(
    core: Arc<dyn Core>,
    policy: Option<SamplingPolicy>,
    samplers: &mut Vec<Arc<Sampler>>,
) -> Arc<dyn Core> {
    match policy {
        Some(policy) => {
            let sampler = Arc::new(Sampler::new(core, policy));
            samplers.push(Arc::clone(&sampler));
            let core: Arc<dyn Core> = sampler;
            core
        }
        None => core,
    }
}

fn open_destination(
    value: &str,
    config: &PipelineConfig,
    registry: &mut SinkRegistry,
) -> Result<Arc<dyn LogSink>, ConfigError> {
    let dest = parse_destination(value)?;
    let rotation = match dest.kind {
        DestinationKind::File => config.sink_config()?,
        DestinationKind::Stdout | DestinationKind::Stderr => SinkConfig::default(),
    };
    make_sink(&dest, &rotation, registry)
}

/// Build a pipeline from `config` and install it as the global `tracing`
/// subscriber.
///
/// **Effects**
///
/// After this returns, `tracing::info!` and friends anywhere in the
/// process flow through the pipeline's tee. The returned [`Pipeline`]
/// must be kept and shut down before exit.
pub fn init_pipeline(config: &PipelineConfig) -> Result<Pipeline, ConfigError> {
    let pipeline = Pipeline::build(config)?;
    pipeline.install_global()?;
    pipeline.logger().debug(
        "logging pipeline started",
        [Field::display("file", config.file.path.display())],
    );
    Ok(pipeline)
}

/// Same as [`init_pipeline`] with configuration read from `LOG_*`
/// environment variables on top of the defaults.
pub fn init_pipeline_from_env() -> Result<Pipeline, ConfigError> {
    init_pipeline(&config_from_env()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tests::BrokenSink;
    use crate::memory_sink::MemorySink;
    use tempfile::TempDir;

    struct Captured {
        console: MemorySink,
        file: MemorySink,
        errors: MemorySink,
    }

    impl Captured {
        fn new() -> Self {
            Self {
                console: MemorySink::new(),
                file: MemorySink::new(),
                errors: MemorySink::new(),
            }
        }

        fn sinks(&self) -> PipelineSinks {
            PipelineSinks {
                console: Arc::new(self.console.clone()),
                file: Arc::new(self.file.clone()),
                error_output: Arc::new(self.errors.clone()),
            }
        }
    }

    fn plain_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.console.color = false;
        config
    }

    #[test]
    fn test_default_thresholds_per_core() {
        let out = Captured::new();
        let pipeline = Pipeline::build_with(&plain_config(), out.sinks()).unwrap();
        let logger = pipeline.logger();

        logger.debug("cache miss", [Field::str("key", "user:1")]);
        logger.info("user created", [Field::int("id", 1)]);

        assert_eq!(out.console.len(), 1);
        assert!(out.console.lines()[0].contains("\tINFO\t"));
        assert_eq!(out.file.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&out.file.lines()[0]).unwrap();
        assert_eq!(first["level"], "debug");
        assert!(pipeline.enabled(Severity::Debug));
    }

    #[test]
    fn test_only_file_core_is_sampled_by_default() {
        let mut config = plain_config();
        config.file.sampling.first = 2;
        config.file.sampling.thereafter = 1000;
        let out = Captured::new();
        let pipeline = Pipeline::build_with(&config, out.sinks()).unwrap();

        let at = chrono::Utc::now();
        for _ in 0..10 {
            pipeline
                .logger()
                .dispatch(&crate::record::LogRecord::new(Severity::Info, "same message").at(at));
        }

        assert_eq!(out.console.len(), 10);
        assert_eq!(out.file.len(), 2);
        let stats = pipeline.sampler_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].0, "sampled(file)");
        assert_eq!(stats[0].1.sampled, 2);
        assert_eq!(stats[0].1.dropped, 8);
    }

    #[test]
    fn test_disabled_cores_are_skipped() {
        let mut config = plain_config();
        config.console.enabled = false;
        let out = Captured::new();
        let pipeline = Pipeline::build_with(&config, out.sinks()).unwrap();
        pipeline.logger().error("boom", []);
        assert!(out.console.is_empty());
        assert_eq!(out.file.len(), 1);
    }

    #[test]
    fn test_shutdown_failure_is_reported() {
        let out = Captured::new();
        let sinks = PipelineSinks {
            file: Arc::new(BrokenSink),
            ..out.sinks()
        };
        let pipeline = Pipeline::build_with(&plain_config(), sinks).unwrap();
        pipeline.logger().info("lost", []);
        assert_eq!(out.console.len(), 1);
        assert_eq!(out.errors.len(), 1);

        let err = pipeline.shutdown().unwrap_err();
        assert!(err.to_string().contains("failed to flush"));
        assert_eq!(err.exit_code(), std::process::ExitCode::FAILURE);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = plain_config();
        config.file.max_size_mb = 0;
        assert!(matches!(
            Pipeline::build_with(&config, PipelineSinks::default()),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_build_opens_rotating_file() {
        let dir = TempDir::new().unwrap();
        let mut config = plain_config();
        config.console.destination = format!("file:{}", dir.path().join("console.log").display());
        config.file.path = dir.path().join("app.log");

        let pipeline = Pipeline::build(&config).unwrap();
        pipeline.logger().warn("disk almost full", [Field::uint("free_mb", 12)]);
        let file_sink = pipeline.file_sink().unwrap().clone();
        pipeline.shutdown().unwrap();

        assert!(file_sink.size() > 0);
        let json = std::fs::read_to_string(dir.path().join("app.log")).unwrap();
        let line: serde_json::Value = serde_json::from_str(json.trim_end()).unwrap();
        assert_eq!(line["free_mb"], 12);
        let console = std::fs::read_to_string(dir.path().join("console.log")).unwrap();
        assert!(console.contains("disk almost full\tfree_mb=12"));
    }

    #[test]
    fn test_console_sharing_file_path_rotates_through_one_sink() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let mut config = plain_config();
        config.file.path = path.clone();
        config.file.max_size_mb = 1;
        config.file.max_backups = 0;
        config.file.max_age_days = 0;
        config.file.compress = false;
        config.file.sampled = false;
        config.console.destination = format!("file:{}", path.display());

        let pipeline = Pipeline::build(&config).unwrap();
        let payload = "x".repeat(2000);
        for i in 0..2000u64 {
            pipeline
                .logger()
                .info("bulk", [Field::uint("i", i), Field::str("pad", payload.clone())]);
        }
        let sink = pipeline.file_sink().unwrap().clone();
        assert_eq!(pipeline.logger().stats().failed, 0);
        pipeline.shutdown().unwrap();

        let limit = 1024 * 1024;
        let mut lines = 0;
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let entry = entry.unwrap();
            let text = std::fs::read_to_string(entry.path()).unwrap();
            assert!(text.len() as u64 <= limit, "{} is over the limit", entry.path().display());
            lines += text.lines().count();
        }
        // One JSON and one console line per record.
        assert_eq!(lines, 4000);
        assert_eq!(sink.size(), std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_build_fails_for_unwritable_path() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let mut config = plain_config();
        config.console.enabled = false;
        config.file.path = blocker.join("app.log");
        assert!(matches!(Pipeline::build(&config), Err(ConfigError::Sink(_))));
    }

    #[test]
    fn test_request_instrumentation_uses_pipeline() {
        let out = Captured::new();
        let pipeline = Pipeline::build_with(&plain_config(), out.sinks()).unwrap();
        pipeline
            .instrumentation()
            .instrument_blocking("GET", "/ping", "127.0.0.1", || 200);
        let line: serde_json::Value = serde_json::from_str(&out.file.lines()[0]).unwrap();
        assert_eq!(line["msg"], "request");
        assert_eq!(line["path"], "/ping");
    }
}
