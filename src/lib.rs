pub mod error;
pub mod record;
pub mod sink;
pub mod console_sink;
pub mod memory_sink;
pub mod noop_sink;
pub mod rotate;
pub mod encoder;
pub mod core;
pub mod sampler;
pub mod logger;
pub mod layer;
pub mod instrument;
pub mod destination;
pub mod config;
pub mod env;
pub mod init;

pub use config::PipelineConfig;
pub use init::{init_pipeline, init_pipeline_from_env, Pipeline, PipelineSinks};
pub use logger::Logger;
pub use record::{Field, LogRecord, Severity};
