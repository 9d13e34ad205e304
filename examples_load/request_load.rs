use async_trait::async_trait;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};

use tracing_tee_sink::instrument::UnitOfWork;
use tracing_tee_sink::noop_sink::NoopSink;
use tracing_tee_sink::{Field, Pipeline, PipelineConfig, PipelineSinks};

struct Ping {
    id: u64,
}

#[async_trait]
impl UnitOfWork for Ping {
    fn method(&self) -> &str {
        "GET"
    }

    fn path(&self) -> &str {
        "/ping"
    }

    fn client_address(&self) -> String {
        format!("10.0.{}.{}", self.id / 256 % 256, self.id % 256)
    }

    async fn invoke(&mut self) -> u16 {
        sleep(Duration::from_micros(50)).await;
        if self.id % 97 == 0 {
            500
        } else {
            200
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let mut config = PipelineConfig::default();
    config.console.enabled = false;
    config.file.path = std::env::temp_dir().join("request_load.log");

    // Encoding, sampling and fan-out only; swap in `Pipeline::build` to
    // include the rotating file.
    let sinks = PipelineSinks {
        file: Arc::new(NoopSink),
        ..PipelineSinks::default()
    };
    let pipeline = match Pipeline::build_with(&config, sinks) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("invalid logging config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let tasks: u64 = 8;
    let per_task: u64 = 10_000;
    let start = Instant::now();

    let mut handles = Vec::new();
    for t in 0..tasks {
        let hook = pipeline.instrumentation();
        let logger = pipeline.logger().named("worker");
        handles.push(tokio::spawn(async move {
            for i in 0..per_task {
                let mut work = Ping { id: t * per_task + i };
                if hook.instrument(&mut work).await >= 500 {
                    logger.error("request failed", [Field::uint("id", work.id)]);
                }
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }

    let elapsed = start.elapsed();
    let n = tasks * per_task;
    println!(
        "request load: {} requests in {:?} (~{:.0} req/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );
    println!("logger: {:?}", pipeline.logger().stats());
    for (core, stats) in pipeline.sampler_stats() {
        println!("sampler {core}: sampled={} dropped={}", stats.sampled, stats.dropped);
    }

    match pipeline.shutdown() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}
