use std::process::ExitCode;
use std::time::Instant;
use tracing::{debug, error, info};

use tracing_tee_sink::init_pipeline_from_env;

fn main() -> ExitCode {
    // LOG_FILE_PATH, LOG_CONSOLE_LEVEL, ... tune the pipeline.
    let pipeline = match init_pipeline_from_env() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("failed to start logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let n: u64 = 100_000;
    let start = Instant::now();

    info!(events = n, "tracing bridge load test started");
    for i in 0..n {
        // Identical messages: the file core keeps 100 per second, then every 100th.
        debug!(iteration = i, "cache refresh");
    }
    error!(reason = "synthetic", "tracing bridge load test error");

    let elapsed = start.elapsed();
    println!(
        "tracing bridge: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    match pipeline.shutdown() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}
