use std::time::Instant;
use tracing::error;

use async_rotating_log::env::{env_or, LOG_DIR_ENV, LOG_FILE_ENV};
use async_rotating_log::{Logging, LoggingConfig};

#[tokio::main]
async fn main() {
    let config = LoggingConfig {
        log_file: Some(env_or(LOG_FILE_ENV, "default_load.log")),
        log_dir: Some(env_or(LOG_DIR_ENV, "logs").into()),
        ..LoggingConfig::default()
    };
    let logging = Logging::setup(config).expect("logging setup");
    logging.install_tracing().expect("tracing subscriber");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!(
        "default config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    let drain = Instant::now();
    logging.shutdown().expect("drain log destinations");
    println!("drained to disk in {:?}", drain.elapsed());
}
