use std::time::Instant;

use async_rotating_log::emitter::{Overflow, QueuePolicy};
use async_rotating_log::env::{env_or, LOG_DIR_ENV};
use async_rotating_log::{fields, Logging, LoggingConfig};

#[tokio::main]
async fn main() {
    // Bounded queue that sheds load instead of growing, key=value output,
    // hourly files with a day of history.
    let config = LoggingConfig {
        log_file: Some("custom_load.log".into()),
        log_dir: Some(env_or(LOG_DIR_ENV, "logs").into()),
        json_formatter: false,
        log_when: "H".into(),
        backup_count: 24,
        queue: QueuePolicy::Bounded {
            capacity: 50_000,
            overflow: Overflow::DropNewest,
        },
        binding_dict: fields! {"service" => "custom_load"},
        ..LoggingConfig::default()
    };
    let logging = Logging::setup(config).expect("logging setup");
    let logger = logging.logger();

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        logger.error_with("custom load test error", fields! {"iteration" => i});
    }

    let elapsed = start.elapsed();
    println!(
        "custom config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    logging.flush();
    for (destination, stats) in logging.dispatcher().stats() {
        println!(
            "{destination}: written={} dropped_full={} failed={}",
            stats.written, stats.dropped_full, stats.failed_writes
        );
    }
    logging.shutdown().expect("drain log destinations");
}
