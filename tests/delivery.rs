use async_rotating_log::clock::ManualClock;
use async_rotating_log::emitter::{AsyncEmitter, QueuePolicy, Record};
use async_rotating_log::file::TimedRotatingFile;
use async_rotating_log::pipeline::Pipeline;
use async_rotating_log::render::Formatter;
use async_rotating_log::rollover::RolloverSchedule;
use async_rotating_log::sink::LogSink;
use async_rotating_log::{fields, Dispatcher, EmitterError, Fields, Level, LogEvent, Logging, LoggingConfig, SinkError};
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

fn record(msg: &str) -> Record {
    let event = LogEvent::new(Level::Info, "test", msg, Fields::new());
    Arc::new(Pipeline::default().run(event, &Fields::new()))
}

fn message_only() -> Formatter {
    Formatter::plain("%(message)s").unwrap()
}

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn file_config(dir: &Path, file: &str) -> LoggingConfig {
    LoggingConfig {
        log_file: Some(file.to_string()),
        log_dir: Some(dir.to_path_buf()),
        log_level: Some("WARNING".into()),
        utc: true,
        ..LoggingConfig::default()
    }
}

#[test]
fn concurrent_producers_keep_per_producer_order() {
    let dir = tempfile::tempdir().unwrap();
    let logging = Logging::setup_with(Arc::new(Dispatcher::new()), file_config(dir.path(), "fifo.log")).unwrap();

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let logger = logging.logger().bind(fields! {"producer" => p});
            thread::spawn(move || {
                for seq in 0..250 {
                    logger.warning_with("tick", fields! {"seq" => seq});
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    logging.flush();

    let content = fs::read_to_string(logging.log_file().unwrap()).unwrap();
    let mut next = [0u64; 4];
    let mut total = 0;
    for line in content.lines() {
        let record: serde_json::Value = serde_json::from_str(line).unwrap();
        let p = record["producer"].as_u64().unwrap() as usize;
        assert_eq!(record["seq"].as_u64().unwrap(), next[p], "producer {p} out of order");
        next[p] += 1;
        total += 1;
    }
    assert_eq!(total, 1000);
    assert_eq!(next, [250; 4]);
}

#[test]
fn single_producer_order_is_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ordered.log");
    let schedule = RolloverSchedule::parse("D", 1, true).unwrap();
    let sink = TimedRotatingFile::open(&path, schedule, 0).unwrap();
    let emitter = AsyncEmitter::spawn("ordered", sink, message_only(), QueuePolicy::Unbounded).unwrap();
    for i in 0..1000 {
        emitter.emit(record(&i.to_string()));
    }
    emitter.close().unwrap();

    let got: Vec<String> = fs::read_to_string(&path).unwrap().lines().map(str::to_string).collect();
    let want: Vec<String> = (0..1000).map(|i| i.to_string()).collect();
    assert_eq!(got, want);
}

/// Fails every write while `broken` is set.
struct Flaky {
    broken: Arc<Mutex<bool>>,
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogSink for Flaky {
    fn write(&mut self, record: &[u8]) -> Result<(), SinkError> {
        if *self.broken.lock().unwrap() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only").into());
        }
        self.lines.lock().unwrap().push(String::from_utf8_lossy(record).into_owned());
        Ok(())
    }
}

#[test]
fn failed_write_does_not_stop_the_writer() {
    let broken = Arc::new(Mutex::new(false));
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Flaky { broken: Arc::clone(&broken), lines: Arc::clone(&lines) };
    let emitter = AsyncEmitter::spawn("flaky", sink, message_only(), QueuePolicy::Unbounded).unwrap();

    emitter.emit(record("before"));
    emitter.flush();
    *broken.lock().unwrap() = true;
    emitter.emit(record("lost"));
    emitter.flush();
    *broken.lock().unwrap() = false;
    emitter.emit(record("after"));
    emitter.flush();

    assert_eq!(*lines.lock().unwrap(), vec!["before", "after"]);
    let stats = emitter.stats();
    assert_eq!(stats.failed_writes, 1);
    assert_eq!(stats.written, 2);
    assert!(!emitter.is_dead());
    emitter.close().unwrap();
}

#[test]
fn rollover_happens_on_the_writer_thread() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roll.log");
    let clock = ManualClock::new(at("2024-03-05T13:45:00Z"));
    let schedule = RolloverSchedule::parse("D", 1, true).unwrap();
    let sink = TimedRotatingFile::with_clock(&path, schedule, 0, clock.clone()).unwrap();
    let emitter = AsyncEmitter::spawn("roll", sink, message_only(), QueuePolicy::Unbounded).unwrap();

    emitter.emit(record("monday"));
    emitter.flush();
    clock.advance(Duration::days(1));
    emitter.emit(record("tuesday"));
    emitter.close().unwrap();

    assert_eq!(fs::read_to_string(dir.path().join("roll.log.2024-03-05")).unwrap(), "monday\n");
    assert_eq!(fs::read_to_string(&path).unwrap(), "tuesday\n");
}

#[test]
fn rollover_failure_is_surfaced_on_close() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("logs");
    fs::create_dir(&dir).unwrap();
    let clock = ManualClock::new(at("2024-03-05T10:00:00Z"));
    let schedule = RolloverSchedule::parse("H", 1, true).unwrap();
    let sink = TimedRotatingFile::with_clock(dir.join("app.log"), schedule, 0, clock.clone()).unwrap();
    let emitter = AsyncEmitter::spawn("doomed", sink, message_only(), QueuePolicy::Unbounded).unwrap();

    emitter.emit(record("ok"));
    emitter.flush();
    fs::remove_dir_all(&dir).unwrap();
    clock.advance(Duration::hours(2));
    emitter.emit(record("triggers rollover"));
    emitter.emit(record("after death"));
    emitter.flush();

    assert!(emitter.is_dead());
    assert_eq!(emitter.stats().dropped_dead, 1);
    match emitter.close() {
        Err(EmitterError::Destination { source, .. }) => assert!(source.is_fatal()),
        other => panic!("expected destination failure, got {other:?}"),
    }
}

#[tokio::test]
async fn emitting_inside_a_runtime_does_not_block() {
    let dir = tempfile::tempdir().unwrap();
    let logging = Logging::setup_with(Arc::new(Dispatcher::new()), file_config(dir.path(), "async.log")).unwrap();
    let logger = logging.logger();

    let handles: Vec<_> = (0..8)
        .map(|task| {
            let logger = logger.clone();
            tokio::spawn(async move {
                logger.warning_with("from task", fields! {"task" => task});
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let path = logging.log_file().unwrap().to_path_buf();
    tokio::task::spawn_blocking(move || logging.flush()).await.unwrap();
    assert_eq!(fs::read_to_string(path).unwrap().lines().count(), 8);
}
