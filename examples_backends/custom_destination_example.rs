use std::io::{self, Write};
use std::sync::Arc;

use async_rotating_log::destination::DestinationKey;
use async_rotating_log::emitter::{AsyncEmitter, QueuePolicy};
use async_rotating_log::render::Formatter;
use async_rotating_log::sink::LogSink;
use async_rotating_log::{fields, Dispatcher, SinkError};

/// Example of plugging in a destination this crate does not ship by
/// implementing `LogSink` directly. Imagine this forwards to some
/// proprietary collector; here it just prefixes each line.
struct MyCollectorSink {
    out: io::Stdout,
}

impl LogSink for MyCollectorSink {
    fn write(&mut self, record: &[u8]) -> Result<(), SinkError> {
        let mut out = self.out.lock();
        out.write_all(b"[my-collector] ")?;
        out.write_all(record)?;
        out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

fn main() {
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher
        .attach(DestinationKey::Custom("my-collector".into()), || {
            let sink = MyCollectorSink { out: io::stdout() };
            AsyncEmitter::spawn("my-collector", sink, Formatter::key_value(), QueuePolicy::Unbounded)
        })
        .expect("attach destination");

    let logger = dispatcher.logger("custom").bind(fields! {"collector" => "my-collector"});
    logger.info("custom destination example started");
    logger.error_with("simulated error sent via custom destination", fields! {"retry" => false});

    dispatcher.close().expect("drain destination");
}
