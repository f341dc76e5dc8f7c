use serde::{Deserialize, Serialize};
use std::io::{self, Write};

use crate::error::SinkError;
use crate::sink::LogSink;

/// Which standard stream a console destination writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleStream {
    Stdout,
    #[default]
    Stderr,
}

impl ConsoleStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleStream::Stdout => "stdout",
            ConsoleStream::Stderr => "stderr",
        }
    }
}

/// Line-buffered console sink: every record is written and flushed as one line.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleSink {
    stream: ConsoleStream,
}

impl ConsoleSink {
    pub fn new(stream: ConsoleStream) -> Self {
        Self { stream }
    }

    pub fn stream(&self) -> ConsoleStream {
        self.stream
    }
}

fn write_line(out: &mut impl Write, record: &[u8]) -> io::Result<()> {
    out.write_all(record)?;
    out.write_all(b"\n")?;
    out.flush()
}

impl LogSink for ConsoleSink {
    fn write(&mut self, record: &[u8]) -> Result<(), SinkError> {
        match self.stream {
            ConsoleStream::Stdout => write_line(&mut io::stdout().lock(), record)?,
            ConsoleStream::Stderr => write_line(&mut io::stderr().lock(), record)?,
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        match self.stream {
            ConsoleStream::Stdout => io::stdout().flush()?,
            ConsoleStream::Stderr => io::stderr().flush()?,
        }
        Ok(())
    }
}
