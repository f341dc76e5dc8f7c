use std::io;
use std::path::PathBuf;

/// Errors raised while building the logging setup. All of them are fatal
/// to the setup call and are returned before any destination is attached.
#[derive(thiserror::Error, Debug)]
pub enum SetupError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("invalid rollover interval: {0}")]
    InvalidRotation(String),

    #[error("invalid log format: {0}")]
    InvalidFormat(String),

    #[error("failed to install global tracing subscriber: {0}")]
    Subscriber(String),

    #[error(transparent)]
    Emitter(#[from] EmitterError),
}

/// Failure reported by a [`LogSink`](crate::sink::LogSink).
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    /// A single record could not be written. The record is dropped and the
    /// worker keeps going.
    #[error("write failed: {0}")]
    Write(#[from] io::Error),

    /// A single record could not be rendered. Dropped like a write failure.
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// The rotated file could not be reopened. The destination is dead.
    #[error("failed to reopen {path} after rollover: {source}")]
    Rollover {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SinkError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::Rollover { .. })
    }
}

/// Error surfaced by [`AsyncEmitter::close`](crate::emitter::AsyncEmitter::close).
#[derive(thiserror::Error, Debug)]
pub enum EmitterError {
    #[error("destination {name} stopped: {source}")]
    Destination {
        name: String,
        #[source]
        source: SinkError,
    },

    #[error("writer thread for {0} panicked")]
    WorkerPanicked(String),

    #[error("failed to spawn writer thread for {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}
