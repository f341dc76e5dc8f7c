use crate::error::SinkError;

/// Blocking destination for rendered records.
///
/// A sink is moved into the writer thread of an
/// [`AsyncEmitter`](crate::emitter::AsyncEmitter) and is only ever touched
/// from there, so implementations may keep plain mutable state (open file
/// handles, rollover deadlines) without locking.
///
/// **Errors**
/// - [`SinkError::Write`]: the record is dropped, the writer keeps going.
/// - [`SinkError::Rollover`] (or any error for which
///   [`SinkError::is_fatal`] is true): the writer stops delivering to this
///   sink and reports the error from `close()`.
pub trait LogSink: Send + 'static {
    /// Write one rendered record. `record` carries no trailing newline;
    /// line-oriented sinks add their own terminator.
    fn write(&mut self, record: &[u8]) -> Result<(), SinkError>;

    /// Flush buffered output. Default implementation is a no-op.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: LogSink + ?Sized> LogSink for Box<S> {
    fn write(&mut self, record: &[u8]) -> Result<(), SinkError> {
        (**self).write(record)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}
