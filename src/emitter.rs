use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as ack, Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::{EmitterError, SinkError};
use crate::pipeline::EnrichedEvent;
use crate::render::Formatter;
use crate::sink::LogSink;

/// What gets queued: the enriched event, shared by every destination.
pub type Record = Arc<EnrichedEvent>;

/// What a bounded queue does with a record that does not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overflow {
    /// Drop the incoming record and count it.
    DropNewest,
    /// Wait up to `timeout_ms` for room, then drop and count.
    Block { timeout_ms: u64 },
}

/// Capacity of an emitter's pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueuePolicy {
    /// Never drops, never blocks, grows without limit under overload.
    #[default]
    Unbounded,
    Bounded { capacity: usize, overflow: Overflow },
}

/// Per-emitter counters, updated with relaxed atomics.
#[derive(Debug, Default)]
pub struct EmitterStats {
    /// Accepted into the queue.
    pub enqueued: AtomicU64,
    /// Written to the sink.
    pub written: AtomicU64,
    /// Rejected because the bounded queue was full.
    pub dropped_full: AtomicU64,
    /// Dequeued but failed to render or write.
    pub failed_writes: AtomicU64,
    /// Dequeued after the sink had failed fatally.
    pub dropped_dead: AtomicU64,
    /// Offered after `close()`.
    pub dropped_closed: AtomicU64,
    dead: AtomicBool,
}

/// Point-in-time copy of [`EmitterStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub written: u64,
    pub dropped_full: u64,
    pub failed_writes: u64,
    pub dropped_dead: u64,
    pub dropped_closed: u64,
}

impl EmitterStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            dropped_dead: self.dropped_dead.load(Ordering::Relaxed),
            dropped_closed: self.dropped_closed.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

enum Command {
    Record(Record),
    Flush(ack::SyncSender<()>),
}

enum Queue {
    Unbounded(mpsc::UnboundedSender<Command>),
    Bounded {
        tx: mpsc::Sender<Command>,
        overflow: Overflow,
    },
}

enum Inbox {
    Unbounded(mpsc::UnboundedReceiver<Command>),
    Bounded(mpsc::Receiver<Command>),
}

impl Inbox {
    fn blocking_recv(&mut self) -> Option<Command> {
        match self {
            Inbox::Unbounded(rx) => rx.blocking_recv(),
            Inbox::Bounded(rx) => rx.blocking_recv(),
        }
    }
}

/// Decouples `emit` from the blocking I/O of a [`LogSink`].
///
/// `spawn` moves the sink and its [`Formatter`] into a dedicated writer
/// thread that drains a FIFO queue. `emit` only enqueues. Records are
/// rendered and written on the writer thread; per-record failures are
/// counted and dropped, a fatal sink error stops delivery for good and is
/// returned by [`close`](Self::close).
pub struct AsyncEmitter {
    name: String,
    queue: RwLock<Option<Queue>>,
    worker: Mutex<Option<JoinHandle<Option<SinkError>>>>,
    stats: Arc<EmitterStats>,
}

impl AsyncEmitter {
    pub fn spawn<S: LogSink>(
        name: impl Into<String>,
        sink: S,
        formatter: Formatter,
        policy: QueuePolicy,
    ) -> Result<Self, EmitterError> {
        let name = name.into();
        let (queue, inbox) = match policy {
            QueuePolicy::Unbounded => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Queue::Unbounded(tx), Inbox::Unbounded(rx))
            }
            QueuePolicy::Bounded { capacity, overflow } => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (Queue::Bounded { tx, overflow }, Inbox::Bounded(rx))
            }
        };

        let stats = Arc::new(EmitterStats::default());
        let stats_bg = Arc::clone(&stats);
        let name_bg = name.clone();
        let worker = thread::Builder::new()
            .name(format!("log-writer:{name}"))
            .spawn(move || run_writer(sink, formatter, inbox, &stats_bg, &name_bg))
            .map_err(|source| EmitterError::Spawn {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            queue: RwLock::new(Some(queue)),
            worker: Mutex::new(Some(worker)),
            stats,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the sink has failed fatally.
    pub fn is_dead(&self) -> bool {
        self.stats.dead.load(Ordering::Relaxed)
    }

    /// Queue a record. Returns immediately unless the queue is bounded with
    /// [`Overflow::Block`] and full.
    pub fn emit(&self, record: Record) {
        let guard = self.queue.read().unwrap_or_else(PoisonError::into_inner);
        let Some(queue) = guard.as_ref() else {
            EmitterStats::bump(&self.stats.dropped_closed);
            return;
        };

        match queue {
            Queue::Unbounded(tx) => match tx.send(Command::Record(record)) {
                Ok(()) => EmitterStats::bump(&self.stats.enqueued),
                Err(_) => EmitterStats::bump(&self.stats.dropped_closed),
            },
            Queue::Bounded { tx, overflow } => self.offer(tx, *overflow, record),
        }
    }

    fn offer(&self, tx: &mpsc::Sender<Command>, overflow: Overflow, record: Record) {
        let deadline = match overflow {
            Overflow::DropNewest => None,
            Overflow::Block { timeout_ms } => Some(Instant::now() + Duration::from_millis(timeout_ms)),
        };
        let mut backoff = Duration::from_micros(50);
        let max_backoff = Duration::from_millis(5);
        let mut cmd = Command::Record(record);

        loop {
            match tx.try_send(cmd) {
                Ok(()) => {
                    EmitterStats::bump(&self.stats.enqueued);
                    return;
                }
                Err(TrySendError::Closed(_)) => {
                    EmitterStats::bump(&self.stats.dropped_closed);
                    return;
                }
                Err(TrySendError::Full(back)) => {
                    let now = Instant::now();
                    match deadline {
                        Some(deadline) if now < deadline => {
                            cmd = back;
                            thread::sleep(backoff.min(deadline - now));
                            backoff = std::cmp::min(backoff * 2, max_backoff);
                        }
                        _ => {
                            EmitterStats::bump(&self.stats.dropped_full);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Block until every record queued before this call has been handed to
    /// the sink and the sink has been flushed. Returns `false` once closed.
    ///
    /// Waits on a std channel, so it is safe to call from inside an async
    /// runtime, but it does block the calling thread.
    pub fn flush(&self) -> bool {
        let (ack_tx, ack_rx) = ack::sync_channel(1);
        let sent = {
            let guard = self.queue.read().unwrap_or_else(PoisonError::into_inner);
            match guard.as_ref() {
                None => false,
                Some(Queue::Unbounded(tx)) => tx.send(Command::Flush(ack_tx)).is_ok(),
                Some(Queue::Bounded { tx, .. }) => send_control(tx, Command::Flush(ack_tx)),
            }
        };
        sent && ack_rx.recv().is_ok()
    }

    /// Stop accepting records, drain what is queued, join the writer.
    ///
    /// Idempotent: later calls return `Ok(())`.
    pub fn close(&self) -> Result<(), EmitterError> {
        drop(
            self.queue
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return Ok(());
        };

        match worker.join() {
            Ok(None) => Ok(()),
            Ok(Some(source)) => Err(EmitterError::Destination {
                name: self.name.clone(),
                source,
            }),
            Err(_) => Err(EmitterError::WorkerPanicked(self.name.clone())),
        }
    }
}

impl Drop for AsyncEmitter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(destination = %self.name, error = %e, "log destination closed with error");
        }
    }
}

/// Control messages must not be dropped; wait for room instead.
fn send_control(tx: &mpsc::Sender<Command>, mut cmd: Command) -> bool {
    loop {
        match tx.try_send(cmd) {
            Ok(()) => return true,
            Err(TrySendError::Closed(_)) => return false,
            Err(TrySendError::Full(back)) => {
                cmd = back;
                thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

fn run_writer<S: LogSink>(
    mut sink: S,
    formatter: Formatter,
    mut inbox: Inbox,
    stats: &EmitterStats,
    name: &str,
) -> Option<SinkError> {
    let mut fatal: Option<SinkError> = None;

    while let Some(cmd) = inbox.blocking_recv() {
        match cmd {
            Command::Record(record) => {
                if fatal.is_some() {
                    EmitterStats::bump(&stats.dropped_dead);
                    continue;
                }
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    formatter.format(&record).and_then(|bytes| sink.write(&bytes))
                }));
                match result {
                    Ok(Ok(())) => EmitterStats::bump(&stats.written),
                    Ok(Err(e)) if e.is_fatal() => {
                        EmitterStats::bump(&stats.failed_writes);
                        stats.dead.store(true, Ordering::Relaxed);
                        tracing::error!(destination = %name, error = %e, "log destination failed, dropping further records");
                        fatal = Some(e);
                    }
                    Ok(Err(e)) => {
                        EmitterStats::bump(&stats.failed_writes);
                        tracing::warn!(destination = %name, error = %e, "dropping log record");
                    }
                    Err(_) => {
                        EmitterStats::bump(&stats.failed_writes);
                        tracing::warn!(destination = %name, "log sink panicked, dropping log record");
                    }
                }
            }
            Command::Flush(done) => {
                if fatal.is_none() {
                    if let Err(e) = sink.flush() {
                        tracing::warn!(destination = %name, error = %e, "failed to flush log destination");
                    }
                }
                let _ = done.send(());
            }
        }
    }

    if fatal.is_none() {
        if let Err(e) = sink.flush() {
            tracing::warn!(destination = %name, error = %e, "failed to flush log destination on close");
        }
    }
    fatal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::record::{Fields, Level, LogEvent};
    use std::io;

    #[derive(Clone, Default)]
    struct Collect {
        lines: Arc<Mutex<Vec<String>>>,
        fail_on: Option<usize>,
        calls: usize,
    }

    impl LogSink for Collect {
        fn write(&mut self, record: &[u8]) -> Result<(), SinkError> {
            self.calls += 1;
            if Some(self.calls) == self.fail_on {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full").into());
            }
            self.lines.lock().unwrap().push(String::from_utf8_lossy(record).into_owned());
            Ok(())
        }
    }

    fn record(msg: &str) -> Record {
        let event = LogEvent::new(Level::Info, "test", msg, Fields::new());
        Arc::new(Pipeline::default().run(event, &Fields::new()))
    }

    fn plain() -> Formatter {
        Formatter::plain("%(message)s").unwrap()
    }

    #[test]
    fn delivers_in_order_and_drains_on_close() {
        let sink = Collect::default();
        let lines = Arc::clone(&sink.lines);
        let emitter = AsyncEmitter::spawn("mem", sink, plain(), QueuePolicy::Unbounded).unwrap();
        for i in 0..100 {
            emitter.emit(record(&i.to_string()));
        }
        emitter.close().unwrap();

        let expected: Vec<String> = (0..100).map(|i| i.to_string()).collect();
        assert_eq!(*lines.lock().unwrap(), expected);
        assert_eq!(emitter.stats().written, 100);
    }

    #[test]
    fn write_failure_drops_single_record() {
        let sink = Collect { fail_on: Some(2), ..Collect::default() };
        let lines = Arc::clone(&sink.lines);
        let emitter = AsyncEmitter::spawn("mem", sink, plain(), QueuePolicy::Unbounded).unwrap();
        for msg in ["a", "b", "c"] {
            emitter.emit(record(msg));
        }
        assert!(emitter.flush());
        assert_eq!(*lines.lock().unwrap(), vec!["a", "c"]);
        let stats = emitter.stats();
        assert_eq!(stats.failed_writes, 1);
        assert_eq!(stats.written, 2);
        assert!(emitter.close().is_ok());
    }

    #[test]
    fn emit_after_close_is_counted_not_delivered() {
        let emitter = AsyncEmitter::spawn("mem", Collect::default(), plain(), QueuePolicy::Unbounded).unwrap();
        emitter.close().unwrap();
        emitter.emit(record("late"));
        assert!(!emitter.flush());
        assert_eq!(emitter.stats().dropped_closed, 1);
        assert!(emitter.close().is_ok());
    }

    struct Gate {
        open: Arc<(Mutex<bool>, std::sync::Condvar)>,
        inner: Collect,
    }

    impl LogSink for Gate {
        fn write(&mut self, record: &[u8]) -> Result<(), SinkError> {
            let (lock, cvar) = &*self.open;
            let mut open = lock.lock().unwrap();
            while !*open {
                open = cvar.wait(open).unwrap();
            }
            self.inner.write(record)
        }
    }

    #[test]
    fn bounded_queue_drops_newest_when_full() {
        let open = Arc::new((Mutex::new(false), std::sync::Condvar::new()));
        let inner = Collect::default();
        let lines = Arc::clone(&inner.lines);
        let sink = Gate { open: Arc::clone(&open), inner };
        let policy = QueuePolicy::Bounded { capacity: 2, overflow: Overflow::DropNewest };
        let emitter = AsyncEmitter::spawn("gated", sink, plain(), policy).unwrap();

        // The writer takes the first record and parks on the gate; two more
        // fill the queue and the rest are dropped.
        emitter.emit(record("0"));
        while emitter.stats().enqueued == 0 {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(50));
        for i in 1..10 {
            emitter.emit(record(&i.to_string()));
        }

        {
            let (lock, cvar) = &*open;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }
        emitter.close().unwrap();

        let stats = emitter.stats();
        assert_eq!(stats.enqueued + stats.dropped_full, 10);
        assert!(stats.dropped_full >= 1);
        assert_eq!(lines.lock().unwrap().first().map(String::as_str), Some("0"));
    }

    fn gated(capacity: usize, overflow: Overflow) -> (AsyncEmitter, Arc<(Mutex<bool>, std::sync::Condvar)>, Arc<Mutex<Vec<String>>>) {
        let open = Arc::new((Mutex::new(false), std::sync::Condvar::new()));
        let inner = Collect::default();
        let lines = Arc::clone(&inner.lines);
        let sink = Gate { open: Arc::clone(&open), inner };
        let emitter = AsyncEmitter::spawn("gated", sink, plain(), QueuePolicy::Bounded { capacity, overflow }).unwrap();
        // Park the writer on its first record.
        emitter.emit(record("parked"));
        thread::sleep(Duration::from_millis(50));
        (emitter, open, lines)
    }

    fn release(open: &(Mutex<bool>, std::sync::Condvar)) {
        let (lock, cvar) = open;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    #[test]
    fn blocking_overflow_waits_then_drops() {
        let (emitter, open, _lines) = gated(1, Overflow::Block { timeout_ms: 80 });
        emitter.emit(record("fills queue"));

        let started = Instant::now();
        emitter.emit(record("times out"));
        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(emitter.stats().dropped_full, 1);

        release(&open);
        emitter.close().unwrap();
        assert_eq!(emitter.stats().written, 2);
    }

    #[test]
    fn blocking_overflow_succeeds_once_room_frees() {
        let (emitter, open, lines) = gated(1, Overflow::Block { timeout_ms: 5_000 });
        emitter.emit(record("fills queue"));

        let opener = {
            let open = Arc::clone(&open);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                release(&open);
            })
        };
        emitter.emit(record("waits for room"));
        opener.join().unwrap();
        emitter.close().unwrap();

        assert_eq!(emitter.stats().dropped_full, 0);
        assert_eq!(*lines.lock().unwrap(), vec!["parked", "fills queue", "waits for room"]);
    }
}
