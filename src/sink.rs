use crate::diagnostics::{Diagnostics, InternalErrorSource, INTERNAL_TARGET};
use crate::error::{Error, Result, SinkError};
use crate::format::Formatter;
use crate::level::Level;
use crate::queue::{DispatchQueue, PushOutcome};
use crate::record::Record;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Default number of records a sink queue holds before dropping the oldest.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Drain budget used when a running sink is dropped without an explicit stop.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Records a worker collects before handing them to its destination.
pub const DEFAULT_BATCH_SIZE: usize = 128;

/// Longest a collected record waits for its batch to fill.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

thread_local! {
    static IN_SINK_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// True on a sink worker thread, including the blocking threads of its
/// runtime. Events raised there must not be fed back into a sink.
pub fn in_sink_worker() -> bool {
    IN_SINK_WORKER.with(|flag| flag.get())
}

fn mark_sink_worker() {
    IN_SINK_WORKER.with(|flag| flag.set(true));
}

/// Asynchronous destination for formatted [`Record`]s.
///
/// Implementations transport records to a concrete backend (console, file,
/// remote indexer). A destination is owned by exactly one sink worker, so
/// `send` takes `&mut self` and never races with itself.
#[async_trait]
pub trait LogSink: Send {
    /// Deliver a single record.
    ///
    /// **Parameters**
    /// - `record`: the structured record.
    /// - `payload`: the record rendered by the sink's formatter, one line
    ///   including the trailing newline.
    ///
    /// **Returns**
    /// - `Ok(())` if the backend accepted the record.
    /// - `Err(..)` on any failure. The worker counts it, reports it to the
    ///   diagnostic channel and continues with the next record.
    async fn send(&mut self, record: &Record, payload: &[u8]) -> Result<(), SinkError>;

    /// Flush any buffered output. Called after every batch in which at
    /// least one record was handed to `send`.
    ///
    /// Default implementation is a no-op.
    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    Console,
    RotatingFile,
    Remote,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Console => "console",
            SinkKind::RotatingFile => "rotating-file",
            SinkKind::Remote => "remote",
        }
    }

    /// Position in the shutdown sequence: remote first, console last.
    pub(crate) fn shutdown_rank(&self) -> u8 {
        match self {
            SinkKind::Remote => 0,
            SinkKind::RotatingFile => 1,
            SinkKind::Console => 2,
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a sink.
#[derive(Clone)]
pub struct SinkConfig {
    pub name: String,
    pub kind: SinkKind,
    pub min_level: Level,
    pub capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub formatter: Arc<dyn Formatter>,
}

impl SinkConfig {
    pub fn new(name: impl Into<String>, kind: SinkKind, formatter: Arc<dyn Formatter>) -> Self {
        SinkConfig {
            name: name.into(),
            kind,
            min_level: Level::Debug,
            capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            formatter,
        }
    }

    pub fn min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Records per delivered batch (at least 1).
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Maximum wait for a partial batch (at least 10ms).
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }
}

#[derive(Debug, Default)]
struct SinkStats {
    submitted: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    discarded: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time counters for one sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkStatsSnapshot {
    pub name: String,
    pub kind: SinkKind,
    /// Records handed to `submit`.
    pub submitted: u64,
    /// Records the destination accepted.
    pub delivered: u64,
    /// Records lost to queue overflow or submitted after close.
    pub dropped: u64,
    /// Records still queued or batched, or abandoned mid-send, when the
    /// drain deadline passed.
    pub discarded: u64,
    /// Formatting or delivery failures.
    pub failures: u64,
}

impl SinkStatsSnapshot {
    /// Every record that will never reach the destination for a reason
    /// other than a delivery failure.
    pub fn dropped_total(&self) -> u64 {
        self.dropped + self.discarded
    }
}

struct Shared {
    name: String,
    kind: SinkKind,
    min_level: AtomicU8,
    batch_size: usize,
    flush_interval: Duration,
    formatter: RwLock<Arc<dyn Formatter>>,
    queue: DispatchQueue<Arc<Record>>,
    stats: SinkStats,
    diagnostics: Diagnostics,
}

/// One delivery destination with its own bounded queue and a single
/// dedicated background worker.
///
/// Producers call [`submit`](Sink::submit), which only pushes onto the
/// queue. All formatting and I/O happens on the worker thread, so output
/// for a given sink is written by one thread in submission order. The
/// worker hands records over in batches of up to `batch_size`, or fewer
/// once `flush_interval` has passed since the first of them was taken.
pub struct Sink {
    shared: Arc<Shared>,
    destination: Mutex<Option<Box<dyn LogSink>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Sink {
    pub fn new(config: SinkConfig, destination: Box<dyn LogSink>, diagnostics: Diagnostics) -> Self {
        let queue = match config.kind {
            // Critical records stay visible on the console under load.
            SinkKind::Console => {
                DispatchQueue::with_priority(config.capacity, |r: &Arc<Record>| r.level >= Level::Critical)
            }
            _ => DispatchQueue::new(config.capacity),
        };

        Sink {
            shared: Arc::new(Shared {
                name: config.name,
                kind: config.kind,
                min_level: AtomicU8::new(config.min_level.as_u8()),
                batch_size: config.batch_size.max(1),
                flush_interval: config.flush_interval.max(MIN_FLUSH_INTERVAL),
                formatter: RwLock::new(config.formatter),
                queue,
                stats: SinkStats::default(),
                diagnostics,
            }),
            destination: Mutex::new(Some(destination)),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn kind(&self) -> SinkKind {
        self.shared.kind
    }

    pub fn min_level(&self) -> Level {
        Level::from_u8(self.shared.min_level.load(Ordering::Relaxed))
    }

    pub fn set_min_level(&self, level: Level) {
        self.shared.min_level.store(level.as_u8(), Ordering::Relaxed);
    }

    /// Swap the formatter used for records not yet formatted.
    pub fn set_formatter(&self, formatter: Arc<dyn Formatter>) {
        *self.shared.formatter.write() = formatter;
    }

    pub fn accepts(&self, level: Level) -> bool {
        level >= self.min_level()
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Enqueue a record for asynchronous delivery.
    ///
    /// Never blocks on I/O and never fails: overflow evicts the oldest
    /// queued record and a closed sink drops the new one, both counted.
    pub fn submit(&self, record: Arc<Record>) {
        self.shared.stats.submitted.fetch_add(1, Ordering::Relaxed);
        match self.shared.queue.push(record) {
            PushOutcome::Queued => {}
            PushOutcome::Displaced(_) | PushOutcome::Rejected(_) => {
                self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Spawn the worker. Calling it again once started is a no-op.
    pub fn start(&self) -> Result<()> {
        let Some(destination) = self.destination.lock().take() else {
            return Ok(());
        };

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("log-sink-{}", self.shared.name))
            .spawn(move || run_worker(shared, destination))
            .map_err(|source| Error::WorkerSpawn {
                sink: self.shared.name.clone(),
                source,
            })?;

        *self.worker.lock() = Some(handle);
        tracing::debug!(target: INTERNAL_TARGET, sink = %self.shared.name, kind = %self.shared.kind, "sink worker started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop accepting records and drain the queue for at most `timeout`.
    pub fn stop(&self, timeout: Duration) {
        self.stop_by(Instant::now() + timeout);
    }

    /// Stop accepting records and drain until `deadline`.
    ///
    /// Records still queued or batched at the deadline are discarded and
    /// counted, as is a record whose `send` is still running then. A sink
    /// that was never started gets a worker just for the drain.
    pub fn stop_by(&self, deadline: Instant) {
        self.shared.queue.close(deadline);

        if self.destination.lock().is_some() {
            if let Err(err) = self.start() {
                self.shared.diagnostics.report(
                    InternalErrorSource::WorkerStartup {
                        sink: self.shared.name.clone(),
                    },
                    &err,
                    None,
                );
                let discarded = self.shared.queue.discard_all() as u64;
                self.shared.stats.discarded.fetch_add(discarded, Ordering::Relaxed);
            }
        }

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(target: INTERNAL_TARGET, sink = %self.shared.name, "sink worker panicked");
            }
        }
    }

    pub fn stats(&self) -> SinkStatsSnapshot {
        let stats = &self.shared.stats;
        SinkStatsSnapshot {
            name: self.shared.name.clone(),
            kind: self.shared.kind,
            submitted: stats.submitted.load(Ordering::Relaxed),
            delivered: stats.delivered.load(Ordering::Relaxed),
            dropped: stats.dropped.load(Ordering::Relaxed),
            discarded: stats.discarded.load(Ordering::Relaxed),
            failures: stats.failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        if self.worker.lock().is_some() {
            self.stop(DEFAULT_DRAIN_TIMEOUT);
        }
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("name", &self.shared.name)
            .field("kind", &self.shared.kind)
            .field("min_level", &self.min_level())
            .field("queued", &self.queued())
            .finish()
    }
}

fn run_worker(shared: Arc<Shared>, mut destination: Box<dyn LogSink>) {
    mark_sink_worker();
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .on_thread_start(mark_sink_worker)
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            shared.diagnostics.report(
                InternalErrorSource::WorkerStartup {
                    sink: shared.name.clone(),
                },
                &err,
                None,
            );
            shared.queue.close(Instant::now());
            let discarded = shared.queue.discard_all() as u64;
            shared.stats.discarded.fetch_add(discarded, Ordering::Relaxed);
            return;
        }
    };

    runtime.block_on(shared.drain(destination.as_mut()));
}

/// Resolves once the queue's close deadline has passed. Never resolves
/// while no deadline is set.
async fn deadline_reached(deadline: &mut watch::Receiver<Option<Instant>>) {
    loop {
        let current = *deadline.borrow_and_update();
        match current {
            Some(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at.into()) => return,
                    changed = deadline.changed() => {
                        if changed.is_err() {
                            tokio::time::sleep_until(at.into()).await;
                            return;
                        }
                    }
                }
            }
            None => {
                if deadline.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending::<()>().await,
    }
}

impl Shared {
    async fn drain(&self, destination: &mut dyn LogSink) {
        let mut deadline = self.queue.subscribe_deadline();
        let mut batch: Vec<Arc<Record>> = Vec::with_capacity(self.batch_size.min(1024));
        let mut due: Option<Instant> = None;

        loop {
            if self.queue.deadline().is_some_and(|at| Instant::now() >= at) {
                let discarded = batch.len() + self.queue.discard_all();
                batch.clear();
                self.discard(discarded as u64);
                break;
            }

            while batch.len() < self.batch_size {
                let Some(record) = self.queue.pop() else { break };
                if batch.is_empty() {
                    due = Instant::now().checked_add(self.flush_interval);
                }
                batch.push(record);
            }

            let finishing = self.queue.is_closed() && self.queue.is_empty();
            let ready = batch.len() >= self.batch_size
                || finishing
                || due.is_some_and(|at| Instant::now() >= at);
            if !batch.is_empty() && ready {
                self.deliver_batch(destination, &mut batch, &mut deadline).await;
                due = None;
                continue;
            }
            if finishing {
                break;
            }

            tokio::select! {
                _ = self.queue.wait() => {}
                _ = sleep_until_due(due) => {}
                _ = deadline_reached(&mut deadline) => {}
            }
        }

        tracing::debug!(target: INTERNAL_TARGET, sink = %self.name, "sink worker stopped");
    }

    /// Send every batched record in order, then flush the destination.
    /// Gives up on the rest of the batch once the drain deadline passes.
    async fn deliver_batch(
        &self,
        destination: &mut dyn LogSink,
        batch: &mut Vec<Arc<Record>>,
        deadline: &mut watch::Receiver<Option<Instant>>,
    ) {
        let formatter = Arc::clone(&*self.formatter.read());
        let mut sent_any = false;
        let mut records = batch.drain(..);

        while let Some(record) = records.next() {
            let payload = match formatter.format(&record) {
                Ok(payload) => payload,
                Err(err) => {
                    self.fail(
                        InternalErrorSource::RecordFormatting { sink: self.name.clone() },
                        &err,
                        Some(format!("sequence={}", record.sequence)),
                    );
                    continue;
                }
            };

            sent_any = true;
            let outcome = tokio::select! {
                biased;
                result = destination.send(&record, &payload) => Some(result),
                _ = deadline_reached(deadline) => None,
            };
            match outcome {
                Some(Ok(())) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Some(Err(err)) => self.fail(
                    InternalErrorSource::SinkWrite { sink: self.name.clone() },
                    &err,
                    Some(format!("sequence={}", record.sequence)),
                ),
                None => {
                    // The abandoned record plus whatever is left of the batch.
                    self.discard(1 + records.len() as u64);
                    return;
                }
            }
        }

        if !sent_any {
            return;
        }
        let flushed = tokio::select! {
            biased;
            result = destination.flush() => Some(result),
            _ = deadline_reached(deadline) => None,
        };
        if let Some(Err(err)) = flushed {
            self.fail(InternalErrorSource::SinkWrite { sink: self.name.clone() }, &err, None);
        }
    }

    fn discard(&self, count: u64) {
        if count > 0 {
            self.stats.discarded.fetch_add(count, Ordering::Relaxed);
            tracing::warn!(target: INTERNAL_TARGET, sink = %self.name, discarded = count, "drain deadline passed, discarding undelivered records");
        }
    }

    fn fail(&self, source: InternalErrorSource, err: &SinkError, context: Option<String>) {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        self.diagnostics.report(source, err, context);
    }
}
