//! Buffered export with a background flush task.
//!
//! Records are accumulated in memory and handed to the exporter when:
//! - the buffer reaches `max_export_batch_size` (size trigger),
//! - the flush timer fires,
//! - [`Processor::force_flush`] or [`Processor::shutdown`] is called.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Processor, ProcessorState};
use crate::config::TelemetryConfig;
use crate::exporter::{ExporterCell, ExporterSlot, SharedExporter};
use crate::record::{Record, Signal};

/// Tuning of a [`BatchProcessor`].
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Buffer length that wakes the flush task; also the export chunk size.
    pub max_export_batch_size: usize,
    /// Records beyond this many pending ones are dropped.
    pub max_queue_size: usize,
    /// Timer period.
    pub scheduled_delay: Duration,
    /// Whether reaching `max_export_batch_size` triggers a flush.
    pub size_trigger: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_export_batch_size: 512,
            max_queue_size: 2_048,
            scheduled_delay: Duration::from_secs(5),
            size_trigger: true,
        }
    }
}

impl BatchConfig {
    pub fn from_config(cfg: &TelemetryConfig) -> Self {
        Self {
            max_export_batch_size: cfg.max_export_batch_size,
            max_queue_size: cfg.max_queue_size,
            scheduled_delay: cfg.flush_interval(),
            size_trigger: true,
        }
    }

    /// Timer-only batching, as used by the metrics reader.
    pub fn periodic(cfg: &TelemetryConfig) -> Self {
        Self {
            scheduled_delay: cfg.metric_interval(),
            size_trigger: false,
            ..Self::from_config(cfg)
        }
    }
}

/// Outcome of [`BatchAccumulator::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    Queued,
    /// The batch reached its export size.
    Ready,
    /// The queue is full; the item was discarded.
    Dropped,
}

/// Bounded, order-preserving buffer of pending items.
#[derive(Debug)]
pub struct BatchAccumulator<T> {
    items: Vec<T>,
    max_batch_size: usize,
    max_queue_size: usize,
}

impl<T> BatchAccumulator<T> {
    pub fn new(max_batch_size: usize, max_queue_size: usize) -> Self {
        Self {
            items: Vec::with_capacity(max_batch_size),
            max_batch_size,
            max_queue_size,
        }
    }

    pub fn push(&mut self, item: T) -> Push {
        if self.items.len() >= self.max_queue_size {
            return Push::Dropped;
        }
        self.items.push(item);
        if self.items.len() >= self.max_batch_size {
            Push::Ready
        } else {
            Push::Queued
        }
    }

    /// Take every pending item, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        std::mem::replace(&mut self.items, Vec::with_capacity(self.max_batch_size))
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[derive(Debug)]
struct Shared {
    signal: Signal,
    config: BatchConfig,
    buffer: Mutex<BatchAccumulator<Record>>,
    exporter: ExporterCell,
    /// Held for the whole of a flush; one flush in flight at a time.
    flush_lock: tokio::sync::Mutex<()>,
    state: AtomicU8,
    wake: Notify,
    dropped: AtomicU64,
}

impl Shared {
    fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `to` unless closed.
    fn transition(&self, to: ProcessorState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur != ProcessorState::Closed as u8).then_some(to as u8)
            });
    }

    fn buffer(&self) -> std::sync::MutexGuard<'_, BatchAccumulator<Record>> {
        self.buffer.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Export everything buffered, in chunks. Returns the number of records taken.
    async fn flush(&self) -> usize {
        let _guard = self.flush_lock.lock().await;

        let pending = self.buffer().drain();
        if pending.is_empty() {
            return 0;
        }
        self.transition(ProcessorState::Flushing);

        let Some(exporter) = self.exporter.current() else {
            warn!(signal = %self.signal, dropped = pending.len(), "no exporter configured; dropping batch");
            self.settle();
            return pending.len();
        };

        for chunk in pending.chunks(self.config.max_export_batch_size.max(1)) {
            match exporter.export(chunk).await {
                Ok(resp) => debug!(
                    signal = %self.signal,
                    records = resp.records,
                    "batch exported"
                ),
                Err(e) => warn!(
                    signal = %self.signal,
                    error = %e,
                    dropped = chunk.len(),
                    "export failed; dropping batch"
                ),
            }
        }

        self.settle();
        pending.len()
    }

    /// Leave the flushing state according to what is buffered now.
    fn settle(&self) {
        let next = if self.buffer().is_empty() {
            ProcessorState::Idle
        } else {
            ProcessorState::Accumulating
        };
        self.transition(next);
    }
}

/// Buffers records and exports them from a background task.
///
/// Must be created from within a tokio runtime.
#[derive(Debug)]
pub struct BatchProcessor {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchProcessor {
    pub fn new(signal: Signal, exporter: SharedExporter, config: BatchConfig) -> Self {
        let shared = Arc::new(Shared {
            signal,
            config,
            buffer: Mutex::new(BatchAccumulator::new(
                config.max_export_batch_size,
                config.max_queue_size,
            )),
            exporter: ExporterCell::new(exporter),
            flush_lock: tokio::sync::Mutex::new(()),
            state: AtomicU8::new(ProcessorState::Idle as u8),
            wake: Notify::new(),
            dropped: AtomicU64::new(0),
        });
        let cancel = CancellationToken::new();
        let worker = spawn_worker(Arc::clone(&shared), cancel.clone());

        Self {
            shared,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn signal(&self) -> Signal {
        self.shared.signal
    }

    pub fn state(&self) -> ProcessorState {
        self.shared.state()
    }

    pub fn scheduled_delay(&self) -> Duration {
        self.shared.config.scheduled_delay
    }

    /// Records waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.shared.buffer().len()
    }

    /// Records discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn exporter_cell(&self) -> &ExporterCell {
        &self.shared.exporter
    }
}

fn spawn_worker(shared: Arc<Shared>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(shared.config.scheduled_delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; skip it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = shared.wake.notified() => {}
            }
            shared.flush().await;
        }
        debug!(signal = %shared.signal, "batch worker stopped");
    })
}

#[async_trait]
impl Processor for BatchProcessor {
    fn name(&self) -> &'static str {
        "BatchProcessor"
    }

    fn on_emit(&self, record: Record) {
        let shared = &self.shared;
        // Closed check and push share the buffer lock with the state swap in shutdown.
        let outcome = {
            let mut buffer = shared.buffer();
            if shared.state() == ProcessorState::Closed {
                drop(buffer);
                warn!(signal = %shared.signal, "record emitted after shutdown; ignored");
                return;
            }
            buffer.push(record)
        };
        match outcome {
            Push::Queued => shared.transition(ProcessorState::Accumulating),
            Push::Ready => {
                shared.transition(ProcessorState::Accumulating);
                if shared.config.size_trigger {
                    shared.wake.notify_one();
                }
            }
            Push::Dropped => {
                let n = shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if n == 1 || n % 1_000 == 0 {
                    warn!(
                        signal = %shared.signal,
                        dropped_total = n,
                        max_queue_size = shared.config.max_queue_size,
                        "queue full; dropping record"
                    );
                }
            }
        }
    }

    async fn force_flush(&self, timeout: Duration) -> bool {
        if self.shared.state() == ProcessorState::Closed {
            debug!(signal = %self.shared.signal, "force flush after shutdown ignored");
            return false;
        }

        // Runs detached so that a timeout leaves the flush going.
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move { shared.flush().await });
        match time::timeout(timeout, task).await {
            Ok(Ok(n)) => {
                debug!(signal = %self.shared.signal, records = n, "force flush complete");
                true
            }
            Ok(Err(e)) => {
                warn!(signal = %self.shared.signal, error = %e, "force flush task failed");
                false
            }
            Err(_) => {
                warn!(
                    signal = %self.shared.signal,
                    timeout_ms = timeout.as_millis() as u64,
                    "force flush timed out; export continues in background"
                );
                false
            }
        }
    }

    async fn shutdown(&self, timeout: Duration) -> bool {
        let previous = {
            let _buffer = self.shared.buffer();
            self.shared
                .state
                .swap(ProcessorState::Closed as u8, Ordering::AcqRel)
        };
        if previous == ProcessorState::Closed as u8 {
            return true;
        }
        self.shared.exporter.close();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();

        let sequence = async move {
            shared.flush().await;
            cancel.cancel();
            if let Some(handle) = worker {
                if let Err(e) = handle.await {
                    warn!(signal = %shared.signal, error = %e, "batch worker ended abnormally");
                }
            }
            match shared.exporter.current() {
                Some(exporter) => exporter.shutdown().await.is_ok(),
                None => true,
            }
        };

        match time::timeout(timeout, sequence).await {
            Ok(ok) => ok,
            Err(_) => {
                self.cancel.cancel();
                warn!(signal = %self.shared.signal, "shutdown timed out");
                false
            }
        }
    }

    fn exporter_slots(&self) -> Vec<ExporterSlot<'_>> {
        vec![ExporterSlot::new("exporter", &self.shared.exporter)]
    }
}

impl Drop for BatchProcessor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExportError, SlotError};
    use crate::exporter::{ExportResponse, MockExporter};
    use crate::record::LogEntry;

    fn log(body: &str) -> Record {
        LogEntry::builder(body).build().into()
    }

    fn counting_exporter(batches: Arc<Mutex<Vec<usize>>>) -> SharedExporter {
        let mut mock = MockExporter::new();
        mock.expect_describe().returning(|| "OTLP/gRPC logs exporter -> test".into());
        mock.expect_export().returning(move |batch| {
            batches.lock().unwrap().push(batch.len());
            Ok(ExportResponse::accepted(batch.len()))
        });
        mock.expect_shutdown().returning(|| Ok(()));
        Arc::new(mock)
    }

    fn quiet_config() -> BatchConfig {
        BatchConfig {
            max_export_batch_size: 4,
            max_queue_size: 8,
            scheduled_delay: Duration::from_secs(3_600),
            size_trigger: true,
        }
    }

    #[test]
    fn accumulator_size_trigger() {
        let mut acc = BatchAccumulator::new(3, 4);
        assert_eq!(acc.push(1), Push::Queued);
        assert_eq!(acc.push(2), Push::Queued);
        assert_eq!(acc.push(3), Push::Ready);
        assert_eq!(acc.push(4), Push::Ready);
        assert_eq!(acc.push(5), Push::Dropped);
        assert_eq!(acc.drain(), vec![1, 2, 3, 4]);
        assert!(acc.is_empty());
    }

    #[tokio::test]
    async fn force_flush_exports_in_chunks() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let p = BatchProcessor::new(
            Signal::Logs,
            counting_exporter(Arc::clone(&batches)),
            BatchConfig {
                size_trigger: false,
                ..quiet_config()
            },
        );
        for i in 0..6 {
            p.on_emit(log(&i.to_string()));
        }
        assert_eq!(p.state(), ProcessorState::Accumulating);

        assert!(p.force_flush(Duration::from_secs(1)).await);

        assert_eq!(*batches.lock().unwrap(), vec![4, 2]);
        assert_eq!(p.pending(), 0);
        assert_eq!(p.state(), ProcessorState::Idle);
    }

    #[tokio::test]
    async fn queue_overflow_drops_records() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let p = BatchProcessor::new(
            Signal::Logs,
            counting_exporter(Arc::clone(&batches)),
            BatchConfig {
                size_trigger: false,
                ..quiet_config()
            },
        );
        for i in 0..10 {
            p.on_emit(log(&i.to_string()));
        }
        assert_eq!(p.pending(), 8);
        assert_eq!(p.dropped(), 2);
    }

    #[tokio::test]
    async fn export_failure_is_absorbed() {
        let mut mock = MockExporter::new();
        mock.expect_export()
            .times(1)
            .returning(|_| Err(ExportError::Transport("refused".into())));
        let p = BatchProcessor::new(Signal::Traces, Arc::new(mock), quiet_config());
        p.on_emit(log("lost"));

        assert!(p.force_flush(Duration::from_secs(1)).await);
        assert_eq!(p.pending(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_slot_and_ignores_later_emits() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let p = BatchProcessor::new(
            Signal::Logs,
            counting_exporter(Arc::clone(&batches)),
            quiet_config(),
        );
        p.on_emit(log("before"));

        assert!(p.shutdown(Duration::from_secs(1)).await);
        assert_eq!(*batches.lock().unwrap(), vec![1]);
        assert_eq!(p.state(), ProcessorState::Closed);
        assert_eq!(
            p.exporter_slots()[0].cell.load().unwrap_err(),
            SlotError::Closed
        );

        p.on_emit(log("after"));
        assert_eq!(p.pending(), 0);
        assert!(!p.force_flush(Duration::from_millis(100)).await);
        assert!(p.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn records_racing_shutdown_are_exported_or_rejected() {
        for _ in 0..20 {
            let batches = Arc::new(Mutex::new(Vec::new()));
            let p = Arc::new(BatchProcessor::new(
                Signal::Logs,
                counting_exporter(Arc::clone(&batches)),
                BatchConfig {
                    max_export_batch_size: 64,
                    max_queue_size: 100_000,
                    scheduled_delay: Duration::from_secs(3_600),
                    size_trigger: false,
                },
            ));

            let emitters: Vec<_> = (0..4)
                .map(|t| {
                    let p = Arc::clone(&p);
                    tokio::spawn(async move {
                        for i in 0..500 {
                            p.on_emit(log(&format!("{t}-{i}")));
                            if i % 50 == 0 {
                                tokio::task::yield_now().await;
                            }
                        }
                    })
                })
                .collect();

            tokio::task::yield_now().await;
            assert!(p.shutdown(Duration::from_secs(5)).await);
            for e in emitters {
                e.await.unwrap();
            }

            // Nothing may be left behind the final drain.
            assert_eq!(p.pending(), 0);
            assert!(batches.lock().unwrap().iter().sum::<usize>() <= 2_000);
        }
    }
}
