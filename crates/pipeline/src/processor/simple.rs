//! Unbuffered processor: every record is exported as it is emitted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::warn;

use super::Processor;
use crate::exporter::{ExporterCell, ExporterSlot, SharedExporter};
use crate::record::Record;

/// Exports each record synchronously on the emitting thread.
///
/// Only for exporters whose `export` completes without awaiting I/O, such as
/// the console exporter. The export future is polled once; if it is not ready
/// the record is dropped with a warning instead of blocking the runtime
/// thread.
#[derive(Debug)]
pub struct SimpleProcessor {
    exporter: ExporterCell,
    closed: AtomicBool,
}

impl SimpleProcessor {
    pub fn new(exporter: SharedExporter) -> Self {
        Self {
            exporter: ExporterCell::new(exporter),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Processor for SimpleProcessor {
    fn name(&self) -> &'static str {
        "SimpleProcessor"
    }

    fn on_emit(&self, record: Record) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let Some(exporter) = self.exporter.current() else {
            return;
        };
        match exporter.export(std::slice::from_ref(&record)).now_or_never() {
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(exporter = %exporter.describe(), error = %e, "export failed; dropping record");
            }
            None => warn!(
                exporter = %exporter.describe(),
                "exporter did not complete synchronously; dropping record"
            ),
        }
    }

    async fn force_flush(&self, _timeout: Duration) -> bool {
        true
    }

    async fn shutdown(&self, _timeout: Duration) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return true;
        }
        self.exporter.close();
        match self.exporter.current() {
            Some(exporter) => exporter.shutdown().await.is_ok(),
            None => true,
        }
    }

    fn exporter_slots(&self) -> Vec<ExporterSlot<'_>> {
        vec![ExporterSlot::new("exporter", &self.exporter)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::DumpSink;
    use crate::exporter::ConsoleExporter;
    use crate::error::ExportError;
    use crate::exporter::{ExportResult, Exporter};
    use crate::record::{LogEntry, Signal};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// Exporter whose export never completes.
    #[derive(Debug, Default)]
    struct Stalled {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Exporter for Stalled {
        fn describe(&self) -> String {
            "stalled".into()
        }

        async fn export(&self, _batch: &[Record]) -> ExportResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn shutdown(&self) -> Result<(), ExportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn pending_export_does_not_block_emitter() {
        let exporter = Arc::new(Stalled::default());
        let p = SimpleProcessor::new(exporter.clone());

        p.on_emit(LogEntry::builder("one").build().into());
        p.on_emit(LogEntry::builder("two").build().into());

        assert_eq!(exporter.calls.load(Ordering::SeqCst), 2);
        assert!(p.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn exports_immediately_until_shutdown() {
        let (sink, buf) = DumpSink::buffer();
        let p = SimpleProcessor::new(Arc::new(ConsoleExporter::new(Signal::Logs, sink)));

        p.on_emit(LogEntry::builder("first").build().into());
        assert_eq!(buf.contents().lines().count(), 1);

        assert!(p.shutdown(Duration::from_secs(1)).await);
        p.on_emit(LogEntry::builder("second").build().into());
        assert_eq!(buf.contents().lines().count(), 1);
    }
}
