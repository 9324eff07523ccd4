//! Metric reader exporting on a fixed interval.

use std::time::Duration;

use async_trait::async_trait;

use super::{BatchConfig, BatchProcessor, Processor};
use crate::exporter::{ExporterSlot, SharedExporter};
use crate::record::{Record, Signal};

/// Collects metric points and exports them every interval.
///
/// The batching is delegated to an inner [`BatchProcessor`] with the size
/// trigger disabled. The reader itself owns no exporter field: its exporter
/// is reached through [`Processor::helper`] or
/// [`Processor::conventional_exporter`].
#[derive(Debug)]
pub struct PeriodicReader {
    inner: BatchProcessor,
}

impl PeriodicReader {
    pub fn new(exporter: SharedExporter, config: BatchConfig) -> Self {
        Self {
            inner: BatchProcessor::new(
                Signal::Metrics,
                exporter,
                BatchConfig {
                    size_trigger: false,
                    ..config
                },
            ),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.scheduled_delay()
    }
}

#[async_trait]
impl Processor for PeriodicReader {
    fn name(&self) -> &'static str {
        "PeriodicReader"
    }

    fn on_emit(&self, record: Record) {
        self.inner.on_emit(record);
    }

    async fn force_flush(&self, timeout: Duration) -> bool {
        self.inner.force_flush(timeout).await
    }

    async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.shutdown(timeout).await
    }

    fn exporter_slots(&self) -> Vec<ExporterSlot<'_>> {
        Vec::new()
    }

    fn helper(&self) -> Option<&dyn Processor> {
        Some(&self.inner)
    }

    fn conventional_exporter(&self) -> Option<ExporterSlot<'_>> {
        Some(ExporterSlot::new("exporter", self.inner.exporter_cell()))
    }
}
