//! Exporters: the components that hand a batch of records to a destination.
//!
//! Processors never own an exporter directly; they hold it in an
//! [`ExporterCell`] and publish that cell through
//! [`crate::processor::Processor::exporter_slots`]. This is what lets the
//! interception layer swap an exporter in place without reflection.

pub mod console;
pub mod otlp;

pub use console::ConsoleExporter;
pub use otlp::{OtlpExporter, OtlpSettings};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;

use crate::error::{ExportError, SlotError};
use crate::record::Record;

/// Substring every OTLP exporter's [`Exporter::describe`] contains.
///
/// Interception only wraps exporters carrying it, so that anything else
/// exposing an `export` operation is left alone.
pub const TRANSPORT_MARKER: &str = "OTLP";

/// Part of a batch the collector refused while accepting the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialSuccess {
    pub rejected: i64,
    pub error_message: String,
}

/// What the destination answered to a successful export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportResponse {
    /// Number of records handed over in the call.
    pub records: usize,
    pub partial_success: Option<PartialSuccess>,
}

impl ExportResponse {
    pub fn accepted(records: usize) -> Self {
        Self {
            records,
            partial_success: None,
        }
    }
}

pub type ExportResult = Result<ExportResponse, ExportError>;

/// Encodes and transmits batches of records.
///
/// Implementations are reused sequentially across flushes; a processor never
/// issues overlapping `export` calls on the same exporter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Exporter: Send + Sync + fmt::Debug {
    /// Human-readable identity, e.g. `OTLP/gRPC logs exporter -> http://host:4317`.
    fn describe(&self) -> String;

    /// Transmit `batch`. No retry happens here; failures propagate.
    async fn export(&self, batch: &[Record]) -> ExportResult;

    /// Release transport resources. Later exports fail with [`ExportError::Shutdown`].
    async fn shutdown(&self) -> Result<(), ExportError>;

    /// `true` only for the interception decorator.
    fn is_interceptor(&self) -> bool {
        false
    }
}

pub type SharedExporter = Arc<dyn Exporter>;

/// Replaceable holder of a processor's exporter.
///
/// Reads are lock-free; a replacement is seen by the next flush.
pub struct ExporterCell {
    current: ArcSwapOption<SharedExporter>,
    closed: AtomicBool,
}

impl ExporterCell {
    pub fn new(exporter: SharedExporter) -> Self {
        Self {
            current: ArcSwapOption::new(Some(Arc::new(exporter))),
            closed: AtomicBool::new(false),
        }
    }

    /// A cell that holds nothing yet.
    pub fn empty() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            closed: AtomicBool::new(false),
        }
    }

    /// Read the exporter as seen from outside the owning processor.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::Closed`] once the owning processor has shut down.
    pub fn load(&self) -> Result<Option<SharedExporter>, SlotError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SlotError::Closed);
        }
        Ok(self.current())
    }

    /// Swap in `exporter`, returning the previous one.
    pub fn replace(&self, exporter: SharedExporter) -> Option<SharedExporter> {
        self.current
            .swap(Some(Arc::new(exporter)))
            .map(|prev| Arc::clone(&*prev))
    }

    /// The exporter regardless of the closed flag; used by the owning processor.
    pub(crate) fn current(&self) -> Option<SharedExporter> {
        self.current.load_full().map(|e| Arc::clone(&*e))
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for ExporterCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExporterCell")
            .field("exporter", &self.current().map(|e| e.describe()))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// A named exporter field exposed by a processor.
#[derive(Debug, Clone, Copy)]
pub struct ExporterSlot<'a> {
    pub name: &'static str,
    pub cell: &'a ExporterCell,
}

impl<'a> ExporterSlot<'a> {
    pub fn new(name: &'static str, cell: &'a ExporterCell) -> Self {
        Self { name, cell }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_named(name: &'static str) -> SharedExporter {
        let mut mock = MockExporter::new();
        mock.expect_describe().returning(move || name.to_owned());
        Arc::new(mock)
    }

    #[test]
    fn cell_replace_returns_previous() {
        let first = mock_named("first");
        let cell = ExporterCell::new(Arc::clone(&first));
        let prev = cell.replace(mock_named("second")).unwrap();
        assert!(Arc::ptr_eq(&prev, &first));
        assert_eq!(cell.load().unwrap().unwrap().describe(), "second");
    }

    #[test]
    fn closed_cell_refuses_outside_reads() {
        let cell = ExporterCell::new(mock_named("x"));
        cell.close();
        assert_eq!(cell.load().unwrap_err(), SlotError::Closed);
        assert!(cell.current().is_some());
    }

    #[test]
    fn empty_cell_loads_none() {
        assert!(ExporterCell::empty().load().unwrap().is_none());
    }
}
