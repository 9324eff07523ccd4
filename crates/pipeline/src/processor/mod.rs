//! Processors sit between a provider and its exporter.
//!
//! Besides buffering, every processor publishes where its exporter lives:
//! [`Processor::exporter_slots`] lists its own exporter fields,
//! [`Processor::helper`] hands out an inner processor, and
//! [`Processor::conventional_exporter`] names the single exporter field a
//! metrics reader is expected to carry.

mod batch;
mod periodic;
mod simple;

pub use batch::{BatchAccumulator, BatchConfig, BatchProcessor, Push};
pub use periodic::PeriodicReader;
pub use simple::SimpleProcessor;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::exporter::ExporterSlot;
use crate::record::Record;

/// Lifecycle of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessorState {
    /// Nothing buffered.
    Idle = 0,
    /// Records buffered, no flush running.
    Accumulating = 1,
    /// A flush is exporting.
    Flushing = 2,
    /// Shut down; emits are ignored.
    Closed = 3,
}

impl ProcessorState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => ProcessorState::Idle,
            1 => ProcessorState::Accumulating,
            2 => ProcessorState::Flushing,
            _ => ProcessorState::Closed,
        }
    }
}

#[async_trait]
pub trait Processor: Send + Sync + fmt::Debug {
    /// Type name reported by the interception layer.
    fn name(&self) -> &'static str;

    /// Accept a finished record. Never blocks on the network, never fails.
    fn on_emit(&self, record: Record);

    /// Export everything accepted so far. `false` if `timeout` elapsed first.
    async fn force_flush(&self, timeout: Duration) -> bool;

    /// Flush, stop background work and shut the exporter down.
    async fn shutdown(&self, timeout: Duration) -> bool;

    /// Exporter fields of this processor, in a stable order.
    fn exporter_slots(&self) -> Vec<ExporterSlot<'_>>;

    /// Inner processor doing the actual batching, if any.
    fn helper(&self) -> Option<&dyn Processor> {
        None
    }

    /// The `exporter` field of a metric reader.
    fn conventional_exporter(&self) -> Option<ExporterSlot<'_>> {
        None
    }
}
