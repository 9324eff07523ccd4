//! The part shared by the three providers: a resource and the processors
//! every emitted record is handed to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::debug;

use crate::processor::Processor;
use crate::record::{Record, Signal};
use crate::resource::Resource;

/// One signal's resource and processor chain.
#[derive(Debug)]
pub struct Pipeline {
    signal: Signal,
    resource: Resource,
    processors: Vec<Arc<dyn Processor>>,
    shut_down: AtomicBool,
}

impl Pipeline {
    pub fn new(signal: Signal, resource: Resource) -> Self {
        Self {
            signal,
            resource,
            processors: Vec::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Processors in registration order.
    pub fn processors(&self) -> &[Arc<dyn Processor>] {
        &self.processors
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Hand `record` to every processor.
    pub fn emit(&self, record: Record) {
        if self.is_shut_down() {
            debug!(signal = %self.signal, "record emitted after shutdown; ignored");
            return;
        }
        if let Some((last, rest)) = self.processors.split_last() {
            for p in rest {
                p.on_emit(record.clone());
            }
            last.on_emit(record);
        }
    }

    /// `true` when every processor finished within `timeout`.
    pub async fn force_flush(&self, timeout: Duration) -> bool {
        join_all(self.processors.iter().map(|p| p.force_flush(timeout)))
            .await
            .into_iter()
            .all(|ok| ok)
    }

    /// Shut every processor down; later calls return `true` without doing anything.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return true;
        }
        join_all(self.processors.iter().map(|p| p.shutdown(timeout)))
            .await
            .into_iter()
            .all(|ok| ok)
    }
}
