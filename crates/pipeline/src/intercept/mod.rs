//! Export interception: wrap the OTLP exporter of each pipeline in a
//! decorator that prints every request and collector reply to the console.

mod discovery;

pub use discovery::{
    count_intercepted, deep_bind, intercept_pipeline, BindOutcome, InterceptionReport,
};

use async_trait::async_trait;

use crate::dump::{render_request, render_response, DumpSink};
use crate::error::ExportError;
use crate::exporter::{ExportResult, Exporter, SharedExporter};
use crate::record::{Record, Signal};
use crate::resource::Resource;

/// Decorator that dumps the batch, delegates unchanged, dumps the outcome
/// and returns it unchanged.
#[derive(Debug)]
pub struct InterceptingExporter {
    inner: SharedExporter,
    signal: Signal,
    resource: Option<Resource>,
    sink: DumpSink,
}

impl InterceptingExporter {
    pub fn new(inner: SharedExporter, signal: Signal, sink: DumpSink) -> Self {
        Self {
            inner,
            signal,
            resource: None,
            sink,
        }
    }

    /// Print `resource` once at the top of every request dump.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// The exporter being decorated.
    pub fn inner(&self) -> &SharedExporter {
        &self.inner
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }
}

#[async_trait]
impl Exporter for InterceptingExporter {
    fn describe(&self) -> String {
        format!("console dump decorator for {} export", self.signal)
    }

    async fn export(&self, batch: &[Record]) -> ExportResult {
        self.sink
            .write_block(&render_request(self.signal, self.resource.as_ref(), batch));
        let result = self.inner.export(batch).await;
        self.sink.write_block(&render_response(self.signal, &result));
        result
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        self.inner.shutdown().await
    }

    fn is_interceptor(&self) -> bool {
        true
    }
}
