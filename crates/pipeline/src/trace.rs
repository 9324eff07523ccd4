//! Tracer provider, tracers and spans.

use std::borrow::Cow;
use std::fmt::Display;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use opentelemetry::trace::{SpanId, SpanKind, Status};
use opentelemetry_semantic_conventions::trace::{
    CODE_FILEPATH, CODE_FUNCTION, CODE_LINENO, EXCEPTION_MESSAGE,
};

use crate::provider::Pipeline;
use crate::record::{new_span_id, new_trace_id, InstrumentationScope, SpanContext, SpanData, SpanEvent};
use crate::value::{AttributeValue, Attributes};

/// Event added by [`Tracer::in_span`] when the work finishes.
pub const COMPLETION_EVENT: &str = "Execution completed";

#[derive(Debug, Clone)]
pub struct TracerProvider {
    pipeline: Arc<Pipeline>,
}

impl TracerProvider {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn tracer(&self, name: impl Into<Cow<'static, str>>) -> Tracer {
        Tracer {
            scope: InstrumentationScope::new(name.into().into_owned()),
            pipeline: Arc::clone(&self.pipeline),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub async fn force_flush(&self, timeout: Duration) -> bool {
        self.pipeline.force_flush(timeout).await
    }

    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.pipeline.shutdown(timeout).await
    }
}

#[derive(Debug, Clone)]
pub struct Tracer {
    scope: InstrumentationScope,
    pipeline: Arc<Pipeline>,
}

impl Tracer {
    pub fn start_span(&self, name: impl Into<String>) -> ActiveSpan {
        self.span_builder(name).start()
    }

    pub fn span_builder(&self, name: impl Into<String>) -> SpanBuilder<'_> {
        SpanBuilder {
            tracer: self,
            name: name.into(),
            kind: SpanKind::Internal,
            parent: None,
            attributes: Attributes::new(),
        }
    }

    /// Run `f` inside a span named `name`.
    ///
    /// The span records the call site, gets a [`COMPLETION_EVENT`] carrying
    /// `duration_ms` on success, and an error status on `Err`.
    #[track_caller]
    pub fn in_span<T, E, F>(&self, name: &str, f: F) -> Result<T, E>
    where
        E: Display,
        F: FnOnce(&mut ActiveSpan) -> Result<T, E>,
    {
        let mut span = self.instrumented(name, Location::caller());
        let started = Instant::now();
        let result = f(&mut span);
        span.complete(&result, started);
        result
    }

    /// Async form of [`Tracer::in_span`]; `f` receives the span context for
    /// correlating log entries.
    #[track_caller]
    pub fn in_span_async<T, E, F, Fut>(
        &self,
        name: &str,
        f: F,
    ) -> impl Future<Output = Result<T, E>> + Send
    where
        E: Display,
        F: FnOnce(SpanContext) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let mut span = self.instrumented(name, Location::caller());
        let fut = f(span.context());
        async move {
            let started = Instant::now();
            let result = fut.await;
            span.complete(&result, started);
            result
        }
    }

    fn instrumented(&self, name: &str, caller: &Location<'_>) -> ActiveSpan {
        let mut span = self.start_span(name);
        span.set_attribute(CODE_FUNCTION, name);
        span.set_attribute(CODE_FILEPATH, caller.file());
        span.set_attribute(CODE_LINENO, caller.line());
        span
    }
}

pub struct SpanBuilder<'t> {
    tracer: &'t Tracer,
    name: String,
    kind: SpanKind,
    parent: Option<SpanContext>,
    attributes: Attributes,
}

impl SpanBuilder<'_> {
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Make the span a child of `parent`, sharing its trace id.
    pub fn with_parent(mut self, parent: SpanContext) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.set(key, value);
        self
    }

    pub fn start(self) -> ActiveSpan {
        let trace_id = self
            .parent
            .map(|p| p.trace_id)
            .unwrap_or_else(new_trace_id);
        let now = SystemTime::now();
        ActiveSpan {
            data: Some(SpanData {
                context: SpanContext {
                    trace_id,
                    span_id: new_span_id(),
                },
                parent_span_id: self.parent.map(|p| p.span_id),
                name: self.name,
                kind: self.kind,
                start_time: now,
                end_time: now,
                attributes: self.attributes,
                events: Vec::new(),
                status: Status::Unset,
                scope: self.tracer.scope.clone(),
            }),
            pipeline: Arc::clone(&self.tracer.pipeline),
        }
    }
}

/// A span being recorded. Ends (and is emitted) on [`ActiveSpan::end`] or drop.
#[derive(Debug)]
pub struct ActiveSpan {
    data: Option<SpanData>,
    pipeline: Arc<Pipeline>,
}

impl ActiveSpan {
    pub fn context(&self) -> SpanContext {
        self.data.as_ref().map(|d| d.context).unwrap_or(SpanContext {
            trace_id: opentelemetry::trace::TraceId::INVALID,
            span_id: SpanId::INVALID,
        })
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if let Some(d) = &mut self.data {
            d.attributes.set(key, value);
        }
    }

    pub fn add_event(&mut self, name: impl Into<String>, attributes: Attributes) {
        if let Some(d) = &mut self.data {
            d.events.push(SpanEvent {
                name: name.into(),
                time: SystemTime::now(),
                attributes,
            });
        }
    }

    pub fn set_status(&mut self, status: Status) {
        if let Some(d) = &mut self.data {
            d.status = status;
        }
    }

    /// Add an `exception` event and mark the span failed.
    pub fn record_error(&mut self, err: &dyn Display) {
        let message = err.to_string();
        let mut attrs = Attributes::new();
        attrs.set(EXCEPTION_MESSAGE, message.clone());
        self.add_event("exception", attrs);
        self.set_status(Status::error(message));
    }

    pub fn end(mut self) {
        self.finish();
    }

    fn complete<T, E: Display>(&mut self, result: &Result<T, E>, started: Instant) {
        match result {
            Ok(_) => {
                let mut attrs = Attributes::new();
                attrs.set("duration_ms", started.elapsed().as_secs_f64() * 1_000.0);
                self.add_event(COMPLETION_EVENT, attrs);
            }
            Err(e) => self.record_error(e),
        }
    }

    fn finish(&mut self) {
        if let Some(mut d) = self.data.take() {
            d.end_time = SystemTime::now();
            self.pipeline.emit(d.into());
        }
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::SimpleProcessor;
    use crate::record::{Record, Signal};
    use crate::resource::Resource;
    use crate::exporter::{ExportResponse, MockExporter};
    use std::sync::Mutex;

    /// A provider whose spans land in the returned vector.
    fn capturing() -> (TracerProvider, Arc<Mutex<Vec<SpanData>>>) {
        let spans = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&spans);
        let mut mock = MockExporter::new();
        mock.expect_export().returning(move |batch| {
            for r in batch {
                if let Record::Span(s) = r {
                    sink.lock().unwrap().push(s.clone());
                }
            }
            Ok(ExportResponse::accepted(batch.len()))
        });
        let pipeline = Pipeline::new(Signal::Traces, Resource::default())
            .with_processor(Arc::new(SimpleProcessor::new(Arc::new(mock))));
        (TracerProvider::new(pipeline), spans)
    }

    #[test]
    fn drop_ends_span() {
        let (provider, spans) = capturing();
        {
            let mut span = provider.tracer("test").start_span("work");
            span.set_attribute("k", 1);
        }
        let spans = spans.lock().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "work");
        assert!(spans[0].end_time >= spans[0].start_time);
        assert_eq!(spans[0].scope.name, "test");
    }

    #[test]
    fn child_shares_trace_id() {
        let (provider, spans) = capturing();
        let tracer = provider.tracer("test");
        let parent = tracer.start_span("parent");
        tracer
            .span_builder("child")
            .with_kind(SpanKind::Client)
            .with_parent(parent.context())
            .start()
            .end();
        parent.end();

        let spans = spans.lock().unwrap();
        assert_eq!(spans[0].context.trace_id, spans[1].context.trace_id);
        assert_eq!(spans[0].parent_span_id, Some(spans[1].context.span_id));
    }

    #[test]
    fn in_span_records_completion_event() {
        let (provider, spans) = capturing();
        let out: Result<u32, String> = provider.tracer("test").in_span("process_user_data", |_| Ok(7));
        assert_eq!(out, Ok(7));

        let spans = spans.lock().unwrap();
        let span = &spans[0];
        assert_eq!(
            span.attributes.get(CODE_FUNCTION).and_then(AttributeValue::as_str),
            Some("process_user_data")
        );
        assert!(span.attributes.get(CODE_LINENO).is_some());
        assert_eq!(span.events[0].name, COMPLETION_EVENT);
        assert!(span.events[0].attributes.get("duration_ms").is_some());
        assert_eq!(span.status, Status::Unset);
    }

    #[test]
    fn in_span_error_sets_status() {
        let (provider, spans) = capturing();
        let out: Result<(), String> =
            provider.tracer("test").in_span("op", |_| Err("simulated failure".to_owned()));
        assert!(out.is_err());

        let spans = spans.lock().unwrap();
        assert_eq!(spans[0].status, Status::error("simulated failure"));
        assert_eq!(spans[0].events[0].name, "exception");
    }

    #[tokio::test]
    async fn in_span_async_passes_context() {
        let (provider, spans) = capturing();
        let seen = provider
            .tracer("test")
            .in_span_async("async_op", |ctx| async move { Ok::<_, String>(ctx) })
            .await
            .unwrap();

        let spans = spans.lock().unwrap();
        assert_eq!(spans[0].context, seen);
    }
}
