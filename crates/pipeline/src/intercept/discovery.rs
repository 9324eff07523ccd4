//! Locating the exporter of a processor and swapping in the decorator.
//!
//! Per processor:
//! 1. its own exporter slots, in order;
//! 2. then the slots of its helper processor;
//! 3. for the metrics pipeline only, its conventional exporter slot.
//!
//! A slot qualifies when it is readable, holds an exporter, that exporter is
//! not already a decorator, and its description contains
//! [`TRANSPORT_MARKER`]. The first qualifying slot is replaced and the scan
//! stops.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use super::InterceptingExporter;
use crate::dump::DumpSink;
use crate::error::InterceptionError;
use crate::exporter::{ExporterCell, ExporterSlot, SharedExporter, TRANSPORT_MARKER};
use crate::processor::Processor;
use crate::provider::Pipeline;
use crate::record::Signal;
use crate::resource::Resource;

/// What binding a single processor did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// An exporter was wrapped; `path` names the slot.
    Wrapped { path: String },
    /// Nothing left to wrap; a decorator is already in place.
    AlreadyIntercepted { processor: String },
}

/// Result of intercepting one pipeline, one entry per processor.
#[derive(Debug, Clone)]
pub struct InterceptionReport {
    pub signal: Signal,
    pub outcomes: Vec<Result<BindOutcome, InterceptionError>>,
}

impl InterceptionReport {
    /// Number of exporters wrapped by this run.
    pub fn wrapped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, Ok(BindOutcome::Wrapped { .. })))
            .count()
    }
}

enum Scan {
    Wrapped(String),
    Nothing { saw_interceptor: bool },
}

struct Binder<'a> {
    signal: Signal,
    sink: &'a DumpSink,
    resource: &'a Resource,
}

impl Binder<'_> {
    fn decorate(&self, original: SharedExporter) -> SharedExporter {
        Arc::new(
            InterceptingExporter::new(original, self.signal, self.sink.clone())
                .with_resource(self.resource.clone()),
        )
    }

    fn scan(&self, prefix: &str, slots: &[ExporterSlot<'_>]) -> Scan {
        let mut saw_interceptor = false;
        for slot in slots {
            let exporter = match slot.cell.load() {
                Ok(Some(e)) => e,
                Ok(None) => continue,
                Err(e) => {
                    debug!(signal = %self.signal, slot = slot.name, error = %e, "exporter slot unreadable; skipped");
                    continue;
                }
            };
            if exporter.is_interceptor() {
                saw_interceptor = true;
                continue;
            }
            if !exporter.describe().contains(TRANSPORT_MARKER) {
                continue;
            }
            slot.cell.replace(self.decorate(exporter));
            return Scan::Wrapped(format!("{prefix}.{}", slot.name));
        }
        Scan::Nothing { saw_interceptor }
    }
}

/// Wrap the first OTLP exporter reachable from `processor`.
///
/// # Errors
///
/// [`InterceptionError::NotFound`] when no slot holds an OTLP exporter or a
/// decorator.
pub fn deep_bind(
    processor: &dyn Processor,
    signal: Signal,
    sink: &DumpSink,
    resource: &Resource,
) -> Result<BindOutcome, InterceptionError> {
    let binder = Binder {
        signal,
        sink,
        resource,
    };
    let name = processor.name();
    let mut saw_interceptor = false;

    match binder.scan(name, &processor.exporter_slots()) {
        Scan::Wrapped(path) => return Ok(wrapped(signal, path)),
        Scan::Nothing { saw_interceptor: s } => saw_interceptor |= s,
    }

    if let Some(helper) = processor.helper() {
        debug!(signal = %signal, processor = name, helper = helper.name(), "searching helper processor");
        let prefix = format!("{name}.helper.{}", helper.name());
        match binder.scan(&prefix, &helper.exporter_slots()) {
            Scan::Wrapped(path) => return Ok(wrapped(signal, path)),
            Scan::Nothing { saw_interceptor: s } => saw_interceptor |= s,
        }
    }

    if signal == Signal::Metrics {
        if let Some(slot) = processor.conventional_exporter() {
            match binder.scan(name, &[slot]) {
                Scan::Wrapped(path) => return Ok(wrapped(signal, format!("{path} (fallback)"))),
                Scan::Nothing { saw_interceptor: s } => saw_interceptor |= s,
            }
        }
    }

    if saw_interceptor {
        debug!(signal = %signal, processor = name, "exporter already intercepted");
        return Ok(BindOutcome::AlreadyIntercepted {
            processor: name.to_owned(),
        });
    }

    debug!(signal = %signal, processor = name, "no OTLP exporter found; pipeline left as is");
    Err(InterceptionError::NotFound {
        signal,
        processor: name.to_owned(),
    })
}

fn wrapped(signal: Signal, path: String) -> BindOutcome {
    info!(signal = %signal, path = %path, "exporter intercepted");
    BindOutcome::Wrapped { path }
}

/// Run [`deep_bind`] on every processor of `pipeline`.
pub fn intercept_pipeline(pipeline: &Pipeline, sink: &DumpSink) -> InterceptionReport {
    let outcomes = pipeline
        .processors()
        .iter()
        .map(|p| deep_bind(p.as_ref(), pipeline.signal(), sink, pipeline.resource()))
        .collect();
    InterceptionReport {
        signal: pipeline.signal(),
        outcomes,
    }
}

/// Distinct exporter cells of `pipeline` currently holding a decorator.
pub fn count_intercepted(pipeline: &Pipeline) -> usize {
    let mut seen: HashSet<*const ExporterCell> = HashSet::new();
    let mut count = 0;
    let mut visit = |slot: ExporterSlot<'_>| {
        if !seen.insert(slot.cell as *const ExporterCell) {
            return;
        }
        if let Ok(Some(e)) = slot.cell.load() {
            if e.is_interceptor() {
                count += 1;
            }
        }
    };

    for p in pipeline.processors() {
        p.exporter_slots().into_iter().for_each(&mut visit);
        if let Some(helper) = p.helper() {
            helper.exporter_slots().into_iter().for_each(&mut visit);
        }
        if let Some(slot) = p.conventional_exporter() {
            visit(slot);
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExportError;
    use crate::exporter::{ExportResponse, MockExporter};
    use crate::processor::{BatchConfig, BatchProcessor, PeriodicReader, SimpleProcessor};
    use crate::record::LogEntry;
    use async_trait::async_trait;
    use std::time::Duration;

    fn otlp_mock() -> SharedExporter {
        let mut mock = MockExporter::new();
        mock.expect_describe()
            .returning(|| "OTLP/gRPC logs exporter -> http://localhost:4317".into());
        mock.expect_is_interceptor().return_const(false);
        mock.expect_export()
            .returning(|b| Ok(ExportResponse::accepted(b.len())));
        mock.expect_shutdown().returning(|| Ok(()));
        Arc::new(mock)
    }

    fn plain_mock() -> SharedExporter {
        let mut mock = MockExporter::new();
        mock.expect_describe().returning(|| "console logs exporter".into());
        mock.expect_is_interceptor().return_const(false);
        Arc::new(mock)
    }

    fn quiet() -> BatchConfig {
        BatchConfig {
            scheduled_delay: Duration::from_secs(3_600),
            ..BatchConfig::default()
        }
    }

    /// Processor whose exporter is only reachable through the metric-reader convention.
    #[derive(Debug)]
    struct ConventionOnly(ExporterCell);

    #[async_trait]
    impl Processor for ConventionOnly {
        fn name(&self) -> &'static str {
            "ConventionOnly"
        }
        fn on_emit(&self, _record: crate::record::Record) {}
        async fn force_flush(&self, _timeout: Duration) -> bool {
            true
        }
        async fn shutdown(&self, _timeout: Duration) -> bool {
            true
        }
        fn exporter_slots(&self) -> Vec<ExporterSlot<'_>> {
            Vec::new()
        }
        fn conventional_exporter(&self) -> Option<ExporterSlot<'_>> {
            Some(ExporterSlot::new("exporter", &self.0))
        }
    }

    #[tokio::test]
    async fn wraps_batch_processor_slot_once() {
        let original = otlp_mock();
        let p = BatchProcessor::new(Signal::Logs, Arc::clone(&original), quiet());
        let sink = DumpSink::buffer().0;
        let resource = Resource::default();

        let first = deep_bind(&p, Signal::Logs, &sink, &resource).unwrap();
        assert_eq!(
            first,
            BindOutcome::Wrapped {
                path: "BatchProcessor.exporter".into()
            }
        );
        let wrapped = p.exporter_slots()[0].cell.load().unwrap().unwrap();
        assert!(wrapped.is_interceptor());

        let second = deep_bind(&p, Signal::Logs, &sink, &resource).unwrap();
        assert!(matches!(second, BindOutcome::AlreadyIntercepted { .. }));
        let after = p.exporter_slots()[0].cell.load().unwrap().unwrap();
        assert!(Arc::ptr_eq(&wrapped, &after));
    }

    #[tokio::test]
    async fn periodic_reader_found_through_helper() {
        let reader = PeriodicReader::new(otlp_mock(), quiet());
        let outcome = deep_bind(
            &reader,
            Signal::Metrics,
            &DumpSink::buffer().0,
            &Resource::default(),
        )
        .unwrap();
        assert_eq!(
            outcome,
            BindOutcome::Wrapped {
                path: "PeriodicReader.helper.BatchProcessor.exporter".into()
            }
        );
    }

    #[test]
    fn metrics_fallback_uses_conventional_slot() {
        let p = ConventionOnly(ExporterCell::new(otlp_mock()));
        let outcome =
            deep_bind(&p, Signal::Metrics, &DumpSink::buffer().0, &Resource::default()).unwrap();
        assert_eq!(
            outcome,
            BindOutcome::Wrapped {
                path: "ConventionOnly.exporter (fallback)".into()
            }
        );
    }

    #[test]
    fn fallback_is_metrics_only() {
        let p = ConventionOnly(ExporterCell::new(otlp_mock()));
        let err = deep_bind(&p, Signal::Logs, &DumpSink::buffer().0, &Resource::default())
            .unwrap_err();
        assert_eq!(
            err,
            InterceptionError::NotFound {
                signal: Signal::Logs,
                processor: "ConventionOnly".into()
            }
        );
    }

    #[test]
    fn non_otlp_exporter_is_left_alone() {
        let p = SimpleProcessor::new(plain_mock());
        let result = deep_bind(&p, Signal::Logs, &DumpSink::buffer().0, &Resource::default());
        assert!(matches!(result, Err(InterceptionError::NotFound { .. })));
        assert!(!p.exporter_slots()[0].cell.load().unwrap().unwrap().is_interceptor());
    }

    #[tokio::test]
    async fn closed_slot_is_skipped() {
        let p = BatchProcessor::new(Signal::Logs, otlp_mock(), quiet());
        assert!(p.shutdown(Duration::from_secs(1)).await);
        let result = deep_bind(&p, Signal::Logs, &DumpSink::buffer().0, &Resource::default());
        assert!(matches!(result, Err(InterceptionError::NotFound { .. })));
    }

    #[tokio::test]
    async fn pipeline_report_and_count() {
        let pipeline = Pipeline::new(Signal::Metrics, Resource::default())
            .with_processor(Arc::new(PeriodicReader::new(otlp_mock(), quiet())))
            .with_processor(Arc::new(SimpleProcessor::new(plain_mock())));
        let sink = DumpSink::buffer().0;

        let report = intercept_pipeline(&pipeline, &sink);
        assert_eq!(report.wrapped(), 1);
        assert!(report.outcomes[1].is_err());
        // Helper and conventional slot are the same cell.
        assert_eq!(count_intercepted(&pipeline), 1);

        let again = intercept_pipeline(&pipeline, &sink);
        assert_eq!(again.wrapped(), 0);
        assert_eq!(count_intercepted(&pipeline), 1);
    }

    #[tokio::test]
    async fn intercepted_flush_dumps_and_exports() {
        let (sink, buf) = DumpSink::buffer();
        let p = BatchProcessor::new(Signal::Logs, otlp_mock(), quiet());
        deep_bind(&p, Signal::Logs, &sink, &Resource::default()).unwrap();

        p.on_emit(LogEntry::builder("dumped").build().into());
        assert!(p.force_flush(Duration::from_secs(1)).await);

        let out = buf.contents();
        assert!(out.contains("[Item 1 - LogEntry]"));
        assert!(out.contains("\"body\": \"dumped\""));
    }

    #[tokio::test]
    async fn failing_exporter_still_reports() {
        let mut mock = MockExporter::new();
        mock.expect_describe().returning(|| "OTLP/HTTP logs exporter".into());
        mock.expect_is_interceptor().return_const(false);
        mock.expect_export()
            .returning(|_| Err(ExportError::Timeout(5)));
        let p = BatchProcessor::new(Signal::Logs, Arc::new(mock), quiet());
        let (sink, buf) = DumpSink::buffer();
        deep_bind(&p, Signal::Logs, &sink, &Resource::default()).unwrap();

        p.on_emit(LogEntry::builder("x").build().into());
        assert!(p.force_flush(Duration::from_secs(1)).await);
        assert!(buf.contents().contains("  - Outcome: Err"));
    }
}
