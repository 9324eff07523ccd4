//! Forwarding of application `tracing` events into the logs pipeline.
//!
//! The layer is installed with the subscriber before any pipeline exists and
//! stays inert until a [`Logger`] is attached.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::logs::Logger;
use crate::record::{LogEntry, Severity};
use crate::value::{AttributeValue, Attributes};

/// Event targets never forwarded: the pipeline's own diagnostics and the
/// transport stack beneath it would otherwise feed back into the exporter.
const SKIPPED_TARGETS: [&str; 6] = [
    "pipeline",
    "tonic",
    "hyper",
    "h2",
    "tower",
    "tower_http",
];

/// Attribute carrying the `tracing` target of a forwarded event.
pub const TARGET_ATTRIBUTE: &str = "log.target";

/// `tracing_subscriber` layer emitting each event as a [`LogEntry`].
#[derive(Clone, Default)]
pub struct LogBridgeLayer {
    logger: Arc<ArcSwapOption<Logger>>,
}

impl LogBridgeLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start forwarding to `logger`. Replaces any previously attached logger.
    pub fn attach(&self, logger: Logger) {
        self.logger.store(Some(Arc::new(logger)));
    }

    /// Stop forwarding.
    pub fn detach(&self) {
        self.logger.store(None);
    }

    pub fn is_attached(&self) -> bool {
        self.logger.load().is_some()
    }
}

impl fmt::Debug for LogBridgeLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBridgeLayer")
            .field("attached", &self.is_attached())
            .finish()
    }
}

fn is_skipped(target: &str) -> bool {
    SKIPPED_TARGETS.iter().any(|prefix| {
        target == *prefix
            || target
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

impl<S: Subscriber> Layer<S> for LogBridgeLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if is_skipped(meta.target()) {
            return;
        }
        let guard = self.logger.load();
        let Some(logger) = guard.as_ref() else {
            return;
        };

        let mut fields = FieldCollector::default();
        event.record(&mut fields);
        fields
            .attributes
            .set(TARGET_ATTRIBUTE, meta.target().to_owned());

        let body = fields
            .message
            .unwrap_or_else(|| AttributeValue::String(meta.name().to_owned()));
        logger.emit(
            LogEntry::builder(body)
                .severity(Severity::from(meta.level()))
                .attributes(fields.attributes)
                .build(),
        );
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<AttributeValue>,
    attributes: Attributes,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: AttributeValue) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.attributes.set(field.name(), value);
        }
    }
}

impl Visit for FieldCollector {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, value.into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.into());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, value.to_string().into());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{value:?}").into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::{ExportResponse, MockExporter};
    use crate::logs::LoggerProvider;
    use crate::processor::SimpleProcessor;
    use crate::provider::Pipeline;
    use crate::record::{Record, Signal};
    use crate::resource::Resource;
    use std::sync::Mutex;
    use tracing_subscriber::layer::SubscriberExt;

    fn capturing() -> (LoggerProvider, Arc<Mutex<Vec<LogEntry>>>) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&entries);
        let mut mock = MockExporter::new();
        mock.expect_export().returning(move |batch| {
            for r in batch {
                if let Record::Log(l) = r {
                    sink.lock().unwrap().push(l.clone());
                }
            }
            Ok(ExportResponse::accepted(batch.len()))
        });
        let provider = LoggerProvider::new(
            Pipeline::new(Signal::Logs, Resource::default())
                .with_processor(Arc::new(SimpleProcessor::new(Arc::new(mock)))),
        );
        (provider, entries)
    }

    #[test]
    fn forwards_events_with_fields() {
        let (provider, entries) = capturing();
        let bridge = LogBridgeLayer::new();
        bridge.attach(provider.logger("app"));
        let subscriber = tracing_subscriber::registry().with(bridge);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "demo_api::handlers", user = "alice", price = 9.5, "purchase rejected");
        });

        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.severity, Severity::Warn);
        assert_eq!(e.body.as_str(), Some("purchase rejected"));
        assert_eq!(e.attributes.get("user").and_then(AttributeValue::as_str), Some("alice"));
        assert!(e.attributes.get("price").is_some());
        assert_eq!(
            e.attributes.get(TARGET_ATTRIBUTE).and_then(AttributeValue::as_str),
            Some("demo_api::handlers")
        );
        assert_eq!(e.scope.name, "app");
    }

    #[test]
    fn skips_internal_targets() {
        let (provider, entries) = capturing();
        let bridge = LogBridgeLayer::new();
        bridge.attach(provider.logger("app"));
        let subscriber = tracing_subscriber::registry().with(bridge);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "pipeline::processor::batch", "flush");
            tracing::info!(target: "h2::codec", "frame");
            tracing::info!(target: "tower_http::trace::on_response", "finished processing request");
            tracing::info!(target: "hyperion", "kept");
        });

        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].body.as_str(), Some("kept"));
    }

    #[test]
    fn inert_until_attached() {
        let (provider, entries) = capturing();
        let bridge = LogBridgeLayer::new();
        let subscriber = tracing_subscriber::registry().with(bridge.clone());

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "app", "before");
            bridge.attach(provider.logger("app"));
            tracing::info!(target: "app", "after");
            bridge.detach();
            tracing::info!(target: "app", "detached");
        });

        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].body.as_str(), Some("after"));
    }
}
