//! Deep extraction of records into plain JSON trees, and the console banners
//! built from them.
//!
//! Every type that can appear in a dump implements [`ToPlainValue`]
//! explicitly. Extraction goes through an [`Extractor`], which bounds the
//! nesting depth (so self-referential structures terminate) and turns a
//! panicking implementation into a [`PLACEHOLDER`] string.

use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use opentelemetry::trace::{SpanId, SpanKind, Status, TraceId};
use serde_json::{Map, Number, Value as Json};

use crate::exporter::{ExportResponse, ExportResult, PartialSuccess};
use crate::record::{
    unix_nanos, InstrumentationScope, LogEntry, MetricKind, MetricPoint, MetricValue, Record,
    Signal, SpanContext, SpanData, SpanEvent,
};
use crate::resource::Resource;
use crate::value::{AttributeValue, Attributes};

/// Nesting depth past which extraction stops descending.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Substituted for a value whose extraction failed.
pub const PLACEHOLDER: &str = "<unavailable>";

/// Substituted for a value nested deeper than the extractor allows.
pub const TRUNCATED: &str = "<max depth reached>";

const HEAVY_RULE: &str =
    "################################################################################";
const LIGHT_RULE: &str =
    "--------------------------------------------------------------------------------";

/// Conversion into a plain tree of scalars, sequences and mappings.
///
/// Implementations call [`Extractor::extract`] for every nested value rather
/// than recursing directly. Every array or object in the output must come
/// from exactly one `extract` call, so that re-extracting the output counts
/// the same depth.
pub trait ToPlainValue {
    fn to_plain_value(&self, ex: &mut Extractor) -> Json;

    /// Scalars are never truncated by the depth bound.
    fn is_scalar(&self) -> bool {
        false
    }
}

/// Depth-bounded, panic-safe driver of [`ToPlainValue`].
#[derive(Debug)]
pub struct Extractor {
    depth: usize,
    max_depth: usize,
}

impl Extractor {
    pub fn new(max_depth: usize) -> Self {
        Self {
            depth: 0,
            max_depth,
        }
    }

    /// Extract `value` one level below the current one.
    pub fn extract<T: ToPlainValue + ?Sized>(&mut self, value: &T) -> Json {
        if self.depth >= self.max_depth && !value.is_scalar() {
            return Json::String(TRUNCATED.into());
        }
        let entry_depth = self.depth;
        self.depth += 1;
        let out = panic::catch_unwind(AssertUnwindSafe(|| value.to_plain_value(self)))
            .unwrap_or_else(|_| Json::String(PLACEHOLDER.into()));
        self.depth = entry_depth;
        out
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

/// Extract `value` with the default depth bound.
pub fn to_plain<T: ToPlainValue + ?Sized>(value: &T) -> Json {
    Extractor::default().extract(value)
}

fn float(f: f64) -> Json {
    Number::from_f64(f)
        .map(Json::Number)
        .unwrap_or_else(|| Json::String(f.to_string()))
}

fn object<const N: usize>(entries: [(&str, Json); N]) -> Json {
    let mut map = Map::new();
    for (k, v) in entries {
        map.insert(k.to_owned(), v);
    }
    Json::Object(map)
}

impl ToPlainValue for Json {
    fn to_plain_value(&self, ex: &mut Extractor) -> Json {
        match self {
            Json::Array(items) => Json::Array(items.iter().map(|v| ex.extract(v)).collect()),
            Json::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), ex.extract(v)))
                    .collect(),
            ),
            scalar => scalar.clone(),
        }
    }

    fn is_scalar(&self) -> bool {
        !matches!(self, Json::Array(_) | Json::Object(_))
    }
}

impl<T: ToPlainValue> ToPlainValue for [T] {
    fn to_plain_value(&self, ex: &mut Extractor) -> Json {
        Json::Array(self.iter().map(|v| ex.extract(v)).collect())
    }
}

impl ToPlainValue for f64 {
    fn to_plain_value(&self, _ex: &mut Extractor) -> Json {
        float(*self)
    }

    fn is_scalar(&self) -> bool {
        true
    }
}

impl ToPlainValue for AttributeValue {
    fn to_plain_value(&self, ex: &mut Extractor) -> Json {
        match self {
            AttributeValue::Bool(b) => Json::Bool(*b),
            AttributeValue::Int(i) => Json::from(*i),
            AttributeValue::Double(d) => float(*d),
            AttributeValue::String(s) => Json::String(s.clone()),
            AttributeValue::Array(items) => {
                Json::Array(items.iter().map(|v| ex.extract(v)).collect())
            }
            AttributeValue::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), ex.extract(v)))
                    .collect(),
            ),
        }
    }

    fn is_scalar(&self) -> bool {
        !matches!(self, AttributeValue::Array(_) | AttributeValue::Map(_))
    }
}

impl ToPlainValue for Attributes {
    fn to_plain_value(&self, ex: &mut Extractor) -> Json {
        Json::Object(
            self.iter()
                .map(|kv| (kv.key.clone(), ex.extract(&kv.value)))
                .collect(),
        )
    }
}

impl ToPlainValue for Resource {
    fn to_plain_value(&self, ex: &mut Extractor) -> Json {
        Json::Object(
            self.iter()
                .map(|kv| (kv.key.clone(), ex.extract(&kv.value)))
                .collect(),
        )
    }
}

impl ToPlainValue for InstrumentationScope {
    fn to_plain_value(&self, _ex: &mut Extractor) -> Json {
        object([
            ("name", Json::String(self.name.clone())),
            (
                "version",
                self.version.clone().map(Json::String).unwrap_or(Json::Null),
            ),
        ])
    }
}

impl ToPlainValue for TraceId {
    fn to_plain_value(&self, _ex: &mut Extractor) -> Json {
        Json::String(format!("0x{self}"))
    }

    fn is_scalar(&self) -> bool {
        true
    }
}

impl ToPlainValue for SpanId {
    fn to_plain_value(&self, _ex: &mut Extractor) -> Json {
        Json::String(format!("0x{self}"))
    }

    fn is_scalar(&self) -> bool {
        true
    }
}

impl ToPlainValue for SpanContext {
    fn to_plain_value(&self, ex: &mut Extractor) -> Json {
        object([
            ("trace_id", ex.extract(&self.trace_id)),
            ("span_id", ex.extract(&self.span_id)),
        ])
    }
}

fn kind_name(kind: &SpanKind) -> &'static str {
    match kind {
        SpanKind::Client => "CLIENT",
        SpanKind::Server => "SERVER",
        SpanKind::Producer => "PRODUCER",
        SpanKind::Consumer => "CONSUMER",
        SpanKind::Internal => "INTERNAL",
    }
}

impl ToPlainValue for Status {
    fn to_plain_value(&self, _ex: &mut Extractor) -> Json {
        match self {
            Status::Unset => object([("code", Json::String("UNSET".into()))]),
            Status::Ok => object([("code", Json::String("OK".into()))]),
            Status::Error { description } => object([
                ("code", Json::String("ERROR".into())),
                ("description", Json::String(description.to_string())),
            ]),
        }
    }
}

impl ToPlainValue for SpanEvent {
    fn to_plain_value(&self, ex: &mut Extractor) -> Json {
        object([
            ("name", Json::String(self.name.clone())),
            ("time_unix_nano", Json::from(unix_nanos(self.time))),
            ("attributes", ex.extract(&self.attributes)),
        ])
    }
}

impl ToPlainValue for SpanData {
    fn to_plain_value(&self, ex: &mut Extractor) -> Json {
        object([
            ("name", Json::String(self.name.clone())),
            ("context", ex.extract(&self.context)),
            (
                "parent_span_id",
                self.parent_span_id
                    .map(|id| ex.extract(&id))
                    .unwrap_or(Json::Null),
            ),
            ("kind", Json::String(kind_name(&self.kind).into())),
            ("attributes", ex.extract(&self.attributes)),
            ("events", ex.extract(self.events.as_slice())),
            ("status", ex.extract(&self.status)),
            ("start_time_unix_nano", Json::from(unix_nanos(self.start_time))),
            ("end_time_unix_nano", Json::from(unix_nanos(self.end_time))),
            ("scope", ex.extract(&self.scope)),
        ])
    }
}

impl ToPlainValue for LogEntry {
    fn to_plain_value(&self, ex: &mut Extractor) -> Json {
        let (trace_id, span_id) = match &self.span_context {
            Some(ctx) => (ex.extract(&ctx.trace_id), ex.extract(&ctx.span_id)),
            None => (Json::Null, Json::Null),
        };
        object([
            ("body", ex.extract(&self.body)),
            ("severity", Json::String(self.severity.text().into())),
            ("severity_number", Json::from(self.severity.number())),
            ("attributes", ex.extract(&self.attributes)),
            ("trace_id", trace_id),
            ("span_id", span_id),
            ("time_unix_nano", Json::from(unix_nanos(self.timestamp))),
            ("scope", ex.extract(&self.scope)),
        ])
    }
}

impl ToPlainValue for MetricKind {
    fn to_plain_value(&self, ex: &mut Extractor) -> Json {
        match self {
            MetricKind::Counter => Json::String("COUNTER".into()),
            MetricKind::UpDownCounter => Json::String("UP_DOWN_COUNTER".into()),
            MetricKind::Gauge => Json::String("GAUGE".into()),
            MetricKind::Histogram { bounds } => object([
                ("type", Json::String("HISTOGRAM".into())),
                ("explicit_bounds", ex.extract(&bounds[..])),
            ]),
        }
    }

    fn is_scalar(&self) -> bool {
        !matches!(self, MetricKind::Histogram { .. })
    }
}

impl ToPlainValue for MetricPoint {
    fn to_plain_value(&self, ex: &mut Extractor) -> Json {
        let value = match self.value {
            MetricValue::Int(i) => Json::from(i),
            MetricValue::Double(d) => float(d),
        };
        object([
            ("name", Json::String(self.name.clone())),
            ("description", Json::String(self.description.clone())),
            ("unit", Json::String(self.unit.clone())),
            ("kind", ex.extract(&self.kind)),
            ("value", value),
            ("attributes", ex.extract(&self.attributes)),
            ("time_unix_nano", Json::from(unix_nanos(self.time))),
            ("scope", ex.extract(&self.scope)),
        ])
    }
}

impl ToPlainValue for Record {
    fn to_plain_value(&self, ex: &mut Extractor) -> Json {
        match self {
            Record::Span(s) => s.to_plain_value(ex),
            Record::Log(l) => l.to_plain_value(ex),
            Record::Metric(m) => m.to_plain_value(ex),
        }
    }
}

impl ToPlainValue for PartialSuccess {
    fn to_plain_value(&self, _ex: &mut Extractor) -> Json {
        object([
            ("rejected", Json::from(self.rejected)),
            ("error_message", Json::String(self.error_message.clone())),
        ])
    }
}

impl ToPlainValue for ExportResponse {
    fn to_plain_value(&self, ex: &mut Extractor) -> Json {
        let partial = match &self.partial_success {
            Some(p) => ex.extract(p),
            None => Json::Null,
        };
        object([
            ("records", Json::from(self.records)),
            ("partial_success", partial),
        ])
    }
}

impl ToPlainValue for ExportResult {
    fn to_plain_value(&self, ex: &mut Extractor) -> Json {
        match self {
            Ok(resp) => resp.to_plain_value(ex),
            Err(e) => object([
                ("error", Json::String(e.to_string())),
                ("debug", Json::String(format!("{e:?}"))),
            ]),
        }
    }
}

/// Pretty-print `value` with every line prefixed by `indent`.
fn indented(value: &Json, indent: &str) -> String {
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| PLACEHOLDER.into());
    pretty
        .lines()
        .map(|line| format!("{indent}{line}\n"))
        .collect()
}

/// Banner printed before a batch is transmitted.
pub fn render_request(signal: Signal, resource: Option<&Resource>, batch: &[Record]) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(HEAVY_RULE);
    out.push('\n');
    out.push_str(&format!("### [OTLP REQUEST] SIGNAL: {}\n", signal.label()));
    out.push_str(HEAVY_RULE);
    out.push('\n');

    if let Some(resource) = resource {
        out.push_str("\n    [Resource]\n");
        out.push_str(&indented(&to_plain(resource), "      "));
    }

    for (i, record) in batch.iter().enumerate() {
        out.push_str(&format!("\n    [Item {} - {}]\n", i + 1, record.type_name()));
        out.push_str(&indented(&to_plain(record), "      "));
    }

    out.push_str(LIGHT_RULE);
    out.push('\n');
    out
}

/// Banner printed after the wrapped exporter returned.
pub fn render_response(signal: Signal, result: &ExportResult) -> String {
    let outcome = match result {
        Ok(_) => "Ok",
        Err(_) => "Err",
    };
    let mut out = String::new();
    out.push_str(&format!(
        "<<< [OTLP RESPONSE] COLLECTOR REPLY ({})\n",
        signal.label()
    ));
    out.push_str(&format!("  - Outcome: {outcome}\n"));
    out.push_str("  - Content:\n");
    out.push_str(&indented(&to_plain(result), "      "));
    out.push_str(HEAVY_RULE);
    out.push_str("\n\n");
    out
}

/// Destination of console dumps. Cloning shares the underlying writer.
#[derive(Clone)]
pub struct DumpSink {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl DumpSink {
    pub fn stdout() -> Self {
        Self::writer(std::io::stdout())
    }

    pub fn writer(w: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(w))),
        }
    }

    /// An in-memory sink and a handle to read back what was written.
    pub fn buffer() -> (Self, SharedBuffer) {
        let buf = SharedBuffer::default();
        (Self::writer(buf.clone()), buf)
    }

    /// Write `text` in one piece so concurrent dumps never interleave.
    pub fn write_block(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            tracing::debug!(error = %e, "failed to write console dump");
        }
    }
}

impl std::fmt::Debug for DumpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DumpSink")
    }
}

/// Growable in-memory writer shared between clones.
#[derive(Clone, Default, Debug)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExportError;
    use crate::record::Severity;
    use crate::value::KeyValue;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::{Duration, UNIX_EPOCH};

    /// A node that can point back at itself.
    struct Node {
        label: &'static str,
        next: RefCell<Option<Rc<Node>>>,
    }

    impl ToPlainValue for Node {
        fn to_plain_value(&self, ex: &mut Extractor) -> Json {
            let next = match self.next.borrow().as_ref() {
                Some(n) => ex.extract(n.as_ref()),
                None => Json::Null,
            };
            json!({ "label": self.label, "next": next })
        }
    }

    struct Exploding;

    impl ToPlainValue for Exploding {
        fn to_plain_value(&self, _ex: &mut Extractor) -> Json {
            panic!("field access failed");
        }
    }

    struct Holder {
        ok: AttributeValue,
        bad: Exploding,
    }

    impl ToPlainValue for Holder {
        fn to_plain_value(&self, ex: &mut Extractor) -> Json {
            json!({ "ok": ex.extract(&self.ok), "bad": ex.extract(&self.bad) })
        }
    }

    fn sample_log() -> LogEntry {
        LogEntry::builder(AttributeValue::from(json!({"name": "Ana", "address": {"city": "CDMX"}})))
            .severity(Severity::Info)
            .timestamp(UNIX_EPOCH + Duration::from_secs(1))
            .attribute("event.type", "manual_test")
            .build()
    }

    #[test]
    fn extraction_is_idempotent() {
        let once = to_plain(&Record::from(sample_log()));
        let twice = to_plain(&once);
        assert_eq!(once, twice);
    }

    fn nested_map(levels: usize) -> AttributeValue {
        (0..levels).fold(AttributeValue::Int(0), |inner, _| {
            AttributeValue::map([("n", inner)])
        })
    }

    fn deep_span() -> SpanData {
        let at = UNIX_EPOCH + Duration::from_secs(2);
        SpanData {
            context: SpanContext {
                trace_id: TraceId::from_bytes([1; 16]),
                span_id: SpanId::from_bytes([2; 8]),
            },
            parent_span_id: None,
            name: "checkout".into(),
            kind: SpanKind::Server,
            start_time: at,
            end_time: at,
            attributes: Attributes::from([KeyValue::new("deep", nested_map(40))]),
            events: vec![SpanEvent {
                name: "cart.loaded".into(),
                time: at,
                attributes: Attributes::from([KeyValue::new("deep", nested_map(40))]),
            }],
            status: Status::error("declined"),
            scope: InstrumentationScope::new("test"),
        }
    }

    #[test]
    fn span_extraction_is_idempotent_with_deep_event_attributes() {
        let once = to_plain(&Record::Span(deep_span()));
        let twice = to_plain(&once);
        assert_eq!(once, twice);
        assert_eq!(once["status"]["code"], json!("ERROR"));
        assert!(once["events"][0]["attributes"]["deep"].to_string().contains(TRUNCATED));
    }

    #[test]
    fn histogram_extraction_is_idempotent() {
        let point = MetricPoint {
            name: "latency".into(),
            description: String::new(),
            unit: "ms".into(),
            kind: MetricKind::Histogram {
                bounds: vec![5.0, 10.0].into(),
            },
            value: MetricValue::Double(7.5),
            attributes: Attributes::from([KeyValue::new("deep", nested_map(40))]),
            time: UNIX_EPOCH,
            scope: InstrumentationScope::new("test"),
        };
        let once = to_plain(&Record::Metric(point));
        assert_eq!(once["kind"]["explicit_bounds"], json!([5.0, 10.0]));
        assert_eq!(to_plain(&once), once);
    }

    #[test]
    fn scalars_at_the_depth_bound_are_kept() {
        let tree = Extractor::new(1).extract(&json!({ "a": 1, "b": { "c": 2 } }));
        assert_eq!(tree, json!({ "a": 1, "b": TRUNCATED }));
    }

    #[test]
    fn self_reference_terminates() {
        let node = Rc::new(Node {
            label: "loop",
            next: RefCell::new(None),
        });
        *node.next.borrow_mut() = Some(Rc::clone(&node));

        let tree = Extractor::new(8).extract(node.as_ref());

        let mut depth = 0;
        let mut cursor = &tree;
        while let Some(next) = cursor.get("next") {
            depth += 1;
            cursor = next;
        }
        assert_eq!(cursor, &Json::String(TRUNCATED.into()));
        assert_eq!(depth, 8);

        // Break the cycle so the test does not leak.
        node.next.borrow_mut().take();
    }

    #[test]
    fn panicking_field_becomes_placeholder() {
        let holder = Holder {
            ok: AttributeValue::Int(1),
            bad: Exploding,
        };
        let tree = to_plain(&holder);
        assert_eq!(tree["ok"], json!(1));
        assert_eq!(tree["bad"], json!(PLACEHOLDER));
    }

    #[test]
    fn structured_body_is_nested_object() {
        let tree = to_plain(&sample_log());
        assert_eq!(tree["body"]["address"]["city"], json!("CDMX"));
        assert_eq!(tree["severity"], json!("INFO"));
        assert_eq!(tree["time_unix_nano"], json!(1_000_000_000u64));
    }

    #[test]
    fn non_finite_double_is_stringified() {
        assert_eq!(to_plain(&AttributeValue::Double(f64::NAN)), json!("NaN"));
    }

    #[test]
    fn request_banner_layout() {
        let batch = vec![Record::from(sample_log())];
        let text = render_request(Signal::Logs, None, &batch);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], HEAVY_RULE);
        assert_eq!(lines[2], "### [OTLP REQUEST] SIGNAL: LOGS");
        assert!(text.contains("    [Item 1 - LogEntry]"));
        assert!(text.contains("\"event.type\": \"manual_test\""));
        assert_eq!(lines.last().copied(), Some(LIGHT_RULE));
    }

    #[test]
    fn response_banner_reports_error() {
        let result: ExportResult = Err(ExportError::Timeout(10));
        let text = render_response(Signal::Traces, &result);
        assert!(text.starts_with("<<< [OTLP RESPONSE] COLLECTOR REPLY (TRACES)\n"));
        assert!(text.contains("  - Outcome: Err"));
        assert!(text.contains("export timed out after 10 ms"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let batch = vec![Record::from(sample_log())];
        let resource = Resource::for_service("svc", "ns", "test");
        assert_eq!(
            render_request(Signal::Logs, Some(&resource), &batch),
            render_request(Signal::Logs, Some(&resource), &batch)
        );
    }

    #[test]
    fn sink_collects_blocks() {
        let (sink, buf) = DumpSink::buffer();
        sink.write_block("one\n");
        sink.clone().write_block("two\n");
        assert_eq!(buf.contents(), "one\ntwo\n");
    }
}
