//! Telemetry records: the units buffered by processors and handed to exporters.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use opentelemetry::trace::{SpanId, SpanKind, Status, TraceId};

use crate::value::{AttributeValue, Attributes};

/// The three independent signal pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Traces,
    Metrics,
    Logs,
}

impl Signal {
    pub const ALL: [Signal; 3] = [Signal::Traces, Signal::Metrics, Signal::Logs];

    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
            Signal::Logs => "logs",
        }
    }

    /// Upper-case label used in console banners.
    pub fn label(self) -> &'static str {
        match self {
            Signal::Traces => "TRACES",
            Signal::Metrics => "METRICS",
            Signal::Logs => "LOGS",
        }
    }

    /// Path appended to the collector endpoint by the OTLP/HTTP transport.
    pub fn http_path(self) -> &'static str {
        match self {
            Signal::Traces => "/v1/traces",
            Signal::Metrics => "/v1/metrics",
            Signal::Logs => "/v1/logs",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name (and optional version) of the tracer, meter or logger that produced a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct InstrumentationScope {
    pub name: String,
    pub version: Option<String>,
}

impl InstrumentationScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }
}

/// Trace/span identifiers correlating a record with its causal context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

/// A completed span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanData {
    pub context: SpanContext,
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub kind: SpanKind,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub attributes: Attributes,
    pub events: Vec<SpanEvent>,
    pub status: Status,
    pub scope: InstrumentationScope,
}

/// A timestamped annotation on a span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanEvent {
    pub name: String,
    pub time: SystemTime,
    pub attributes: Attributes,
}

/// Log severity, numbered as in the OTLP data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Trace = 1,
    Debug = 5,
    Info = 9,
    Warn = 13,
    Error = 17,
    Fatal = 21,
}

impl Severity {
    pub fn number(self) -> i32 {
        self as i32
    }

    pub fn text(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl From<&tracing::Level> for Severity {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Severity::Trace,
            tracing::Level::DEBUG => Severity::Debug,
            tracing::Level::INFO => Severity::Info,
            tracing::Level::WARN => Severity::Warn,
            tracing::Level::ERROR => Severity::Error,
        }
    }
}

/// A log entry. The body may be a plain string or a structured map.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: SystemTime,
    pub observed_timestamp: SystemTime,
    pub severity: Severity,
    pub body: AttributeValue,
    pub attributes: Attributes,
    pub span_context: Option<SpanContext>,
    pub scope: InstrumentationScope,
}

impl LogEntry {
    /// Start building an entry with `Info` severity stamped now.
    pub fn builder(body: impl Into<AttributeValue>) -> LogEntryBuilder {
        let now = SystemTime::now();
        LogEntryBuilder {
            entry: LogEntry {
                timestamp: now,
                observed_timestamp: now,
                severity: Severity::Info,
                body: body.into(),
                attributes: Attributes::new(),
                span_context: None,
                scope: InstrumentationScope::default(),
            },
        }
    }
}

/// Builder returned by [`LogEntry::builder`].
#[derive(Debug, Clone)]
pub struct LogEntryBuilder {
    entry: LogEntry,
}

impl LogEntryBuilder {
    pub fn severity(mut self, severity: Severity) -> Self {
        self.entry.severity = severity;
        self
    }

    pub fn timestamp(mut self, timestamp: SystemTime) -> Self {
        self.entry.timestamp = timestamp;
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.entry.attributes.set(key, value);
        self
    }

    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.entry.attributes = attributes;
        self
    }

    pub fn span_context(mut self, ctx: SpanContext) -> Self {
        self.entry.span_context = Some(ctx);
        self
    }

    pub fn build(self) -> LogEntry {
        self.entry
    }
}

/// Kind of instrument a metric point came from.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricKind {
    /// Monotonic sum; each point is a delta.
    Counter,
    /// Non-monotonic sum; each point is a delta.
    UpDownCounter,
    /// Distribution with explicit bucket upper bounds.
    Histogram { bounds: Arc<[f64]> },
    /// Last observed value.
    Gauge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Double(f64),
}

impl MetricValue {
    pub fn as_f64(self) -> f64 {
        match self {
            MetricValue::Int(i) => i as f64,
            MetricValue::Double(d) => d,
        }
    }
}

/// One observation made through a meter instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub kind: MetricKind,
    pub value: MetricValue,
    pub attributes: Attributes,
    pub time: SystemTime,
    pub scope: InstrumentationScope,
}

/// A unit of telemetry.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Span(SpanData),
    Log(LogEntry),
    Metric(MetricPoint),
}

impl Record {
    pub fn signal(&self) -> Signal {
        match self {
            Record::Span(_) => Signal::Traces,
            Record::Log(_) => Signal::Logs,
            Record::Metric(_) => Signal::Metrics,
        }
    }

    /// Variant name used as the item label in console dumps.
    pub fn type_name(&self) -> &'static str {
        match self {
            Record::Span(_) => "Span",
            Record::Log(_) => "LogEntry",
            Record::Metric(_) => "MetricPoint",
        }
    }

    pub fn scope(&self) -> &InstrumentationScope {
        match self {
            Record::Span(s) => &s.scope,
            Record::Log(l) => &l.scope,
            Record::Metric(m) => &m.scope,
        }
    }
}

impl From<SpanData> for Record {
    fn from(s: SpanData) -> Self {
        Record::Span(s)
    }
}

impl From<LogEntry> for Record {
    fn from(l: LogEntry) -> Self {
        Record::Log(l)
    }
}

impl From<MetricPoint> for Record {
    fn from(m: MetricPoint) -> Self {
        Record::Metric(m)
    }
}

/// Nanoseconds since the Unix epoch; times before the epoch clamp to zero.
pub fn unix_nanos(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Fresh random trace id.
pub fn new_trace_id() -> TraceId {
    loop {
        let id = TraceId::from_bytes(rand::random::<[u8; 16]>());
        if id != TraceId::INVALID {
            return id;
        }
    }
}

/// Fresh random span id.
pub fn new_span_id() -> SpanId {
    loop {
        let id = SpanId::from_bytes(rand::random::<[u8; 8]>());
        if id != SpanId::INVALID {
            return id;
        }
    }
}
