//! Conversion of record batches into OTLP export requests.
//!
//! Records are grouped by instrumentation scope in first-seen order, under a
//! single resource. Records of another signal than the one requested are
//! skipped.

use opentelemetry::trace::{SpanKind, Status};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{
    any_value, AnyValue, ArrayValue, InstrumentationScope as ProtoScope, KeyValue as ProtoKeyValue,
    KeyValueList,
};
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::metrics::v1::{
    metric, number_data_point, AggregationTemporality, Gauge, Histogram, HistogramDataPoint,
    Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics, Sum,
};
use opentelemetry_proto::tonic::resource::v1::Resource as ProtoResource;
use opentelemetry_proto::tonic::trace::v1::{
    span, status, ResourceSpans, ScopeSpans, Span, Status as ProtoStatus,
};
use prost::Message;

use crate::record::{
    unix_nanos, InstrumentationScope, LogEntry, MetricKind, MetricPoint, MetricValue, Record,
    Signal, SpanData,
};
use crate::resource::Resource;
use crate::value::{AttributeValue, Attributes};

/// One encoded export call, typed by signal.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExportRequest {
    Traces(ExportTraceServiceRequest),
    Metrics(ExportMetricsServiceRequest),
    Logs(ExportLogsServiceRequest),
}

impl ExportRequest {
    /// Protobuf bytes, as posted by the HTTP transport.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        match self {
            ExportRequest::Traces(r) => r.encode_to_vec(),
            ExportRequest::Metrics(r) => r.encode_to_vec(),
            ExportRequest::Logs(r) => r.encode_to_vec(),
        }
    }
}

pub(crate) fn encode(signal: Signal, resource: &Resource, batch: &[Record]) -> ExportRequest {
    let resource = Some(resource_proto(resource));
    match signal {
        Signal::Traces => {
            let scope_spans = group_by_scope(batch, |r| match r {
                Record::Span(s) => Some(s),
                _ => None,
            })
            .into_iter()
            .map(|(scope, spans)| ScopeSpans {
                scope: Some(scope_proto(scope)),
                spans: spans.into_iter().map(span_proto).collect(),
                ..Default::default()
            })
            .collect();
            ExportRequest::Traces(ExportTraceServiceRequest {
                resource_spans: vec![ResourceSpans {
                    resource,
                    scope_spans,
                    ..Default::default()
                }],
            })
        }
        Signal::Logs => {
            let scope_logs = group_by_scope(batch, |r| match r {
                Record::Log(l) => Some(l),
                _ => None,
            })
            .into_iter()
            .map(|(scope, logs)| ScopeLogs {
                scope: Some(scope_proto(scope)),
                log_records: logs.into_iter().map(log_proto).collect(),
                ..Default::default()
            })
            .collect();
            ExportRequest::Logs(ExportLogsServiceRequest {
                resource_logs: vec![ResourceLogs {
                    resource,
                    scope_logs,
                    ..Default::default()
                }],
            })
        }
        Signal::Metrics => {
            let scope_metrics = group_by_scope(batch, |r| match r {
                Record::Metric(m) => Some(m),
                _ => None,
            })
            .into_iter()
            .map(|(scope, points)| ScopeMetrics {
                scope: Some(scope_proto(scope)),
                metrics: metrics_proto(points),
                ..Default::default()
            })
            .collect();
            ExportRequest::Metrics(ExportMetricsServiceRequest {
                resource_metrics: vec![ResourceMetrics {
                    resource,
                    scope_metrics,
                    ..Default::default()
                }],
            })
        }
    }
}

fn group_by_scope<'a, T>(
    batch: &'a [Record],
    pick: impl Fn(&'a Record) -> Option<&'a T>,
) -> Vec<(&'a InstrumentationScope, Vec<&'a T>)> {
    let mut groups: Vec<(&InstrumentationScope, Vec<&T>)> = Vec::new();
    for record in batch {
        let Some(item) = pick(record) else {
            tracing::debug!(kind = record.type_name(), "skipping record of another signal");
            continue;
        };
        let scope = record.scope();
        match groups.iter_mut().find(|(s, _)| *s == scope) {
            Some((_, items)) => items.push(item),
            None => groups.push((scope, vec![item])),
        }
    }
    groups
}

fn any_value(value: &AttributeValue) -> AnyValue {
    let v = match value {
        AttributeValue::Bool(b) => any_value::Value::BoolValue(*b),
        AttributeValue::Int(i) => any_value::Value::IntValue(*i),
        AttributeValue::Double(d) => any_value::Value::DoubleValue(*d),
        AttributeValue::String(s) => any_value::Value::StringValue(s.clone()),
        AttributeValue::Array(items) => any_value::Value::ArrayValue(ArrayValue {
            values: items.iter().map(any_value).collect(),
        }),
        AttributeValue::Map(entries) => any_value::Value::KvlistValue(KeyValueList {
            values: entries
                .iter()
                .map(|(k, v)| ProtoKeyValue {
                    key: k.clone(),
                    value: Some(any_value(v)),
                })
                .collect(),
        }),
    };
    AnyValue { value: Some(v) }
}

fn key_values(attributes: &Attributes) -> Vec<ProtoKeyValue> {
    attributes
        .iter()
        .map(|kv| ProtoKeyValue {
            key: kv.key.clone(),
            value: Some(any_value(&kv.value)),
        })
        .collect()
}

fn resource_proto(resource: &Resource) -> ProtoResource {
    ProtoResource {
        attributes: resource
            .iter()
            .map(|kv| ProtoKeyValue {
                key: kv.key.clone(),
                value: Some(any_value(&kv.value)),
            })
            .collect(),
        ..Default::default()
    }
}

fn scope_proto(scope: &InstrumentationScope) -> ProtoScope {
    ProtoScope {
        name: scope.name.clone(),
        version: scope.version.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn span_proto(s: &SpanData) -> Span {
    let kind = match s.kind {
        SpanKind::Internal => span::SpanKind::Internal,
        SpanKind::Server => span::SpanKind::Server,
        SpanKind::Client => span::SpanKind::Client,
        SpanKind::Producer => span::SpanKind::Producer,
        SpanKind::Consumer => span::SpanKind::Consumer,
    };
    let status = match &s.status {
        Status::Unset => ProtoStatus::default(),
        Status::Ok => ProtoStatus {
            code: status::StatusCode::Ok as i32,
            ..Default::default()
        },
        Status::Error { description } => ProtoStatus {
            code: status::StatusCode::Error as i32,
            message: description.to_string(),
        },
    };

    Span {
        trace_id: s.context.trace_id.to_bytes().to_vec(),
        span_id: s.context.span_id.to_bytes().to_vec(),
        parent_span_id: s
            .parent_span_id
            .map(|id| id.to_bytes().to_vec())
            .unwrap_or_default(),
        name: s.name.clone(),
        kind: kind as i32,
        start_time_unix_nano: unix_nanos(s.start_time),
        end_time_unix_nano: unix_nanos(s.end_time),
        attributes: key_values(&s.attributes),
        events: s
            .events
            .iter()
            .map(|e| span::Event {
                time_unix_nano: unix_nanos(e.time),
                name: e.name.clone(),
                attributes: key_values(&e.attributes),
                ..Default::default()
            })
            .collect(),
        status: Some(status),
        ..Default::default()
    }
}

fn log_proto(l: &LogEntry) -> LogRecord {
    let (trace_id, span_id) = match &l.span_context {
        Some(ctx) => (
            ctx.trace_id.to_bytes().to_vec(),
            ctx.span_id.to_bytes().to_vec(),
        ),
        None => (Vec::new(), Vec::new()),
    };
    LogRecord {
        time_unix_nano: unix_nanos(l.timestamp),
        observed_time_unix_nano: unix_nanos(l.observed_timestamp),
        severity_number: l.severity.number(),
        severity_text: l.severity.text().to_owned(),
        body: Some(any_value(&l.body)),
        attributes: key_values(&l.attributes),
        trace_id,
        span_id,
        ..Default::default()
    }
}

fn same_kind(a: &MetricKind, b: &MetricKind) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// One OTLP metric per (name, instrument kind), data points in arrival order.
fn metrics_proto(points: Vec<&MetricPoint>) -> Vec<Metric> {
    let mut groups: Vec<(&MetricPoint, Vec<&MetricPoint>)> = Vec::new();
    for p in points {
        match groups
            .iter_mut()
            .find(|(first, _)| first.name == p.name && same_kind(&first.kind, &p.kind))
        {
            Some((_, members)) => members.push(p),
            None => groups.push((p, vec![p])),
        }
    }

    groups
        .into_iter()
        .map(|(first, members)| {
            let data = match &first.kind {
                MetricKind::Counter | MetricKind::UpDownCounter => metric::Data::Sum(Sum {
                    data_points: members.iter().map(|p| number_point(p)).collect(),
                    aggregation_temporality: AggregationTemporality::Delta as i32,
                    is_monotonic: matches!(first.kind, MetricKind::Counter),
                }),
                MetricKind::Gauge => metric::Data::Gauge(Gauge {
                    data_points: members.iter().map(|p| number_point(p)).collect(),
                }),
                MetricKind::Histogram { .. } => metric::Data::Histogram(Histogram {
                    data_points: members.iter().map(|p| histogram_point(p)).collect(),
                    aggregation_temporality: AggregationTemporality::Delta as i32,
                }),
            };
            Metric {
                name: first.name.clone(),
                description: first.description.clone(),
                unit: first.unit.clone(),
                data: Some(data),
                ..Default::default()
            }
        })
        .collect()
}

fn number_point(p: &MetricPoint) -> NumberDataPoint {
    let value = match p.value {
        MetricValue::Int(i) => number_data_point::Value::AsInt(i),
        MetricValue::Double(d) => number_data_point::Value::AsDouble(d),
    };
    let t = unix_nanos(p.time);
    NumberDataPoint {
        attributes: key_values(&p.attributes),
        start_time_unix_nano: t,
        time_unix_nano: t,
        value: Some(value),
        ..Default::default()
    }
}

/// Index of the bucket `v` falls into: the first bound `>= v`, else overflow.
pub(crate) fn bucket_index(bounds: &[f64], v: f64) -> usize {
    bounds.iter().position(|b| v <= *b).unwrap_or(bounds.len())
}

fn histogram_point(p: &MetricPoint) -> HistogramDataPoint {
    let bounds: &[f64] = match &p.kind {
        MetricKind::Histogram { bounds } => bounds,
        _ => &[],
    };
    let v = p.value.as_f64();
    let mut bucket_counts = vec![0u64; bounds.len() + 1];
    bucket_counts[bucket_index(bounds, v)] = 1;
    let t = unix_nanos(p.time);

    HistogramDataPoint {
        attributes: key_values(&p.attributes),
        start_time_unix_nano: t,
        time_unix_nano: t,
        count: 1,
        sum: Some(v),
        bucket_counts,
        explicit_bounds: bounds.to_vec(),
        min: Some(v),
        max: Some(v),
        ..Default::default()
    }
}
