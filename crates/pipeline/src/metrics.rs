//! Meter provider, meters and instruments.
//!
//! Every measurement becomes one [`MetricPoint`]; aggregation into OTLP
//! data points happens at encode time.

use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::provider::Pipeline;
use crate::record::{InstrumentationScope, MetricKind, MetricPoint, MetricValue};
use crate::value::{Attributes, KeyValue};

/// Explicit bucket bounds used when a histogram does not set its own.
pub const DEFAULT_HISTOGRAM_BOUNDS: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1_000.0, 2_500.0, 5_000.0,
    7_500.0, 10_000.0,
];

#[derive(Debug, Clone)]
pub struct MeterProvider {
    pipeline: Arc<Pipeline>,
}

impl MeterProvider {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn meter(&self, name: impl Into<Cow<'static, str>>) -> Meter {
        Meter {
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
pub struct Meter {
    scope: InstrumentationScope,
    pipeline: Arc<Pipeline>,
}

impl Meter {
    pub fn u64_counter(&self, name: impl Into<String>) -> InstrumentBuilder<'_, Counter> {
        self.builder(name, MetricKind::Counter)
    }

    pub fn i64_up_down_counter(&self, name: impl Into<String>) -> InstrumentBuilder<'_, UpDownCounter> {
        self.builder(name, MetricKind::UpDownCounter)
    }

    pub fn f64_histogram(&self, name: impl Into<String>) -> InstrumentBuilder<'_, Histogram> {
        self.builder(
            name,
            MetricKind::Histogram {
                bounds: Arc::from(&DEFAULT_HISTOGRAM_BOUNDS[..]),
            },
        )
    }

    pub fn f64_gauge(&self, name: impl Into<String>) -> InstrumentBuilder<'_, Gauge> {
        self.builder(name, MetricKind::Gauge)
    }

    fn builder<T>(&self, name: impl Into<String>, kind: MetricKind) -> InstrumentBuilder<'_, T> {
        InstrumentBuilder {
            meter: self,
            name: name.into(),
            description: String::new(),
            unit: String::new(),
            kind,
            _instrument: PhantomData,
        }
    }
}

pub struct InstrumentBuilder<'m, T> {
    meter: &'m Meter,
    name: String,
    description: String,
    unit: String,
    kind: MetricKind,
    _instrument: PhantomData<T>,
}

impl<T: From<Instrument>> InstrumentBuilder<'_, T> {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn init(self) -> T {
        T::from(Instrument {
            name: self.name,
            description: self.description,
            unit: self.unit,
            kind: self.kind,
            scope: self.meter.scope.clone(),
            pipeline: Arc::clone(&self.meter.pipeline),
        })
    }
}

impl InstrumentBuilder<'_, Histogram> {
    /// Replace the default bucket upper bounds.
    pub fn with_boundaries(mut self, bounds: Vec<f64>) -> Self {
        self.kind = MetricKind::Histogram {
            bounds: bounds.into(),
        };
        self
    }
}

/// Identity of an instrument and where its points go.
#[derive(Debug, Clone)]
pub struct Instrument {
    name: String,
    description: String,
    unit: String,
    kind: MetricKind,
    scope: InstrumentationScope,
    pipeline: Arc<Pipeline>,
}

impl Instrument {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, value: MetricValue, attributes: &[KeyValue]) {
        self.pipeline.emit(
            MetricPoint {
                name: self.name.clone(),
                description: self.description.clone(),
                unit: self.unit.clone(),
                kind: self.kind.clone(),
                value,
                attributes: attributes.iter().cloned().collect::<Attributes>(),
                time: SystemTime::now(),
                scope: self.scope.clone(),
            }
            .into(),
        );
    }
}

/// Monotonic counter.
#[derive(Debug, Clone)]
pub struct Counter(Instrument);

impl Counter {
    pub fn add(&self, value: u64, attributes: &[KeyValue]) {
        let value = i64::try_from(value).unwrap_or(i64::MAX);
        self.0.emit(MetricValue::Int(value), attributes);
    }
}

/// Counter that may go down.
#[derive(Debug, Clone)]
pub struct UpDownCounter(Instrument);

impl UpDownCounter {
    pub fn add(&self, value: i64, attributes: &[KeyValue]) {
        self.0.emit(MetricValue::Int(value), attributes);
    }
}

/// Distribution of recorded values.
#[derive(Debug, Clone)]
pub struct Histogram(Instrument);

impl Histogram {
    pub fn record(&self, value: f64, attributes: &[KeyValue]) {
        self.0.emit(MetricValue::Double(value), attributes);
    }
}

/// Last observed value.
#[derive(Debug, Clone)]
pub struct Gauge(Instrument);

impl Gauge {
    pub fn record(&self, value: f64, attributes: &[KeyValue]) {
        self.0.emit(MetricValue::Double(value), attributes);
    }
}

impl From<Instrument> for Counter {
    fn from(i: Instrument) -> Self {
        Counter(i)
    }
}

impl From<Instrument> for UpDownCounter {
    fn from(i: Instrument) -> Self {
        UpDownCounter(i)
    }
}

impl From<Instrument> for Histogram {
    fn from(i: Instrument) -> Self {
        Histogram(i)
    }
}

impl From<Instrument> for Gauge {
    fn from(i: Instrument) -> Self {
        Gauge(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::{ExportResponse, MockExporter};
    use crate::processor::SimpleProcessor;
    use crate::record::{Record, Signal};
    use crate::resource::Resource;
    use crate::value::AttributeValue;
    use std::sync::Mutex;

    fn capturing() -> (MeterProvider, Arc<Mutex<Vec<MetricPoint>>>) {
        let points = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&points);
        let mut mock = MockExporter::new();
        mock.expect_export().returning(move |batch| {
            for r in batch {
                if let Record::Metric(m) = r {
                    sink.lock().unwrap().push(m.clone());
                }
            }
            Ok(ExportResponse::accepted(batch.len()))
        });
        let pipeline = Pipeline::new(Signal::Metrics, Resource::default())
            .with_processor(Arc::new(SimpleProcessor::new(Arc::new(mock))));
        (MeterProvider::new(pipeline), points)
    }

    #[test]
    fn counter_emits_point_with_metadata() {
        let (provider, points) = capturing();
        let counter = provider
            .meter("demo")
            .u64_counter("demo.transactions")
            .with_description("Completed purchases")
            .with_unit("1")
            .init();
        counter.add(1, &[KeyValue::new("debug", "raw")]);

        let points = points.lock().unwrap();
        assert_eq!(points.len(), 1);
        let p = &points[0];
        assert_eq!(p.name, "demo.transactions");
        assert_eq!(p.unit, "1");
        assert_eq!(p.kind, MetricKind::Counter);
        assert_eq!(p.value, MetricValue::Int(1));
        assert_eq!(
            p.attributes.get("debug").and_then(AttributeValue::as_str),
            Some("raw")
        );
    }

    #[test]
    fn histogram_bounds() {
        let (provider, points) = capturing();
        let meter = provider.meter("demo");
        meter.f64_histogram("default").init().record(3.0, &[]);
        meter
            .f64_histogram("custom")
            .with_boundaries(vec![1.0, 2.0])
            .init()
            .record(3.0, &[]);

        let points = points.lock().unwrap();
        let MetricKind::Histogram { bounds } = &points[0].kind else {
            panic!("expected histogram");
        };
        assert_eq!(bounds.len(), DEFAULT_HISTOGRAM_BOUNDS.len());
        let MetricKind::Histogram { bounds } = &points[1].kind else {
            panic!("expected histogram");
        };
        assert_eq!(&bounds[..], &[1.0, 2.0]);
    }

    #[test]
    fn up_down_counter_accepts_negative() {
        let (provider, points) = capturing();
        let active = provider.meter("demo").i64_up_down_counter("active").init();
        active.add(1, &[]);
        active.add(-1, &[]);
        let points = points.lock().unwrap();
        assert_eq!(points[1].value, MetricValue::Int(-1));
    }
}
