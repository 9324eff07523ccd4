//! Construction of the three signal pipelines from a [`TelemetryConfig`].

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::TelemetryConfig;
use crate::dump::DumpSink;
use crate::error::ConfigurationError;
use crate::exporter::{ConsoleExporter, OtlpExporter, OtlpSettings, SharedExporter};
use crate::intercept::{count_intercepted, intercept_pipeline, InterceptionReport};
use crate::logs::{Logger, LoggerProvider};
use crate::metrics::{Meter, MeterProvider};
use crate::processor::{BatchConfig, BatchProcessor, PeriodicReader, Processor, SimpleProcessor};
use crate::provider::Pipeline;
use crate::record::Signal;
use crate::resource::Resource;
use crate::tls::{self, ChannelSecurity};
use crate::trace::{Tracer, TracerProvider};

/// The telemetry context of a process: one provider per signal.
///
/// Cheap to clone; clones share the same pipelines.
#[derive(Debug, Clone)]
pub struct Telemetry {
    resource: Resource,
    security: ChannelSecurity,
    traces: TracerProvider,
    metrics: MeterProvider,
    logs: LoggerProvider,
    shutdown_timeout: Duration,
}

impl Telemetry {
    /// Build all three pipelines. Nothing connects until the first export.
    ///
    /// Must be called from within a tokio runtime: every batch processor
    /// spawns its flush task here.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError`] for an unknown transport, an unusable endpoint
    /// or bearer token. An unusable CA file is not an error; the channel
    /// falls back to plaintext with a warning.
    pub fn build(cfg: &TelemetryConfig) -> Result<Self, ConfigurationError> {
        let transport = cfg.transport()?;
        let resource = Resource::for_service(&cfg.service_name, &cfg.service_namespace, &cfg.app_env);
        let settings = OtlpSettings {
            endpoint: cfg.collector_endpoint.clone(),
            transport,
            bearer_token: Some(cfg.bearer_token.clone()).filter(|t| !t.is_empty()),
            security: tls::resolve(&cfg.tls_mode()),
            timeout: cfg.export_timeout(),
        };

        let span_exporter = OtlpExporter::new(Signal::Traces, &settings, resource.clone())?;
        // The transport may have downgraded the channel; the other exporters
        // reuse what it settled on.
        let settings = OtlpSettings {
            security: span_exporter.security().clone(),
            ..settings
        };
        let metric_exporter = OtlpExporter::new(Signal::Metrics, &settings, resource.clone())?;
        let log_exporter = OtlpExporter::new(Signal::Logs, &settings, resource.clone())?;

        let batch = BatchConfig::from_config(cfg);
        let mirror = cfg.enable_console_mirror;

        let traces = TracerProvider::new(assemble(
            Signal::Traces,
            &resource,
            Arc::new(BatchProcessor::new(Signal::Traces, Arc::new(span_exporter), batch)),
            mirror,
        ));
        let metrics = MeterProvider::new(assemble(
            Signal::Metrics,
            &resource,
            Arc::new(PeriodicReader::new(
                Arc::new(metric_exporter),
                BatchConfig::periodic(cfg),
            )),
            mirror,
        ));
        let logs = LoggerProvider::new(assemble(
            Signal::Logs,
            &resource,
            Arc::new(BatchProcessor::new(Signal::Logs, Arc::new(log_exporter), batch)),
            mirror,
        ));

        let security = settings.security;
        info!(
            service = %cfg.service_name,
            endpoint = %cfg.collector_endpoint,
            transport = ?transport,
            tls = security.is_tls(),
            console_mirror = mirror,
            "telemetry pipelines ready"
        );

        Ok(Self {
            resource,
            security,
            traces,
            metrics,
            logs,
            shutdown_timeout: cfg.shutdown_timeout(),
        })
    }

    pub fn tracer(&self, name: impl Into<Cow<'static, str>>) -> Tracer {
        self.traces.tracer(name)
    }

    pub fn meter(&self, name: impl Into<Cow<'static, str>>) -> Meter {
        self.metrics.meter(name)
    }

    pub fn logger(&self, name: impl Into<Cow<'static, str>>) -> Logger {
        self.logs.logger(name)
    }

    pub fn tracer_provider(&self) -> &TracerProvider {
        &self.traces
    }

    pub fn meter_provider(&self) -> &MeterProvider {
        &self.metrics
    }

    pub fn logger_provider(&self) -> &LoggerProvider {
        &self.logs
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Security of the collector channel, after any fallback.
    pub fn security(&self) -> &ChannelSecurity {
        &self.security
    }

    fn pipelines(&self) -> [&Pipeline; 3] {
        [
            self.logs.pipeline(),
            self.traces.pipeline(),
            self.metrics.pipeline(),
        ]
    }

    /// Wrap the OTLP exporter of every pipeline so that each request and
    /// reply is dumped to `sink`. Safe to call more than once.
    pub fn intercept_all(&self, sink: &DumpSink) -> Vec<InterceptionReport> {
        self.pipelines()
            .into_iter()
            .map(|p| {
                let report = intercept_pipeline(p, sink);
                if report.wrapped() == 0 && report.outcomes.iter().all(Result::is_err) {
                    warn!(signal = %p.signal(), "no exporter could be intercepted");
                }
                report
            })
            .collect()
    }

    /// Exporters currently carrying the console dump decorator.
    pub fn intercepted_count(&self) -> usize {
        self.pipelines().into_iter().map(count_intercepted).sum()
    }

    /// Flush every pipeline; `true` when all finished within `timeout`.
    pub async fn force_flush(&self, timeout: Duration) -> bool {
        let logs = self.logs.force_flush(timeout).await;
        let traces = self.traces.force_flush(timeout).await;
        let metrics = self.metrics.force_flush(timeout).await;
        logs && traces && metrics
    }

    /// Shut down logs, then traces, then metrics, each within the configured
    /// shutdown timeout.
    pub async fn shutdown(&self) -> bool {
        let mut clean = true;
        for pipeline in self.pipelines() {
            let ok = pipeline.shutdown(self.shutdown_timeout).await;
            if !ok {
                warn!(signal = %pipeline.signal(), "pipeline did not shut down cleanly");
            }
            clean &= ok;
        }
        info!(clean, "telemetry shut down");
        clean
    }
}

fn assemble(
    signal: Signal,
    resource: &Resource,
    primary: Arc<dyn Processor>,
    mirror: bool,
) -> Pipeline {
    let pipeline = Pipeline::new(signal, resource.clone()).with_processor(primary);
    if !mirror {
        return pipeline;
    }
    let console: SharedExporter = Arc::new(ConsoleExporter::stdout(signal));
    pipeline.with_processor(Arc::new(SimpleProcessor::new(console)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::BindOutcome;
    use std::path::PathBuf;

    fn local() -> TelemetryConfig {
        TelemetryConfig {
            service_name: "bootstrap-test".into(),
            collector_endpoint: "127.0.0.1:1".into(),
            app_env: "local".into(),
            ..TelemetryConfig::default()
        }
    }

    #[tokio::test]
    async fn missing_ca_falls_back_to_insecure() {
        let cfg = TelemetryConfig {
            ca_file: Some(PathBuf::from("/nonexistent")),
            ..local()
        };
        let telemetry = Telemetry::build(&cfg).unwrap();
        assert!(!telemetry.security().is_tls());
        assert!(matches!(
            telemetry.security(),
            ChannelSecurity::InsecureFallback { .. }
        ));
        assert_eq!(telemetry.resource().service_name(), Some("bootstrap-test"));
    }

    #[tokio::test]
    async fn unknown_transport_is_rejected() {
        let cfg = TelemetryConfig {
            exporter_transport: "udp".into(),
            ..local()
        };
        assert!(matches!(
            Telemetry::build(&cfg),
            Err(ConfigurationError::UnsupportedTransport(_))
        ));
    }

    #[tokio::test]
    async fn intercept_all_wraps_each_pipeline_once() {
        let telemetry = Telemetry::build(&local()).unwrap();
        let (sink, _buf) = DumpSink::buffer();

        let reports = telemetry.intercept_all(&sink);
        let signals: Vec<Signal> = reports.iter().map(|r| r.signal).collect();
        assert_eq!(signals, [Signal::Logs, Signal::Traces, Signal::Metrics]);
        assert!(reports.iter().all(|r| r.wrapped() == 1));
        assert_eq!(telemetry.intercepted_count(), 3);

        let again = telemetry.intercept_all(&sink);
        assert!(again.iter().all(|r| r.wrapped() == 0));
        assert!(again.iter().all(|r| matches!(
            r.outcomes[0],
            Ok(BindOutcome::AlreadyIntercepted { .. })
        )));
        assert_eq!(telemetry.intercepted_count(), 3);
    }

    #[tokio::test]
    async fn console_mirror_is_not_intercepted() {
        let cfg = TelemetryConfig {
            enable_console_mirror: true,
            ..local()
        };
        let telemetry = Telemetry::build(&cfg).unwrap();
        let reports = telemetry.intercept_all(&DumpSink::buffer().0);
        for report in &reports {
            assert_eq!(report.outcomes.len(), 2);
            assert!(report.outcomes[0].is_ok());
            assert!(report.outcomes[1].is_err());
        }
        assert_eq!(telemetry.intercepted_count(), 3);
    }

    #[tokio::test]
    async fn shutdown_is_ordered_and_idempotent() {
        let cfg = TelemetryConfig {
            shutdown_timeout_ms: 200,
            export_timeout_ms: 100,
            ..local()
        };
        let telemetry = Telemetry::build(&cfg).unwrap();
        telemetry.shutdown().await;
        assert!(telemetry.logger_provider().pipeline().is_shut_down());
        assert!(telemetry.tracer_provider().pipeline().is_shut_down());
        assert!(telemetry.meter_provider().pipeline().is_shut_down());
        assert!(telemetry.shutdown().await);
    }
}
