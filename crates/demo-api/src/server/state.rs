//! Shared application state injected into every Axum handler.

use std::time::Duration;

use pipeline::logs::Logger;
use pipeline::metrics::Counter;
use pipeline::trace::Tracer;
use pipeline::Telemetry;

/// Instrumentation scope of everything the handlers emit.
pub const SCOPE: &str = "demo-api";

/// Application state shared across all request handlers.
///
/// Every field is `Arc`-backed, so cloning per request copies no telemetry data.
#[derive(Clone)]
pub struct AppState {
    pub telemetry: Telemetry,
    pub tracer: Tracer,
    pub logger: Logger,
    /// `demo.transactions`: completed purchases.
    pub transactions: Counter,
    /// Budget for flushing logs and traces before a purchase responds.
    pub flush_timeout: Duration,
}

impl AppState {
    pub fn new(telemetry: Telemetry, flush_timeout: Duration) -> Self {
        let transactions = telemetry
            .meter(SCOPE)
            .u64_counter("demo.transactions")
            .with_description("Completed purchases")
            .with_unit("1")
            .init();
        Self {
            tracer: telemetry.tracer(SCOPE),
            logger: telemetry.logger(SCOPE),
            transactions,
            flush_timeout,
            telemetry,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use pipeline::TelemetryConfig;

    /// State whose pipelines point at a closed local port; exports fail fast.
    pub(crate) fn state() -> AppState {
        let cfg = TelemetryConfig {
            service_name: "demo-api".into(),
            collector_endpoint: "127.0.0.1:1".into(),
            app_env: "local".into(),
            export_timeout_ms: 200,
            shutdown_timeout_ms: 200,
            ..TelemetryConfig::default()
        };
        let telemetry = Telemetry::build(&cfg).expect("local telemetry builds");
        AppState::new(telemetry, Duration::from_millis(500))
    }
}
