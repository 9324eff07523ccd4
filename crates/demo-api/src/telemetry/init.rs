//! Telemetry initialisation: local subscriber, OTLP pipelines, interception.

use anyhow::{Context, Result};
use pipeline::subscriber::{self, LogFormat};
use pipeline::{DumpSink, LogBridgeLayer, Telemetry, TelemetryConfig};
use tracing::{info, warn};

/// Logger scope of application `tracing` events forwarded to the logs pipeline.
const BRIDGE_SCOPE: &str = "demo-api.tracing";

/// Initialise the global tracing subscriber and the three OTLP pipelines.
///
/// Configures:
/// - A JSON (or pretty) `tracing_subscriber` fmt layer for local structured output.
/// - A [`LogBridgeLayer`] forwarding application events to the logs pipeline.
/// - The traces, metrics and logs pipelines, with their exporters wrapped by
///   the console dump decorator when `intercept` is set.
///
/// Must be called from within the tokio runtime.
///
/// # Errors
///
/// Returns an error if the subscriber is already installed or the pipelines
/// cannot be built from `cfg`.
pub fn init_telemetry(cfg: &TelemetryConfig, intercept: bool) -> Result<Telemetry> {
    let bridge = LogBridgeLayer::new();
    subscriber::init(
        &cfg.log_level,
        LogFormat::from_name(&cfg.log_format),
        Some(bridge.clone()),
    )?;

    let telemetry = Telemetry::build(cfg).context("failed to build telemetry pipelines")?;
    bridge.attach(telemetry.logger(BRIDGE_SCOPE));

    if intercept {
        for report in telemetry.intercept_all(&DumpSink::stdout()) {
            info!(
                signal = %report.signal,
                wrapped = report.wrapped(),
                processors = report.outcomes.len(),
                "interception bound"
            );
        }
    } else {
        warn!("export interception disabled; payloads will not be dumped");
    }

    Ok(telemetry)
}
