//! Telemetry initialisation for the simulator binaries.
//!
//! Both binaries export all three signals over OTLP; application `tracing`
//! events are forwarded to the logs pipeline as well.

use anyhow::{Context, Result};
use pipeline::subscriber::{self, LogFormat};
use pipeline::{DumpSink, LogBridgeLayer, Telemetry};

use crate::config::Config;

/// Initialise the tracing subscriber and the OTLP pipelines.
///
/// Must be called from within the tokio runtime.
///
/// # Errors
///
/// Returns an error if the subscriber has already been set or the pipelines
/// cannot be built.
pub fn init(cfg: &Config) -> Result<Telemetry> {
    let bridge = LogBridgeLayer::new();
    subscriber::init(
        &cfg.telemetry.log_level,
        LogFormat::from_name(&cfg.telemetry.log_format),
        Some(bridge.clone()),
    )?;

    let telemetry =
        Telemetry::build(&cfg.telemetry).context("failed to build telemetry pipelines")?;
    bridge.attach(telemetry.logger(env!("CARGO_PKG_NAME")));

    if cfg.intercept_exports {
        let wrapped: usize = telemetry
            .intercept_all(&DumpSink::stdout())
            .iter()
            .map(|r| r.wrapped())
            .sum();
        tracing::info!(wrapped, "export interception enabled");
    }
    Ok(telemetry)
}
