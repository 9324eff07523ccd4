//! `traffic-sim` binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise telemetry (subscriber and OTLP pipelines).
//! 3. Simulate traffic until Ctrl-C.
//! 4. Shut the pipelines down in order: logs, traces, metrics.

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use traffic_sim::config::Config;
use traffic_sim::simulate::Simulator;
use traffic_sim::telemetry;

const SCOPE: &str = "traffic-sim";

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env(SCOPE).map_err(|e| {
        eprintln!("ERROR: traffic-sim configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    let telemetry = telemetry::init(&cfg)?;
    info!(
        interval_ms = cfg.sim_interval_ms,
        error_rate = cfg.sim_error_rate,
        tls = telemetry.security().is_tls(),
        "traffic-sim starting"
    );

    // -----------------------------------------------------------------------
    // 3. Simulation
    // -----------------------------------------------------------------------
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
        }
        on_signal.cancel();
    });

    let mut simulator = Simulator::new(
        telemetry.tracer(SCOPE),
        &telemetry.meter(SCOPE),
        telemetry.logger(SCOPE),
        cfg.sim_error_rate,
    );
    simulator.run(cfg.sim_interval(), cancel).await;

    // -----------------------------------------------------------------------
    // 4. Shutdown
    // -----------------------------------------------------------------------
    telemetry.shutdown().await;
    Ok(())
}
