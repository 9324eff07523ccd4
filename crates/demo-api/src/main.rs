//! `demo-api` binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise telemetry (subscriber, OTLP pipelines, export interception).
//! 3. Build the Axum router and serve until Ctrl-C.
//! 4. Shut the pipelines down in order: logs, traces, metrics.

mod config;
mod server;
mod telemetry;

use anyhow::Result;
use tracing::info;

use config::Config;
use server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    let telemetry = telemetry::init_telemetry(&cfg.telemetry, cfg.intercept_exports)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_port = cfg.listen_port,
        intercepted = telemetry.intercepted_count(),
        tls = telemetry.security().is_tls(),
        "demo-api starting"
    );

    // -----------------------------------------------------------------------
    // 3. HTTP server
    // -----------------------------------------------------------------------
    let state = AppState::new(telemetry.clone(), cfg.request_flush_timeout());
    let served = server::serve(server::router::build(state), cfg.listen_port).await;

    // -----------------------------------------------------------------------
    // 4. Shutdown
    // -----------------------------------------------------------------------
    telemetry.shutdown().await;
    served
}
