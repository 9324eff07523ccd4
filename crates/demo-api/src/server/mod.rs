//! Axum HTTP server, routing, and handlers.
//!
//! # Responsibilities
//! - Define the Axum router with all routes and shared middleware.
//! - Inject shared application state (`AppState`) into handlers.
//! - Serve until a shutdown signal arrives.

pub mod handlers;
pub mod router;
pub mod state;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

/// Serve `router` on `0.0.0.0:port` until Ctrl-C.
pub async fn serve(router: Router, port: u16) -> Result<()> {
    let addr: std::net::SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C; shutting down");
        return;
    }
    info!("shutdown signal received");
}
