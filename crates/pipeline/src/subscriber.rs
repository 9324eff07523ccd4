//! Process-wide `tracing` subscriber: filtered local output plus the
//! optional bridge into the logs pipeline.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::bridge::LogBridgeLayer;

/// Rendering of the local log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// `pretty` selects [`LogFormat::Pretty`]; anything else is JSON.
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("pretty") {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

/// Build the filter from `RUST_LOG`, falling back to `log_level`.
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// Initialise the global tracing subscriber.
///
/// Configures:
/// - An [`EnvFilter`] from `RUST_LOG`, else `log_level`.
/// - A JSON (or pretty) [`tracing_subscriber::fmt`] layer for local output.
/// - The [`LogBridgeLayer`], when given, forwarding events to the logs pipeline.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(log_level: &str, format: LogFormat, bridge: Option<LogBridgeLayer>) -> Result<()> {
    let fmt_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(fmt_layer)
        .with(bridge)
        .try_init()
        .context("failed to initialise tracing subscriber")?;

    Ok(())
}
