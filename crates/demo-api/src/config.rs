//! Configuration of the demo HTTP service.
//!
//! Service settings and telemetry settings are read from the same
//! environment but deserialised separately; see
//! [`pipeline::TelemetryConfig`] for the telemetry variables.

use std::time::Duration;

use anyhow::{Context, Result};
use pipeline::TelemetryConfig;
use serde::Deserialize;

/// Validated demo service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Port the HTTP server listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Wrap the OTLP exporters so that every export is dumped to stdout.
    #[serde(default = "default_intercept_exports")]
    pub intercept_exports: bool,

    /// Budget for the per-request flush of logs and traces.
    #[serde(default = "default_request_flush_timeout_ms")]
    pub request_flush_timeout_ms: u64,

    #[serde(skip)]
    pub telemetry: TelemetryConfig,
}

fn default_listen_port() -> u16 {
    8000
}
fn default_intercept_exports() -> bool {
    true
}
fn default_request_flush_timeout_ms() -> u64 {
    5_000
}
fn default_service_name() -> &'static str {
    "demo-api"
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .set_default("service_name", default_service_name())
            .context("failed to set configuration defaults")?
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let mut c: Config = cfg
            .clone()
            .try_deserialize()
            .context("failed to deserialise service configuration")?;
        c.telemetry = cfg
            .try_deserialize()
            .context("failed to deserialise telemetry configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if self.listen_port == 0 {
            anyhow::bail!("LISTEN_PORT must be > 0");
        }
        if self.request_flush_timeout_ms == 0 {
            anyhow::bail!("REQUEST_FLUSH_TIMEOUT_MS must be > 0");
        }
        self.telemetry.validate()
    }

    pub fn request_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.request_flush_timeout_ms)
    }
}
