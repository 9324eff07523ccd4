//! Configuration loading and validation for the traffic simulator.

use std::time::Duration;

use anyhow::{Context, Result};
use pipeline::TelemetryConfig;
use serde::Deserialize;

/// Validated simulator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Pause between two simulated requests.
    #[serde(default = "default_sim_interval_ms")]
    pub sim_interval_ms: u64,

    /// Probability in `[0, 1]` that a simulated request fails.
    #[serde(default = "default_sim_error_rate")]
    pub sim_error_rate: f64,

    /// Dump every export to stdout.
    #[serde(default)]
    pub intercept_exports: bool,

    #[serde(skip)]
    pub telemetry: TelemetryConfig,
}

fn default_sim_interval_ms() -> u64 {
    10_000
}
fn default_sim_error_rate() -> f64 {
    0.1
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// `SERVICE_NAME` falls back to `service_name` when unset.
    pub fn from_env(service_name: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .set_default("service_name", service_name)
            .context("failed to set configuration defaults")?
            .add_source(config::Environment::default())
            .build()
            .context("failed to build traffic-sim configuration")?;

        let mut c: Config = cfg
            .clone()
            .try_deserialize()
            .context("failed to deserialise traffic-sim configuration")?;
        c.telemetry = cfg
            .try_deserialize()
            .context("failed to deserialise telemetry configuration")?;

        c.validate()?;
        Ok(c)
    }

    fn validate(&self) -> Result<()> {
        if self.sim_interval_ms == 0 {
            anyhow::bail!("SIM_INTERVAL_MS must be > 0");
        }
        if !(0.0..=1.0).contains(&self.sim_error_rate) {
            anyhow::bail!("SIM_ERROR_RATE must be within [0, 1]");
        }
        self.telemetry.validate()
    }

    pub fn sim_interval(&self) -> Duration {
        Duration::from_millis(self.sim_interval_ms)
    }
}
