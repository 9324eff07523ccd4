//! Telemetry configuration loaded from environment variables.
//!
//! Every value has a default so that a bare `cargo run` talks to a local
//! collector on `localhost:4317` over plaintext gRPC.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigurationError;

/// Wire transport used to reach the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Grpc,
    Http,
}

impl FromStr for Transport {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grpc" => Ok(Transport::Grpc),
            "http" | "http/protobuf" => Ok(Transport::Http),
            other => Err(ConfigurationError::UnsupportedTransport(other.to_owned())),
        }
    }
}

/// How the collector channel is secured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    /// Plaintext channel.
    Insecure,
    /// TLS, trusting the PEM certificates in this file.
    CaFile(PathBuf),
}

/// Raw telemetry settings as read from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// `service.name` resource tag.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// `service.namespace` resource tag.
    #[serde(default = "default_service_namespace")]
    pub service_namespace: String,

    /// Collector address, `host:port` or a full URL.
    #[serde(default = "default_collector_endpoint")]
    pub collector_endpoint: String,

    /// `grpc` or `http`.
    #[serde(default = "default_exporter_transport")]
    pub exporter_transport: String,

    /// Sent as `authorization: Bearer <token>` when non-empty.
    #[serde(default)]
    pub bearer_token: String,

    /// `local`, `development` / `dev` / `test`, or anything else for production.
    #[serde(default = "default_app_env")]
    pub app_env: String,

    /// Directory holding `otel-test-ca.pem` and `otel-prod-ca.pem`.
    #[serde(default = "default_ca_dir")]
    pub ca_dir: PathBuf,

    /// Explicit CA file; overrides the `app_env` based selection.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Mirror every record to stdout as it is emitted.
    #[serde(default)]
    pub enable_console_mirror: bool,

    /// Batch processor timer period.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Buffer length that triggers a flush; also the maximum export chunk.
    #[serde(default = "default_max_export_batch_size")]
    pub max_export_batch_size: usize,

    /// Records beyond this many pending ones are dropped.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Upper bound for a single export call.
    #[serde(default = "default_export_timeout_ms")]
    pub export_timeout_ms: u64,

    /// Period of the metrics reader.
    #[serde(default = "default_metric_interval_ms")]
    pub metric_interval_ms: u64,

    /// Per-pipeline budget used by the ordered shutdown.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `json` or `pretty` local log output.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_service_name() -> String {
    "unknown-service".into()
}
fn default_service_namespace() -> String {
    "demo".into()
}
fn default_collector_endpoint() -> String {
    "localhost:4317".into()
}
fn default_exporter_transport() -> String {
    "grpc".into()
}
fn default_app_env() -> String {
    "development".into()
}
fn default_ca_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_flush_interval_ms() -> u64 {
    5_000
}
fn default_max_export_batch_size() -> usize {
    512
}
fn default_max_queue_size() -> usize {
    2_048
}
fn default_export_timeout_ms() -> u64 {
    10_000
}
fn default_metric_interval_ms() -> u64 {
    60_000
}
fn default_shutdown_timeout_ms() -> u64 {
    5_000
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "json".into()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_namespace: default_service_namespace(),
            collector_endpoint: default_collector_endpoint(),
            exporter_transport: default_exporter_transport(),
            bearer_token: String::new(),
            app_env: default_app_env(),
            ca_dir: default_ca_dir(),
            ca_file: None,
            enable_console_mirror: false,
            flush_interval_ms: default_flush_interval_ms(),
            max_export_batch_size: default_max_export_batch_size(),
            max_queue_size: default_max_queue_size(),
            export_timeout_ms: default_export_timeout_ms(),
            metric_interval_ms: default_metric_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl TelemetryConfig {
    /// Load and validate telemetry settings from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build telemetry configuration from environment")?;

        let c: TelemetryConfig = cfg
            .try_deserialize()
            .context("failed to deserialise telemetry configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    pub fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.service_name, "SERVICE_NAME")?;
        ensure_non_empty(&self.collector_endpoint, "COLLECTOR_ENDPOINT")?;
        self.transport()?;

        if self.flush_interval_ms == 0 {
            anyhow::bail!("FLUSH_INTERVAL_MS must be > 0");
        }
        if self.metric_interval_ms == 0 {
            anyhow::bail!("METRIC_INTERVAL_MS must be > 0");
        }
        if self.max_export_batch_size == 0 {
            anyhow::bail!("MAX_EXPORT_BATCH_SIZE must be > 0");
        }
        if self.max_queue_size < self.max_export_batch_size {
            anyhow::bail!("MAX_QUEUE_SIZE must be >= MAX_EXPORT_BATCH_SIZE");
        }
        Ok(())
    }

    /// Parsed `EXPORTER_TRANSPORT`.
    pub fn transport(&self) -> Result<Transport, ConfigurationError> {
        self.exporter_transport.parse()
    }

    /// TLS mode derived from `CA_FILE`, or else from `APP_ENV`.
    ///
    /// `local` is plaintext; `development`, `dev` and `test` trust
    /// `otel-test-ca.pem`; every other environment trusts `otel-prod-ca.pem`.
    pub fn tls_mode(&self) -> TlsMode {
        if let Some(path) = &self.ca_file {
            return TlsMode::CaFile(path.clone());
        }
        match self.app_env.trim().to_ascii_lowercase().as_str() {
            "local" => TlsMode::Insecure,
            "development" | "dev" | "test" => TlsMode::CaFile(self.ca_dir.join("otel-test-ca.pem")),
            _ => TlsMode::CaFile(self.ca_dir.join("otel-prod-ca.pem")),
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn metric_interval(&self) -> Duration {
        Duration::from_millis(self.metric_interval_ms)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
