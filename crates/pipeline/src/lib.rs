//! Batching telemetry pipelines for traces, metrics and logs, exported to an
//! OTLP collector, with an interception layer that dumps every export
//! request and collector reply to the console.
//!
//! # Layout
//!
//! - [`record`], [`value`], [`resource`]: the data model.
//! - [`exporter`]: the OTLP exporter (gRPC or HTTP/protobuf) and the console exporter.
//! - [`processor`]: batching, periodic and immediate processors.
//! - [`trace`], [`metrics`], [`logs`]: providers and the instrumentation API.
//! - [`bootstrap`]: builds all three pipelines from [`config::TelemetryConfig`].
//! - [`intercept`], [`dump`]: exporter discovery, the decorator and the console dump.
//! - [`bridge`], [`subscriber`]: local `tracing` output and its forwarding into the logs pipeline.

pub mod bootstrap;
pub mod bridge;
pub mod config;
pub mod dump;
pub mod error;
pub mod exporter;
pub mod intercept;
pub mod logs;
pub mod metrics;
pub mod processor;
pub mod provider;
pub mod record;
pub mod resource;
pub mod subscriber;
pub mod tls;
pub mod trace;
pub mod value;

pub use bootstrap::Telemetry;
pub use bridge::LogBridgeLayer;
pub use config::TelemetryConfig;
pub use dump::DumpSink;
pub use error::{ConfigurationError, ExportError, InterceptionError, SlotError};
pub use record::{LogEntry, Record, Severity, Signal};
pub use value::{AttributeValue, Attributes, KeyValue};
