//! Telemetry setup: traces, metrics and structured logs exported over OTLP.
//!
//! # Telemetry invariants
//!
//! - Export failures never reach request handling; they are logged and dropped.
//! - Log level is configurable via `RUST_LOG` or `LOG_LEVEL` (default: `info`).
//! - With interception on, every export request and collector reply is
//!   printed to stdout.

pub mod init;

pub use init::init_telemetry;
