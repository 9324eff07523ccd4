//! Shared parts of the `traffic-sim` and `structured-log` binaries.

pub mod config;
pub mod simulate;
pub mod telemetry;
