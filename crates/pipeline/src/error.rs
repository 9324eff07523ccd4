//! Error types of the telemetry pipeline.
//!
//! None of these ever cross the instrumentation boundary: emitting a span,
//! a log entry or a metric point is infallible for the caller. Export and
//! interception failures are logged and absorbed by the processors.

use std::path::PathBuf;

use thiserror::Error;

use crate::record::Signal;

/// Invalid or unusable configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The CA file selected by the TLS mode does not exist or cannot be read.
    #[error("TLS CA file {path} is unreadable: {source}")]
    CaFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The CA file was read but contains no usable PEM certificate.
    #[error("TLS CA file {path} contains no PEM certificate")]
    CaFileInvalid { path: PathBuf },

    /// The certificates were parsed but the TLS client could not be built from them.
    #[error("failed to build TLS client configuration: {0}")]
    TlsSetup(String),

    /// `EXPORTER_TRANSPORT` is neither `grpc` nor `http`.
    #[error("unsupported exporter transport {0:?} (expected \"grpc\" or \"http\")")]
    UnsupportedTransport(String),

    /// The collector endpoint cannot be turned into a URI.
    #[error("invalid collector endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// `BEARER_TOKEN` contains characters not allowed in a header value.
    #[error("bearer token is not a valid header value")]
    InvalidBearerToken,
}

/// Failure of a single `export` call.
///
/// `Clone + PartialEq` so that the interceptor's pass-through guarantee can
/// be asserted directly in tests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportError {
    /// The collector could not be reached or the connection broke mid-call.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The collector answered with a non-success status.
    #[error("collector rejected the export (status {code}): {message}")]
    Rejected { code: u16, message: String },

    /// The export did not complete within the configured export timeout.
    #[error("export timed out after {0} ms")]
    Timeout(u64),

    /// The batch could not be encoded into the wire format.
    #[error("encoding failure: {0}")]
    Encode(String),

    /// The exporter has been shut down.
    #[error("exporter is shut down")]
    Shutdown,
}

/// Reading an exporter slot of a processor failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SlotError {
    /// The owning processor has been shut down; its exporter is no longer reachable.
    #[error("processor is closed")]
    Closed,
}

/// The interception layer could not bind to a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterceptionError {
    /// No slot of the processor (nor of its helper) held a matching exporter.
    #[error("no OTLP exporter found in {processor} for {signal} pipeline")]
    NotFound { signal: Signal, processor: String },
}
