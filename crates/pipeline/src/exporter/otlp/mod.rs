//! The OTLP exporter, over gRPC or HTTP/protobuf.

mod encode;
mod grpc;
mod http;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use self::encode::encode;
use self::grpc::GrpcTransport;
use self::http::HttpTransport;
use super::{ExportResponse, ExportResult, Exporter, PartialSuccess};
use crate::config::Transport;
use crate::error::{ConfigurationError, ExportError};
use crate::record::{Record, Signal};
use crate::resource::Resource;
use crate::tls::ChannelSecurity;

/// Everything needed to reach the collector, shared by the three signals.
#[derive(Debug, Clone)]
pub struct OtlpSettings {
    /// `host:port`, optionally with an `http://` / `https://` prefix.
    pub endpoint: String,
    pub transport: Transport,
    pub bearer_token: Option<String>,
    pub security: ChannelSecurity,
    pub timeout: Duration,
}

#[derive(Debug)]
enum Wire {
    Grpc(GrpcTransport),
    Http(HttpTransport),
}

/// Exporter for one signal. Its [`Exporter::describe`] always contains
/// [`super::TRANSPORT_MARKER`].
#[derive(Debug)]
pub struct OtlpExporter {
    signal: Signal,
    authority: String,
    resource: Resource,
    wire: Wire,
    security: ChannelSecurity,
    timeout: Duration,
    shut_down: AtomicBool,
}

impl OtlpExporter {
    /// Build the exporter without connecting.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::InvalidEndpoint`] or
    /// [`ConfigurationError::InvalidBearerToken`]. Unusable TLS material is
    /// not an error; it degrades to an insecure channel.
    pub fn new(
        signal: Signal,
        settings: &OtlpSettings,
        resource: Resource,
    ) -> Result<Self, ConfigurationError> {
        let authority = authority(&settings.endpoint)?;
        let token = settings.bearer_token.as_deref().filter(|t| !t.is_empty());

        let (wire, security) = match settings.transport {
            Transport::Grpc => {
                let (t, s) = GrpcTransport::connect(
                    &authority,
                    settings.security.clone(),
                    token,
                    settings.timeout,
                )?;
                (Wire::Grpc(t), s)
            }
            Transport::Http => {
                let (t, s) = HttpTransport::new(&authority, settings.security.clone(), token)?;
                (Wire::Http(t), s)
            }
        };

        Ok(Self {
            signal,
            authority,
            resource,
            wire,
            security,
            timeout: settings.timeout,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Security actually in effect, after any fallback.
    pub fn security(&self) -> &ChannelSecurity {
        &self.security
    }

    fn url(&self) -> String {
        let scheme = if self.security.is_tls() { "https" } else { "http" };
        match &self.wire {
            Wire::Grpc(_) => format!("{scheme}://{}", self.authority),
            Wire::Http(t) => t.url(self.signal),
        }
    }
}

#[async_trait]
impl Exporter for OtlpExporter {
    fn describe(&self) -> String {
        let wire = match self.wire {
            Wire::Grpc(_) => "gRPC",
            Wire::Http(_) => "HTTP",
        };
        format!("OTLP/{wire} {} exporter -> {}", self.signal, self.url())
    }

    async fn export(&self, batch: &[Record]) -> ExportResult {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(ExportError::Shutdown);
        }

        let request = encode(self.signal, &self.resource, batch);
        let call = async {
            match &self.wire {
                Wire::Grpc(t) => t.export(request).await,
                Wire::Http(t) => t.export(self.signal, request).await,
            }
        };
        let partial_success = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ExportError::Timeout(self.timeout.as_millis() as u64))??;

        if let Some(p) = &partial_success {
            warn!(
                signal = %self.signal,
                rejected = p.rejected,
                message = %p.error_message,
                "collector partially rejected export"
            );
        }

        Ok(ExportResponse {
            records: batch.len(),
            partial_success,
        })
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        self.shut_down.store(true, Ordering::Release);
        Ok(())
    }
}

/// `None` when the collector reported nothing rejected.
fn partial(rejected: i64, error_message: String) -> Option<PartialSuccess> {
    if rejected == 0 && error_message.is_empty() {
        None
    } else {
        Some(PartialSuccess {
            rejected,
            error_message,
        })
    }
}

/// Strip any scheme and trailing slash, leaving `host:port`.
fn authority(endpoint: &str) -> Result<String, ConfigurationError> {
    let trimmed = endpoint.trim();
    let rest = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed)
        .trim_end_matches('/');

    let invalid = |reason: &str| ConfigurationError::InvalidEndpoint {
        endpoint: endpoint.to_owned(),
        reason: reason.to_owned(),
    };
    if rest.is_empty() {
        return Err(invalid("missing host"));
    }
    if rest.contains('/') {
        return Err(invalid("a path is not allowed; give host:port only"));
    }
    let uri = format!("http://{rest}")
        .parse::<hyper::Uri>()
        .map_err(|e| invalid(&e.to_string()))?;
    if uri.host().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(rest.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::TRANSPORT_MARKER;
    use crate::record::LogEntry;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
    use prost::Message;
    use std::sync::{Arc, Mutex};

    fn settings(endpoint: &str, transport: Transport) -> OtlpSettings {
        OtlpSettings {
            endpoint: endpoint.into(),
            transport,
            bearer_token: Some("secret".into()),
            security: ChannelSecurity::Insecure,
            timeout: Duration::from_secs(2),
        }
    }

    #[derive(Clone, Default)]
    struct Received(Arc<Mutex<Vec<(Option<String>, Vec<u8>)>>>);

    /// Fake collector answering every POST with `status`.
    async fn collector(status: StatusCode) -> (String, Received) {
        let received = Received::default();
        let sink = received.clone();
        let app = Router::new().route(
            "/v1/logs",
            post(move |headers: HeaderMap, body: Bytes| {
                let sink = sink.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    sink.0.lock().unwrap().push((auth, body.to_vec()));
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr.to_string(), received)
    }

    #[test]
    fn authority_normalisation() {
        assert_eq!(authority("localhost:4317").unwrap(), "localhost:4317");
        assert_eq!(authority("https://otel.example.com:443/").unwrap(), "otel.example.com:443");
        assert!(authority("").is_err());
        assert!(authority("http://host:4318/v1/traces").is_err());
    }

    #[test]
    fn partial_ignores_empty_report() {
        assert_eq!(partial(0, String::new()), None);
        assert!(partial(1, String::new()).is_some());
    }

    #[tokio::test]
    async fn describe_carries_transport_marker() {
        let grpc = OtlpExporter::new(
            Signal::Traces,
            &settings("localhost:4317", Transport::Grpc),
            Resource::default(),
        )
        .unwrap();
        assert!(grpc.describe().contains(TRANSPORT_MARKER));
        assert_eq!(
            grpc.describe(),
            "OTLP/gRPC traces exporter -> http://localhost:4317"
        );

        let http = OtlpExporter::new(
            Signal::Logs,
            &settings("localhost:4318", Transport::Http),
            Resource::default(),
        )
        .unwrap();
        assert_eq!(
            http.describe(),
            "OTLP/HTTP logs exporter -> http://localhost:4318/v1/logs"
        );
    }

    #[tokio::test]
    async fn http_export_posts_protobuf_with_bearer() {
        let (addr, received) = collector(StatusCode::OK).await;
        let exporter = OtlpExporter::new(
            Signal::Logs,
            &settings(&addr, Transport::Http),
            Resource::for_service("svc", "ns", "test"),
        )
        .unwrap();

        let batch = vec![Record::from(LogEntry::builder("hello").build())];
        let resp = exporter.export(&batch).await.unwrap();
        assert_eq!(resp, ExportResponse::accepted(1));

        let calls = received.0.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.as_deref(), Some("Bearer secret"));
        let req = ExportLogsServiceRequest::decode(calls[0].1.as_slice()).unwrap();
        assert_eq!(req.resource_logs[0].scope_logs[0].log_records.len(), 1);
    }

    #[tokio::test]
    async fn http_error_status_is_rejection() {
        let (addr, _) = collector(StatusCode::SERVICE_UNAVAILABLE).await;
        let exporter = OtlpExporter::new(
            Signal::Logs,
            &settings(&addr, Transport::Http),
            Resource::default(),
        )
        .unwrap();
        let err = exporter
            .export(&[Record::from(LogEntry::builder("x").build())])
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Rejected { code: 503, .. }));
    }

    #[tokio::test]
    async fn unreachable_grpc_collector_fails_without_panicking() {
        let exporter = OtlpExporter::new(
            Signal::Logs,
            &settings("127.0.0.1:1", Transport::Grpc),
            Resource::default(),
        )
        .unwrap();
        let result = exporter
            .export(&[Record::from(LogEntry::builder("x").build())])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn export_after_shutdown_fails() {
        let exporter = OtlpExporter::new(
            Signal::Logs,
            &settings("localhost:4318", Transport::Http),
            Resource::default(),
        )
        .unwrap();
        exporter.shutdown().await.unwrap();
        assert_eq!(exporter.export(&[]).await, Err(ExportError::Shutdown));
    }
}
