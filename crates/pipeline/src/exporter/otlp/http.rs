//! OTLP/HTTP transport: protobuf bodies POSTed to `/v1/{signal}`.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceResponse;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceResponse;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceResponse;
use prost::Message;
use rustls::{ClientConfig, RootCertStore};

use super::encode::ExportRequest;
use super::partial;
use crate::error::{ConfigurationError, ExportError};
use crate::exporter::PartialSuccess;
use crate::record::Signal;
use crate::tls::ChannelSecurity;

const PROTOBUF: &str = "application/x-protobuf";

type HttpClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

#[derive(Debug, Clone)]
pub(crate) struct HttpTransport {
    client: HttpClient,
    base: String,
    auth: Option<HeaderValue>,
}

impl HttpTransport {
    /// Build the client for `authority` (`host:port`).
    ///
    /// If rustls refuses the CA bundle the client talks plaintext and the
    /// returned security says so.
    pub(crate) fn new(
        authority: &str,
        security: ChannelSecurity,
        bearer_token: Option<&str>,
    ) -> Result<(Self, ChannelSecurity), ConfigurationError> {
        let auth = bearer_token
            .map(|t| {
                HeaderValue::from_str(&format!("Bearer {t}"))
                    .map_err(|_| ConfigurationError::InvalidBearerToken)
            })
            .transpose()?;

        let (connector, security) = match security {
            ChannelSecurity::Tls(bundle) => match bundle.client_config() {
                Ok(tls) => (
                    HttpsConnectorBuilder::new()
                        .with_tls_config(tls)
                        .https_or_http()
                        .enable_http1()
                        .build(),
                    ChannelSecurity::Tls(bundle),
                ),
                Err(e) => (plaintext_connector()?, ChannelSecurity::fallback(e.to_string())),
            },
            insecure => (plaintext_connector()?, insecure),
        };

        let scheme = if security.is_tls() { "https" } else { "http" };
        let base = format!("{scheme}://{authority}");
        base.parse::<hyper::Uri>()
            .map_err(|e| ConfigurationError::InvalidEndpoint {
                endpoint: base.clone(),
                reason: e.to_string(),
            })?;

        Ok((
            Self {
                client: Client::builder(TokioExecutor::new()).build(connector),
                base,
                auth,
            },
            security,
        ))
    }

    pub(crate) fn url(&self, signal: Signal) -> String {
        format!("{}{}", self.base, signal.http_path())
    }

    pub(crate) async fn export(
        &self,
        signal: Signal,
        request: ExportRequest,
    ) -> Result<Option<PartialSuccess>, ExportError> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.url(signal))
            .header(CONTENT_TYPE, PROTOBUF);
        if let Some(auth) = &self.auth {
            builder = builder.header(AUTHORIZATION, auth.clone());
        }
        let req = builder
            .body(Full::new(Bytes::from(request.to_bytes())))
            .map_err(|e| ExportError::Encode(e.to_string()))?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            return Err(ExportError::Rejected {
                code: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(decode_partial(signal, body))
    }
}

/// Connector for `http://` URLs; it trusts nothing should TLS ever be attempted.
fn plaintext_connector() -> Result<HttpsConnector<HttpConnector>, ConfigurationError> {
    let tls = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigurationError::TlsSetup(e.to_string()))?
        .with_root_certificates(RootCertStore::empty())
        .with_no_client_auth();
    Ok(HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .build())
}

/// Partial success carried by a 2xx body. An empty body is a full success.
fn decode_partial(signal: Signal, body: Bytes) -> Option<PartialSuccess> {
    let decoded = match signal {
        Signal::Traces => ExportTraceServiceResponse::decode(body)
            .map(|r| r.partial_success.map(|p| (p.rejected_spans, p.error_message))),
        Signal::Metrics => ExportMetricsServiceResponse::decode(body)
            .map(|r| r.partial_success.map(|p| (p.rejected_data_points, p.error_message))),
        Signal::Logs => ExportLogsServiceResponse::decode(body)
            .map(|r| r.partial_success.map(|p| (p.rejected_log_records, p.error_message))),
    };
    match decoded {
        Ok(p) => p.and_then(|(rejected, msg)| partial(rejected, msg)),
        Err(e) => {
            tracing::debug!(error = %e, "collector reply is not an OTLP response; ignoring");
            None
        }
    }
}
