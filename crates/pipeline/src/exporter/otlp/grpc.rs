//! OTLP/gRPC transport over a lazily connected tonic channel.

use std::time::Duration;

use opentelemetry_proto::tonic::collector::logs::v1::logs_service_client::LogsServiceClient;
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_client::MetricsServiceClient;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::Code;

use super::encode::ExportRequest;
use super::partial;
use crate::error::{ConfigurationError, ExportError};
use crate::exporter::PartialSuccess;
use crate::tls::ChannelSecurity;

#[derive(Debug, Clone)]
pub(crate) struct GrpcTransport {
    channel: Channel,
    auth: Option<MetadataValue<Ascii>>,
}

impl GrpcTransport {
    /// Build the channel for `authority` (`host:port`).
    ///
    /// No connection is attempted here. If tonic refuses the CA bundle the
    /// channel is built in plaintext and the returned security says so.
    /// Must be called from within a tokio runtime.
    pub(crate) fn connect(
        authority: &str,
        security: ChannelSecurity,
        bearer_token: Option<&str>,
        timeout: Duration,
    ) -> Result<(Self, ChannelSecurity), ConfigurationError> {
        let auth: Option<MetadataValue<Ascii>> = bearer_token
            .map(|t| {
                MetadataValue::try_from(format!("Bearer {t}"))
                    .map_err(|_| ConfigurationError::InvalidBearerToken)
            })
            .transpose()?;

        let (endpoint, security) = match security {
            ChannelSecurity::Tls(bundle) => {
                let tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(&bundle.pem[..]));
                match endpoint(&format!("https://{authority}"), timeout)?.tls_config(tls) {
                    Ok(ep) => (ep, ChannelSecurity::Tls(bundle)),
                    Err(e) => (
                        endpoint(&format!("http://{authority}"), timeout)?,
                        ChannelSecurity::fallback(format!(
                            "gRPC transport rejected {}: {e}",
                            bundle.path.display()
                        )),
                    ),
                }
            }
            insecure => (endpoint(&format!("http://{authority}"), timeout)?, insecure),
        };

        Ok((
            Self {
                channel: endpoint.connect_lazy(),
                auth,
            },
            security,
        ))
    }

    pub(crate) async fn export(
        &self,
        request: ExportRequest,
    ) -> Result<Option<PartialSuccess>, ExportError> {
        match request {
            ExportRequest::Traces(req) => {
                let resp = TraceServiceClient::new(self.channel.clone())
                    .export(self.request(req))
                    .await
                    .map_err(status_error)?
                    .into_inner();
                Ok(resp
                    .partial_success
                    .and_then(|p| partial(p.rejected_spans, p.error_message)))
            }
            ExportRequest::Metrics(req) => {
                let resp = MetricsServiceClient::new(self.channel.clone())
                    .export(self.request(req))
                    .await
                    .map_err(status_error)?
                    .into_inner();
                Ok(resp
                    .partial_success
                    .and_then(|p| partial(p.rejected_data_points, p.error_message)))
            }
            ExportRequest::Logs(req) => {
                let resp = LogsServiceClient::new(self.channel.clone())
                    .export(self.request(req))
                    .await
                    .map_err(status_error)?
                    .into_inner();
                Ok(resp
                    .partial_success
                    .and_then(|p| partial(p.rejected_log_records, p.error_message)))
            }
        }
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        if let Some(auth) = &self.auth {
            request.metadata_mut().insert("authorization", auth.clone());
        }
        request
    }
}

fn endpoint(url: &str, timeout: Duration) -> Result<Endpoint, ConfigurationError> {
    Endpoint::from_shared(url.to_owned())
        .map(|ep| ep.timeout(timeout))
        .map_err(|e| ConfigurationError::InvalidEndpoint {
            endpoint: url.to_owned(),
            reason: e.to_string(),
        })
}

fn status_error(status: tonic::Status) -> ExportError {
    match status.code() {
        Code::Unavailable | Code::Unknown => ExportError::Transport(status.message().to_owned()),
        Code::DeadlineExceeded => ExportError::Transport(format!(
            "deadline exceeded: {}",
            status.message()
        )),
        code => ExportError::Rejected {
            code: code as u16,
            message: status.message().to_owned(),
        },
    }
}
