//! TLS material for the collector channel.
//!
//! A CA file that cannot be used never aborts startup: [`resolve`] logs a
//! warning and degrades to [`ChannelSecurity::InsecureFallback`], which is
//! reported as insecure everywhere (health endpoint, startup log).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use tracing::{info, warn};

use crate::config::TlsMode;
use crate::error::ConfigurationError;

/// PEM bundle of trusted CA certificates read from disk.
#[derive(Debug, Clone)]
pub struct CaBundle {
    pub path: PathBuf,
    /// Raw file contents, handed to the gRPC transport as-is.
    pub pem: Arc<[u8]>,
    certs: Vec<CertificateDer<'static>>,
}

impl CaBundle {
    pub fn cert_count(&self) -> usize {
        self.certs.len()
    }

    /// Build a rustls client configuration trusting only this bundle.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::TlsSetup`] if none of the certificates is
    /// acceptable to rustls.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigurationError> {
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(self.certs.iter().cloned());
        if added == 0 {
            return Err(ConfigurationError::TlsSetup(format!(
                "none of the {ignored} certificate(s) in {} is a valid trust anchor",
                self.path.display()
            )));
        }

        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigurationError::TlsSetup(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(config)
    }
}

/// Security of the collector channel after resolving the configured [`TlsMode`].
#[derive(Debug, Clone)]
pub enum ChannelSecurity {
    /// Plaintext, as configured.
    Insecure,
    /// TLS trusting the given CA bundle.
    Tls(CaBundle),
    /// TLS was requested but its material was unusable; plaintext instead.
    InsecureFallback { reason: String },
}

impl ChannelSecurity {
    pub fn is_tls(&self) -> bool {
        matches!(self, ChannelSecurity::Tls(_))
    }

    /// Downgrade after a transport refused the TLS material.
    pub fn fallback(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!(reason = %reason, "TLS unavailable; using an insecure collector channel");
        ChannelSecurity::InsecureFallback { reason }
    }
}

/// Read and parse a PEM CA file.
///
/// # Errors
///
/// [`ConfigurationError::CaFileUnreadable`] if the file cannot be read,
/// [`ConfigurationError::CaFileInvalid`] if it holds no certificate.
pub fn load_ca(path: &Path) -> Result<CaBundle, ConfigurationError> {
    let pem = std::fs::read(path).map_err(|source| ConfigurationError::CaFileUnreadable {
        path: path.to_owned(),
        source,
    })?;

    let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(pem.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ConfigurationError::CaFileInvalid {
            path: path.to_owned(),
        })?;

    if certs.is_empty() {
        return Err(ConfigurationError::CaFileInvalid {
            path: path.to_owned(),
        });
    }

    Ok(CaBundle {
        path: path.to_owned(),
        pem: pem.into(),
        certs,
    })
}

/// Turn the configured [`TlsMode`] into the security actually used.
pub fn resolve(mode: &TlsMode) -> ChannelSecurity {
    match mode {
        TlsMode::Insecure => {
            info!("collector channel configured as insecure");
            ChannelSecurity::Insecure
        }
        TlsMode::CaFile(path) => match load_ca(path) {
            Ok(bundle) => {
                info!(
                    path = %bundle.path.display(),
                    certs = bundle.cert_count(),
                    "loaded collector CA bundle"
                );
                ChannelSecurity::Tls(bundle)
            }
            Err(e) => ChannelSecurity::fallback(e.to_string()),
        },
    }
}
