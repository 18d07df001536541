//! Client TLS configuration factory.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::ClientConfig;

use crate::config::TlsConfig;
use crate::tls::automate::{AutomatedClientCert, CertificateManager};
use crate::tls::certs::{build_root_store, load_key_pair, webpki_root_store};
use crate::tls::verifier::NoVerifier;

/// Errors raised while building a client TLS configuration.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("client_certificate_file specified without client_certificate_key_file")]
    CertificateWithoutKey,

    #[error("client_certificate_key_file specified without client_certificate_file")]
    KeyWithoutCertificate,

    #[error("loading client certificate key pair: {0}")]
    KeyPair(String),

    #[error("client_certificate_automate is set but no certificate manager is available")]
    NoCertificateManager,

    #[error("managing client certificate {identity:?}: {reason}")]
    Manage { identity: String, reason: String },

    #[error("invalid CA certificate: {0}")]
    CaCertificate(String),

    #[error("reading {path:?}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TLS renegotiation level {0:?}")]
    Renegotiation(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Renegotiation policy requested by the configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Renegotiation {
    #[default]
    Never,
    OnceAsClient,
    FreelyAsClient,
}

impl FromStr for Renegotiation {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "never" => Ok(Renegotiation::Never),
            "once" => Ok(Renegotiation::OnceAsClient),
            "freely" => Ok(Renegotiation::FreelyAsClient),
            other => Err(TlsError::Renegotiation(other.to_string())),
        }
    }
}

/// The crypto provider used for every upstream TLS connection.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// A built client configuration plus the settings rustls keeps per connection.
#[derive(Debug, Clone)]
pub struct TlsClientConfig {
    config: ClientConfig,
    server_name: Option<String>,
}

impl TlsClientConfig {
    /// Library defaults: webpki roots, no client certificate.
    pub fn library_defaults() -> Result<Self, TlsError> {
        let config = ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(webpki_root_store())
            .with_no_client_auth();
        Ok(Self {
            config,
            server_name: None,
        })
    }

    /// SNI and verification name override, possibly a template.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Set the ALPN protocols offered in the handshake.
    pub fn with_alpn(mut self, protocols: Vec<Vec<u8>>) -> Self {
        self.config.alpn_protocols = protocols;
        self
    }

    pub fn into_parts(self) -> (Arc<ClientConfig>, Option<String>) {
        (Arc::new(self.config), self.server_name)
    }
}

impl TlsConfig {
    /// Whether every field that shapes the client configuration is unset.
    fn is_zero(&self) -> bool {
        self.root_ca_pool.is_empty()
            && self.root_ca_pem_files.is_empty()
            && self.client_certificate_file.is_none()
            && self.client_certificate_key_file.is_none()
            && self.client_certificate_automate.is_none()
            && !self.insecure_skip_verify
            && self.server_name.is_empty()
            && matches!(
                self.renegotiation.parse::<Renegotiation>(),
                Ok(Renegotiation::Never)
            )
    }

    /// Build the client TLS configuration.
    ///
    /// Returns `Ok(None)` when nothing is configured, meaning library
    /// defaults apply.
    pub fn make_tls_client_config(
        &self,
        certificates: Option<&Arc<dyn CertificateManager>>,
    ) -> Result<Option<TlsClientConfig>, TlsError> {
        match (&self.client_certificate_file, &self.client_certificate_key_file) {
            (Some(_), None) => return Err(TlsError::CertificateWithoutKey),
            (None, Some(_)) => return Err(TlsError::KeyWithoutCertificate),
            _ => {}
        }
        let renegotiation: Renegotiation = self.renegotiation.parse()?;

        if self.is_zero() {
            return Ok(None);
        }

        let provider = crypto_provider();
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let roots = build_root_store(&self.root_ca_pool, self.root_ca_pem_files.as_slice())?;
        let builder = if self.insecure_skip_verify {
            tracing::warn!("Upstream TLS certificate verification is disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(NoVerifier::new(provider))
        } else {
            builder.with_root_certificates(roots.unwrap_or_else(webpki_root_store))
        };

        let config = match (
            &self.client_certificate_automate,
            &self.client_certificate_file,
            &self.client_certificate_key_file,
        ) {
            (Some(identity), static_cert, _) => {
                if static_cert.is_some() {
                    tracing::warn!(
                        identity = %identity,
                        "Both a static and an automated client certificate are configured; using the automated one"
                    );
                }
                let manager = certificates.cloned().ok_or(TlsError::NoCertificateManager)?;
                let resolver = AutomatedClientCert::register(identity, manager)?;
                builder.with_client_cert_resolver(Arc::new(resolver))
            }
            (None, Some(cert_file), Some(key_file)) => {
                let (chain, key) = load_key_pair(cert_file, key_file)?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| TlsError::KeyPair(e.to_string()))?
            }
            _ => builder.with_no_client_auth(),
        };

        if renegotiation != Renegotiation::Never {
            tracing::warn!(
                renegotiation = %self.renegotiation,
                "TLS renegotiation is not supported by the TLS library; upstream renegotiation requests will fail"
            );
        }

        Ok(Some(TlsClientConfig {
            config,
            server_name: (!self.server_name.is_empty()).then(|| self.server_name.clone()),
        }))
    }
}
