//! Client certificates sourced from a certificate manager.
//!
//! # Responsibilities
//! - Define the contract for a certificate-management collaborator
//! - Resolve a client certificate per handshake from the manager's current
//!   set, so renewed certificates are picked up without rebuilding the client
//!
//! # Data Flow
//! ```text
//! provision:  CertificateManager::manage([identity])
//! handshake:  server CertificateRequest (signature schemes)
//!     → AutomatedClientCert::resolve
//!     → matching_certificates(identity)
//!     → first certificate whose key can sign with an offered scheme
//! ```

use std::fmt;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use rustls::client::ResolvesClientCert;
use rustls::sign::CertifiedKey;
use rustls::SignatureScheme;

use crate::tls::TlsError;
use crate::BoxError;

/// A collaborator that obtains and renews certificates for identity names.
pub trait CertificateManager: fmt::Debug + Send + Sync {
    /// Start managing certificates for `names`. Idempotent.
    fn manage(&self, names: &[String]) -> Result<(), BoxError>;

    /// Current certificates whose subject matches `name`, best first.
    fn matching_certificates(&self, name: &str) -> Vec<Arc<CertifiedKey>>;
}

/// Picks the managed certificate for one identity on every handshake.
///
/// rustls's `ResolvesClientCert` cannot fail the handshake. When no managed
/// certificate fits, nothing is presented: a server that requires client auth
/// rejects the connection, and one with optional client auth completes it
/// anonymously.
#[derive(Debug)]
pub struct AutomatedClientCert {
    identity: String,
    manager: Arc<dyn CertificateManager>,
}

impl AutomatedClientCert {
    /// Register `identity` with the manager and build the resolver.
    pub fn register(
        identity: &str,
        manager: Arc<dyn CertificateManager>,
    ) -> Result<Self, TlsError> {
        manager
            .manage(&[identity.to_string()])
            .map_err(|e| TlsError::Manage {
                identity: identity.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            identity: identity.to_string(),
            manager,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// First matching certificate able to sign with one of `sigschemes`.
    pub fn select(&self, sigschemes: &[SignatureScheme]) -> Option<Arc<CertifiedKey>> {
        self.manager
            .matching_certificates(&self.identity)
            .into_iter()
            .find(|cert| cert.key.choose_scheme(sigschemes).is_some())
    }
}

impl ResolvesClientCert for AutomatedClientCert {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        let selected = self.select(sigschemes);
        if selected.is_none() {
            tracing::warn!(
                identity = %self.identity,
                "No managed client certificate satisfies the server's certificate request"
            );
        }
        selected
    }

    fn has_certs(&self) -> bool {
        true
    }
}

/// In-memory certificate manager. Renewed certificates are added with
/// [`insert`](Self::insert) and take precedence over older ones.
#[derive(Debug, Default)]
pub struct CertificateStore {
    managed: DashSet<String>,
    certificates: DashMap<String, Vec<Arc<CertifiedKey>>>,
}

impl CertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a certificate for `identity`, ahead of any existing ones.
    pub fn insert(&self, identity: &str, cert: Arc<CertifiedKey>) {
        self.certificates
            .entry(identity.to_string())
            .or_default()
            .insert(0, cert);
    }

    pub fn is_managed(&self, identity: &str) -> bool {
        self.managed.contains(identity)
    }
}

impl CertificateManager for CertificateStore {
    fn manage(&self, names: &[String]) -> Result<(), BoxError> {
        for name in names {
            if self.managed.insert(name.clone()) {
                tracing::info!(identity = %name, "Managing client certificate");
            }
        }
        Ok(())
    }

    fn matching_certificates(&self, name: &str) -> Vec<Arc<CertifiedKey>> {
        self.certificates
            .get(name)
            .map(|certs| certs.value().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};

    fn certified(alg: &'static rcgen::SignatureAlgorithm) -> Arc<CertifiedKey> {
        let key_pair = rcgen::KeyPair::generate_for(alg).unwrap();
        let params = rcgen::CertificateParams::new(vec!["client.internal".to_string()]).unwrap();
        let cert = params.self_signed(&key_pair).unwrap();

        let provider = rustls::crypto::ring::default_provider();
        let key = PrivatePkcs8KeyDer::from(key_pair.serialize_der());
        let signing_key = provider.key_provider.load_private_key(key.into()).unwrap();
        Arc::new(CertifiedKey::new(
            vec![CertificateDer::from(cert.der().to_vec())],
            signing_key,
        ))
    }

    #[test]
    fn register_calls_manage() {
        let store = Arc::new(CertificateStore::new());
        let resolver = AutomatedClientCert::register("client.internal", store.clone()).unwrap();
        assert!(store.is_managed("client.internal"));
        assert_eq!(resolver.identity(), "client.internal");
    }

    #[test]
    fn selects_first_certificate_supporting_offered_scheme() {
        let store = Arc::new(CertificateStore::new());
        let ecdsa = certified(&rcgen::PKCS_ECDSA_P256_SHA256);
        let ed25519 = certified(&rcgen::PKCS_ED25519);
        store.insert("client.internal", ecdsa.clone());
        store.insert("client.internal", ed25519.clone());

        let resolver = AutomatedClientCert::register("client.internal", store).unwrap();

        let picked = resolver.select(&[SignatureScheme::ED25519]).unwrap();
        assert!(Arc::ptr_eq(&picked, &ed25519));

        let picked = resolver
            .select(&[SignatureScheme::ECDSA_NISTP256_SHA256])
            .unwrap();
        assert!(Arc::ptr_eq(&picked, &ecdsa));
    }

    #[test]
    fn no_matching_certificate_presents_nothing() {
        let store = Arc::new(CertificateStore::new());
        store.insert("client.internal", certified(&rcgen::PKCS_ECDSA_P256_SHA256));
        let resolver = AutomatedClientCert::register("client.internal", store).unwrap();

        assert!(resolver.resolve(&[], &[SignatureScheme::RSA_PSS_SHA256]).is_none());
        assert!(resolver.select(&[]).is_none());
    }
}
