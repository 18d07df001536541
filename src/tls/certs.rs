//! Trust material and client identity loading.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;

use crate::tls::TlsError;

fn open(path: &Path) -> Result<BufReader<File>, std::io::Error> {
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("file not found: {:?}", path),
        ));
    }
    Ok(BufReader::new(File::open(path)?))
}

/// Decode one base64-encoded DER certificate.
pub fn decode_base64_der(encoded: &str) -> Result<CertificateDer<'static>, TlsError> {
    let der = STANDARD
        .decode(encoded.trim())
        .map_err(|e| TlsError::CaCertificate(format!("base64: {}", e)))?;
    Ok(CertificateDer::from(der))
}

/// Read every certificate in a PEM file.
pub fn read_pem_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let read_err = |source: std::io::Error| TlsError::ReadFile {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = open(path).map_err(read_err)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;
    if certs.is_empty() {
        return Err(TlsError::CaCertificate(format!(
            "no certificates found in {:?}",
            path
        )));
    }
    Ok(certs)
}

/// Read the first private key (PKCS#1, PKCS#8 or SEC1) in a PEM file.
pub fn read_pem_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let read_err = |source: std::io::Error| TlsError::ReadFile {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = open(path).map_err(read_err)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(read_err)?
        .ok_or_else(|| TlsError::KeyPair(format!("no private key found in {:?}", path)))
}

/// Build a trust store from inline base64 DER certificates and PEM files.
///
/// Returns `None` when no trust material is configured.
pub fn build_root_store(
    inline: &[String],
    pem_files: &[impl AsRef<Path>],
) -> Result<Option<RootCertStore>, TlsError> {
    if inline.is_empty() && pem_files.is_empty() {
        return Ok(None);
    }

    let mut store = RootCertStore::empty();
    for encoded in inline {
        let cert = decode_base64_der(encoded)?;
        store
            .add(cert)
            .map_err(|e| TlsError::CaCertificate(e.to_string()))?;
    }
    for path in pem_files {
        for cert in read_pem_certs(path.as_ref())? {
            store
                .add(cert)
                .map_err(|e| TlsError::CaCertificate(e.to_string()))?;
        }
    }
    Ok(Some(store))
}

/// The public webpki trust roots.
pub fn webpki_root_store() -> RootCertStore {
    let mut store = RootCertStore::empty();
    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    store
}

/// Load a client certificate chain and key from PEM files.
pub fn load_key_pair(
    cert_file: &Path,
    key_file: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TlsError> {
    let chain = read_pem_certs(cert_file).map_err(|e| match e {
        TlsError::CaCertificate(msg) => TlsError::KeyPair(msg),
        other => other,
    })?;
    let key = read_pem_key(key_file)?;
    Ok((chain, key))
}
