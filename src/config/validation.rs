//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that paired fields are set together (client cert + key)
//! - Validate value ranges (ports, renegotiation levels, resolver addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TransportConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system; provisioning repeats the
//!   checks that guard its own invariants

use crate::config::schema::TransportConfig;
use crate::net::resolver::NetworkAddress;
use crate::tls::Renegotiation;

/// A single semantic problem in a transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("resolver: at least one address is required")]
    EmptyResolver,

    #[error("resolver: invalid address {address:?}: {reason}")]
    ResolverAddress { address: String, reason: String },

    #[error("tls: client_certificate_file specified without client_certificate_key_file")]
    CertificateWithoutKey,

    #[error("tls: client_certificate_key_file specified without client_certificate_file")]
    KeyWithoutCertificate,

    #[error("tls: invalid renegotiation level {0:?}")]
    Renegotiation(String),

    #[error("tls: invalid except_ports entry {0:?}")]
    ExceptPort(String),
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &TransportConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(resolver) = &config.resolver {
        if resolver.addresses.is_empty() {
            errors.push(ValidationError::EmptyResolver);
        }
        for address in &resolver.addresses {
            if let Err(e) = address.parse::<NetworkAddress>() {
                errors.push(ValidationError::ResolverAddress {
                    address: address.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    if let Some(tls) = &config.tls {
        match (&tls.client_certificate_file, &tls.client_certificate_key_file) {
            (Some(_), None) => errors.push(ValidationError::CertificateWithoutKey),
            (None, Some(_)) => errors.push(ValidationError::KeyWithoutCertificate),
            _ => {}
        }
        if tls.renegotiation.parse::<Renegotiation>().is_err() {
            errors.push(ValidationError::Renegotiation(tls.renegotiation.clone()));
        }
        for port in &tls.except_ports {
            if port.parse::<u16>().is_err() {
                errors.push(ValidationError::ExceptPort(port.clone()));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
