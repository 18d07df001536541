//! Transport-level errors.

use std::error::Error as StdError;
use std::time::Duration;

use crate::config::ValidationError;
use crate::net::{ConnectError, DialError, ResolverError};
use crate::tls::TlsError;

/// Provisioning failed; the transport cannot be used.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("invalid transport configuration: {}", join(.0))]
    Invalid(Vec<ValidationError>),

    #[error("resolver: {0}")]
    Resolver(#[from] ResolverError),

    #[error("making TLS client config: {0}")]
    Tls(#[from] TlsError),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single round trip failed.
#[derive(Debug, thiserror::Error)]
pub enum RoundTripError {
    #[error("transport used before provisioning")]
    NotProvisioned,

    #[error("request has no scheme and no Host header")]
    MissingHost,

    #[error("invalid upstream URI: {0}")]
    InvalidUri(String),

    #[error("no response headers from upstream within {0:?}")]
    ResponseHeaderTimeout(Duration),

    #[error("{0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
}

impl RoundTripError {
    /// The connector error behind this failure, if connecting failed.
    pub fn connect_error(&self) -> Option<&ConnectError> {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(connect) = err.downcast_ref::<ConnectError>() {
                return Some(connect);
            }
            current = err.source();
        }
        None
    }

    /// The dial failure behind this error, if any.
    pub fn dial_error(&self) -> Option<&DialError> {
        match self.connect_error() {
            Some(ConnectError::Dial(dial)) => Some(dial),
            _ => None,
        }
    }

    /// Whether the request failed before any byte reached the upstream, so it
    /// may be retried against another upstream.
    pub fn is_dial_error(&self) -> bool {
        self.dial_error().is_some()
    }
}
