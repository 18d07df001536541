//! Upstream TLS subsystem.
//!
//! # Data Flow
//! ```text
//! TlsConfig (config file)
//!     → certs.rs (trust roots, static client key pair)
//!     → automate.rs (client certificate from a certificate manager)
//!     → verifier.rs (accept-any verifier for insecure_skip_verify)
//!     → client.rs (rustls ClientConfig + server name override)
//!     → transport builder (ALPN, TlsConnector)
//! ```
//!
//! # Design Decisions
//! - rustls with the ring provider; no platform TLS
//! - An all-default `TlsConfig` produces no override, and the builder falls
//!   back to webpki roots
//! - Automated client certificates are resolved per handshake, not cached

pub mod automate;
pub mod certs;
pub mod client;
pub mod verifier;

pub use automate::{AutomatedClientCert, CertificateManager, CertificateStore};
pub use client::{crypto_provider, Renegotiation, TlsClientConfig, TlsError};
