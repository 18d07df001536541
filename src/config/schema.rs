//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the upstream
//! transport. All types derive Serde traits for deserialization from config
//! files. Zero values mean "unset" and are filled in at provisioning time.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration;

/// Root configuration for the upstream HTTP transport.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Transparent gzip to the upstream. Default: true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<bool>,

    /// Maximum number of open connections per destination. 0 = no limit.
    pub max_conns_per_host: usize,

    /// PROXY protocol version to send after connecting. Default: off.
    pub proxy_protocol: ProxyProtocolVersion,

    /// Time allowed to resolve and connect. Default: 3s.
    #[serde(with = "duration")]
    pub dial_timeout: Duration,

    /// RFC 6555 fast fallback delay. Default: 300ms.
    #[serde(with = "duration")]
    pub dial_fallback_delay: Duration,

    /// Time allowed for the upstream to send response headers. 0 = no limit.
    #[serde(with = "duration")]
    pub response_header_timeout: Duration,

    /// Wait for `100 Continue` before sending the body. 0 = no limit.
    #[serde(with = "duration")]
    pub expect_continue_timeout: Duration,

    /// Maximum bytes of response headers. 0 = library default.
    pub max_response_header_size: usize,

    /// Write buffer size in bytes. 0 = unbuffered.
    pub write_buffer_size: usize,

    /// Read buffer size in bytes. 0 = adaptive.
    pub read_buffer_size: usize,

    /// Maximum time a single read from the upstream may block. 0 = no limit.
    #[serde(with = "duration")]
    pub read_timeout: Duration,

    /// Maximum time a single write to the upstream may block. 0 = no limit.
    #[serde(with = "duration")]
    pub write_timeout: Duration,

    /// HTTP versions to speak. Default: ["1.1", "2"].
    pub versions: Vec<HttpVersion>,

    /// DNS servers used instead of the system resolver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolver: Option<UpstreamResolverConfig>,

    /// TLS to the upstream. An empty table enables TLS with defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    /// HTTP keep-alive (enabled by default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<KeepAliveConfig>,
}

impl TransportConfig {
    /// Whether `version` is among the configured versions.
    pub fn supports(&self, version: HttpVersion) -> bool {
        self.versions.contains(&version)
    }

    /// Whether TLS is configured for this transport.
    pub fn tls_enabled(&self) -> bool {
        self.tls.is_some()
    }
}

/// Upstream DNS override.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct UpstreamResolverConfig {
    /// Name server addresses, e.g. `"8.8.8.8"`, `"udp/1.1.1.1:53"`, `"tcp/[::1]:5353"`.
    pub addresses: Vec<String>,
}

/// TLS configuration for connections to the upstream.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct TlsConfig {
    /// Base64-encoded DER CA certificates to trust.
    pub root_ca_pool: Vec<String>,

    /// PEM files whose certificates join the same trust store.
    pub root_ca_pem_files: Vec<PathBuf>,

    /// PEM client certificate to present to upstreams.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate_file: Option<PathBuf>,

    /// PEM key for the client certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate_key_file: Option<PathBuf>,

    /// Subject name of a client certificate obtained from the certificate manager.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate_automate: Option<String>,

    /// Disable verification of upstream certificates. Testing only.
    pub insecure_skip_verify: bool,

    /// Time allowed for the TLS handshake. 0 = no limit.
    #[serde(with = "duration")]
    pub handshake_timeout: Duration,

    /// Server name for SNI and verification. May contain `{placeholders}`.
    pub server_name: String,

    /// "never" (default), "once" or "freely".
    pub renegotiation: String,

    /// Upstream ports on which TLS is never attempted.
    pub except_ports: Vec<String>,
}

/// HTTP keep-alive settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct KeepAliveConfig {
    /// Whether connections are pooled for reuse. Default: true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// TCP keep-alive probe interval.
    #[serde(with = "duration")]
    pub probe_interval: Duration,

    /// Maximum idle connections overall. 0 = no limit.
    pub max_idle_conns: usize,

    /// Maximum idle connections per host.
    pub max_idle_conns_per_host: usize,

    /// How long an idle connection is kept.
    #[serde(with = "duration")]
    pub idle_timeout: Duration,
}

impl KeepAliveConfig {
    /// Keep-alive settings used when none are configured.
    pub fn recommended() -> Self {
        Self {
            enabled: None,
            probe_interval: Duration::from_secs(30),
            max_idle_conns: 0,
            max_idle_conns_per_host: 32,
            idle_timeout: Duration::from_secs(120),
        }
    }
}

/// PROXY protocol version written at the start of upstream connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ProxyProtocolVersion {
    #[default]
    #[serde(rename = "")]
    Off,
    #[serde(rename = "v1")]
    V1,
    #[serde(rename = "v2")]
    V2,
}

impl ProxyProtocolVersion {
    pub fn is_enabled(self) -> bool {
        self != ProxyProtocolVersion::Off
    }
}

/// An HTTP version the transport may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum HttpVersion {
    #[serde(rename = "1.1")]
    Http11,
    #[serde(rename = "2")]
    Http2,
    /// HTTP/2 over cleartext with prior knowledge.
    #[serde(rename = "h2c")]
    H2c,
}
