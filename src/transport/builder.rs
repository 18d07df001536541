//! Assembles the dial pipeline, TLS configuration and pool settings into the
//! pooling clients used by the dispatcher.
//!
//! # Responsibilities
//! - Fill in defaults for unset knobs
//! - Map keep-alive settings onto the client pool, forcing pooling off under
//!   PROXY protocol
//! - Build the primary client (HTTP/1.1, HTTP/2 via ALPN) and the optional
//!   h2c client over one shared connector
//! - Produce request-local clients for templated TLS server names

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use hyper::{Request, Response};
use hyper_util::client::legacy::{self, Client};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tower::ServiceExt;
use tower_http::decompression::Decompression;

use crate::config::{HttpVersion, KeepAliveConfig, TransportConfig};
use crate::net::{
    DialSettings, HostResolver, Picker, TlsDialer, UpstreamConnector, UpstreamResolver,
};
use crate::tls::{CertificateManager, TlsClientConfig};
use crate::transport::error::ProvisionError;
use crate::transport::replacer::Replacer;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_FALLBACK_DELAY: Duration = Duration::from_millis(300);
/// Idle connections kept per host when keep-alive is configured without a limit.
pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 2;
/// TCP keep-alive probe interval when keep-alive is configured without one.
pub const DEFAULT_TCP_KEEPALIVE: Duration = Duration::from_secs(15);
/// Smallest HTTP/1 read buffer the client accepts.
const MIN_HTTP1_BUF: usize = 8192;
/// HTTP/1 buffer ceiling the client applies when none is configured.
const DEFAULT_HTTP1_MAX_BUF: usize = 8192 + 4096 * 100;

/// Collaborators available at provisioning time.
#[derive(Clone, Default)]
pub struct ProvisionContext {
    /// Source of automated client certificates.
    pub certificates: Option<Arc<dyn CertificateManager>>,
    /// Name server selection for the resolver override. Default: uniform random.
    pub resolver_picker: Option<Picker>,
}

impl std::fmt::Debug for ProvisionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionContext")
            .field("certificates", &self.certificates.is_some())
            .field("resolver_picker", &self.resolver_picker.is_some())
            .finish()
    }
}

/// Fill in defaults for every unset knob.
pub fn apply_defaults(config: &mut TransportConfig) {
    if config.versions.is_empty() {
        config.versions = vec![HttpVersion::Http11, HttpVersion::Http2];
    }
    if config.keep_alive.is_none() {
        config.keep_alive = Some(KeepAliveConfig::recommended());
    }
    if config.dial_timeout.is_zero() {
        config.dial_timeout = DEFAULT_DIAL_TIMEOUT;
    }
    if config.dial_fallback_delay.is_zero() {
        config.dial_fallback_delay = DEFAULT_FALLBACK_DELAY;
    }
}

/// Connection pool behaviour derived from the keep-alive configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub keep_alive: bool,
    pub max_idle_per_host: usize,
    /// `None` keeps idle connections until the upstream closes them.
    pub idle_timeout: Option<Duration>,
    pub tcp_keepalive: Option<Duration>,
}

impl PoolSettings {
    pub fn from_config(config: &TransportConfig) -> Self {
        let keep_alive = config
            .keep_alive
            .clone()
            .unwrap_or_else(KeepAliveConfig::recommended);

        let mut enabled = keep_alive.enabled.unwrap_or(true);
        if enabled && config.proxy_protocol.is_enabled() {
            tracing::warn!(
                explicitly_enabled = keep_alive.enabled == Some(true),
                "Disabling keep-alive; it is incompatible with PROXY protocol"
            );
            enabled = false;
        }

        let mut max_idle_per_host = match keep_alive.max_idle_conns_per_host {
            0 => DEFAULT_MAX_IDLE_PER_HOST,
            n => n,
        };
        if keep_alive.max_idle_conns > 0 {
            max_idle_per_host = max_idle_per_host.min(keep_alive.max_idle_conns);
        }

        Self {
            keep_alive: enabled,
            max_idle_per_host: if enabled { max_idle_per_host } else { 0 },
            idle_timeout: (!keep_alive.idle_timeout.is_zero()).then_some(keep_alive.idle_timeout),
            tcp_keepalive: Some(if keep_alive.probe_interval.is_zero() {
                DEFAULT_TCP_KEEPALIVE
            } else {
                keep_alive.probe_interval
            }),
        }
    }
}

/// ALPN protocols offered to TLS upstreams.
pub fn alpn_protocols(config: &TransportConfig) -> Vec<Vec<u8>> {
    if config.supports(HttpVersion::Http2) {
        vec![b"h2".to_vec(), b"http/1.1".to_vec()]
    } else {
        vec![b"http/1.1".to_vec()]
    }
}

/// One pooling client plus what is needed to rebuild it.
#[derive(Clone)]
pub struct ClientHandle {
    client: Client<UpstreamConnector, Body>,
    connector: UpstreamConnector,
    builder: legacy::Builder,
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("connector", &self.connector)
            .finish_non_exhaustive()
    }
}

impl ClientHandle {
    fn build(builder: legacy::Builder, connector: UpstreamConnector) -> Self {
        Self {
            client: builder.build(connector.clone()),
            connector,
            builder,
        }
    }

    /// Same configuration, new empty pool, different TLS server name.
    pub fn with_server_name(&self, server_name: String) -> Self {
        Self::build(self.builder.clone(), self.connector.with_server_name(server_name))
    }

    /// Same configuration, new empty pool.
    pub fn fresh(&self) -> Self {
        Self::build(self.builder.clone(), self.connector.clone())
    }

    pub fn connector(&self) -> &UpstreamConnector {
        &self.connector
    }

    /// Send one request, transparently decoding gzip when `compress` is set
    /// and the caller did not negotiate an encoding itself.
    pub async fn send(
        &self,
        req: Request<Body>,
        compress: bool,
    ) -> Result<Response<Body>, legacy::Error> {
        if compress && wants_transparent_compression(&req) {
            let response = Decompression::new(self.client.clone()).oneshot(req).await?;
            Ok(response.map(Body::new))
        } else {
            let response = self.client.request(req).await?;
            Ok(response.map(Body::new))
        }
    }
}

fn wants_transparent_compression(req: &Request<Body>) -> bool {
    req.method() != hyper::Method::HEAD
        && !req.headers().contains_key(hyper::header::ACCEPT_ENCODING)
        && !req.headers().contains_key(hyper::header::RANGE)
}

/// Everything built at provisioning time.
#[derive(Debug)]
pub struct Provisioned {
    pub(crate) primary: ClientHandle,
    pub(crate) h2c: Option<ClientHandle>,
    pub(crate) pool: PoolSettings,
    pub(crate) compression: bool,
    /// The configured server name when it contains a placeholder.
    pub(crate) server_name_template: Option<String>,
}

impl Provisioned {
    /// Build clients for an already defaulted and validated configuration.
    pub fn build(config: &TransportConfig, ctx: &ProvisionContext) -> Result<Self, ProvisionError> {
        let pool = PoolSettings::from_config(config);

        let resolver = match &config.resolver {
            Some(resolver_config) => {
                let mut resolver = UpstreamResolver::new(resolver_config)?;
                if let Some(picker) = &ctx.resolver_picker {
                    resolver = resolver.with_picker(picker.clone());
                }
                tracing::debug!(name_servers = ?resolver.addresses(), "Using upstream resolver override");
                HostResolver::Override(resolver)
            }
            None => HostResolver::System,
        };

        let tls_client = match &config.tls {
            Some(tls) => match tls.make_tls_client_config(ctx.certificates.as_ref())? {
                Some(built) => built,
                None => TlsClientConfig::library_defaults()?,
            },
            None => TlsClientConfig::library_defaults()?,
        };
        let (client_config, server_name) = tls_client
            .with_alpn(alpn_protocols(config))
            .into_parts();
        let handshake_timeout = config
            .tls
            .as_ref()
            .map(|tls| tls.handshake_timeout)
            .unwrap_or_default();
        let server_name_template = server_name
            .clone()
            .filter(|name| Replacer::has_placeholder(name));

        if !config.expect_continue_timeout.is_zero() {
            tracing::warn!(
                expect_continue_timeout = ?config.expect_continue_timeout,
                "expect_continue_timeout is accepted but request bodies are sent without waiting for 100 Continue"
            );
        }

        let settings = DialSettings {
            dial_timeout: config.dial_timeout,
            fallback_delay: config.dial_fallback_delay,
            tcp_keepalive: pool.tcp_keepalive,
            proxy_protocol: config.proxy_protocol,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            write_buffer_size: config.write_buffer_size,
            max_conns_per_host: config.max_conns_per_host,
        };
        let connector = UpstreamConnector::new(
            settings,
            resolver,
            TlsDialer::new(client_config, server_name, handshake_timeout),
        );

        let builder = client_builder(config, &pool);
        let primary = ClientHandle::build(builder.clone(), connector.clone());

        let h2c = config.supports(HttpVersion::H2c).then(|| {
            let mut h2c_builder = builder.clone();
            h2c_builder.http2_only(true);
            ClientHandle::build(h2c_builder, connector)
        });

        Ok(Self {
            primary,
            h2c,
            pool,
            compression: config.compression.unwrap_or(true),
            server_name_template,
        })
    }

    /// The primary client for a request, specialised for a templated server
    /// name when one is configured.
    pub fn primary_for(&self, replacer: &Replacer) -> Cow<'_, ClientHandle> {
        match &self.server_name_template {
            Some(template) => {
                Cow::Owned(self.primary.with_server_name(replacer.replace_all(template, "")))
            }
            None => Cow::Borrowed(&self.primary),
        }
    }

    /// Same clients with empty pools.
    pub fn refreshed(&self) -> Self {
        Self {
            primary: self.primary.fresh(),
            h2c: self.h2c.as_ref().map(ClientHandle::fresh),
            pool: self.pool,
            compression: self.compression,
            server_name_template: self.server_name_template.clone(),
        }
    }
}

fn client_builder(config: &TransportConfig, pool: &PoolSettings) -> legacy::Builder {
    let mut builder = Client::builder(TokioExecutor::new());
    builder
        .timer(TokioTimer::new())
        .pool_timer(TokioTimer::new())
        .pool_idle_timeout(pool.idle_timeout)
        .pool_max_idle_per_host(pool.max_idle_per_host);

    match Http1Buffer::from_config(config) {
        Http1Buffer::Adaptive => {}
        Http1Buffer::Capped(max) => {
            builder.http1_max_buf_size(max);
        }
        Http1Buffer::Exact(size) => {
            builder.http1_read_buf_exact_size(size);
        }
    }
    builder
}

/// HTTP/1 read buffer strategy.
///
/// An exact buffer size is also the largest response head the client will
/// accept, so it is only used when it does not undercut the header limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Http1Buffer {
    Adaptive,
    Capped(usize),
    Exact(usize),
}

impl Http1Buffer {
    pub fn from_config(config: &TransportConfig) -> Self {
        let cap = (config.max_response_header_size > 0)
            .then(|| config.max_response_header_size.max(MIN_HTTP1_BUF));
        let limit = cap.unwrap_or(DEFAULT_HTTP1_MAX_BUF);

        match (config.read_buffer_size, cap) {
            (size, _) if size >= limit => Http1Buffer::Exact(size),
            (_, Some(cap)) => Http1Buffer::Capped(cap),
            (_, None) => Http1Buffer::Adaptive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyProtocolVersion;

    fn defaulted(mut config: TransportConfig) -> TransportConfig {
        apply_defaults(&mut config);
        config
    }

    #[test]
    fn defaults_fill_unset_knobs() {
        let config = defaulted(TransportConfig::default());
        assert_eq!(config.versions, vec![HttpVersion::Http11, HttpVersion::Http2]);
        assert_eq!(config.dial_timeout, Duration::from_secs(3));
        assert_eq!(config.dial_fallback_delay, Duration::from_millis(300));

        let pool = PoolSettings::from_config(&config);
        assert_eq!(
            pool,
            PoolSettings {
                keep_alive: true,
                max_idle_per_host: 32,
                idle_timeout: Some(Duration::from_secs(120)),
                tcp_keepalive: Some(Duration::from_secs(30)),
            }
        );
    }

    #[test]
    fn proxy_protocol_forces_keep_alive_off() {
        for version in [ProxyProtocolVersion::V1, ProxyProtocolVersion::V2] {
            let config = defaulted(TransportConfig {
                proxy_protocol: version,
                keep_alive: Some(KeepAliveConfig {
                    enabled: Some(true),
                    ..KeepAliveConfig::recommended()
                }),
                ..Default::default()
            });
            let pool = PoolSettings::from_config(&config);
            assert!(!pool.keep_alive);
            assert_eq!(pool.max_idle_per_host, 0);
        }
    }

    #[test]
    fn global_idle_cap_limits_per_host() {
        let config = TransportConfig {
            keep_alive: Some(KeepAliveConfig {
                max_idle_conns: 4,
                max_idle_conns_per_host: 10,
                ..Default::default()
            }),
            ..Default::default()
        };
        let pool = PoolSettings::from_config(&config);
        assert_eq!(pool.max_idle_per_host, 4);
        assert_eq!(pool.idle_timeout, None);
        assert_eq!(pool.tcp_keepalive, Some(DEFAULT_TCP_KEEPALIVE));
    }

    #[test]
    fn explicit_disable_turns_pooling_off() {
        let config = TransportConfig {
            keep_alive: Some(KeepAliveConfig {
                enabled: Some(false),
                ..KeepAliveConfig::recommended()
            }),
            ..Default::default()
        };
        assert_eq!(PoolSettings::from_config(&config).max_idle_per_host, 0);
    }

    #[test]
    fn small_read_buffer_never_limits_headers() {
        let small = TransportConfig {
            read_buffer_size: 1024,
            ..Default::default()
        };
        assert_eq!(Http1Buffer::from_config(&small), Http1Buffer::Adaptive);

        let capped = TransportConfig {
            read_buffer_size: 4096,
            max_response_header_size: 64 * 1024,
            ..Default::default()
        };
        assert_eq!(Http1Buffer::from_config(&capped), Http1Buffer::Capped(64 * 1024));

        let tiny_cap = TransportConfig {
            max_response_header_size: 100,
            ..Default::default()
        };
        assert_eq!(Http1Buffer::from_config(&tiny_cap), Http1Buffer::Capped(MIN_HTTP1_BUF));
    }

    #[test]
    fn read_buffer_at_or_above_header_limit_is_exact() {
        let config = TransportConfig {
            read_buffer_size: 16 * 1024,
            max_response_header_size: 16 * 1024,
            ..Default::default()
        };
        assert_eq!(Http1Buffer::from_config(&config), Http1Buffer::Exact(16 * 1024));

        let huge = TransportConfig {
            read_buffer_size: 1 << 20,
            ..Default::default()
        };
        assert_eq!(Http1Buffer::from_config(&huge), Http1Buffer::Exact(1 << 20));
        assert_eq!(
            Http1Buffer::from_config(&TransportConfig::default()),
            Http1Buffer::Adaptive
        );
    }

    #[test]
    fn alpn_follows_versions() {
        let h2 = defaulted(TransportConfig::default());
        assert_eq!(alpn_protocols(&h2), vec![b"h2".to_vec(), b"http/1.1".to_vec()]);

        let h1 = TransportConfig {
            versions: vec![HttpVersion::Http11, HttpVersion::H2c],
            ..Default::default()
        };
        assert_eq!(alpn_protocols(&h1), vec![b"http/1.1".to_vec()]);
    }

    #[tokio::test]
    async fn h2c_client_only_when_requested() {
        let plain = defaulted(TransportConfig::default());
        let built = Provisioned::build(&plain, &ProvisionContext::default()).unwrap();
        assert!(built.h2c.is_none());
        assert!(built.compression);

        let h2c = defaulted(TransportConfig {
            versions: vec![HttpVersion::H2c],
            compression: Some(false),
            ..Default::default()
        });
        let built = Provisioned::build(&h2c, &ProvisionContext::default()).unwrap();
        assert!(built.h2c.is_some());
        assert!(!built.compression);
    }

    #[tokio::test]
    async fn templated_server_name_is_expanded_per_request() {
        let config = defaulted(TransportConfig {
            tls: Some(crate::config::TlsConfig {
                server_name: "{tenant}.internal".into(),
                ..Default::default()
            }),
            ..Default::default()
        });
        let built = Provisioned::build(&config, &ProvisionContext::default()).unwrap();

        let replacer = Replacer::new().with("tenant", "blue");
        let specialised = built.primary_for(&replacer);
        assert!(matches!(specialised, Cow::Owned(_)));
        assert_eq!(
            specialised.connector().tls_server_name(),
            Some("blue.internal")
        );
        assert_eq!(
            built.primary.connector().tls_server_name(),
            Some("{tenant}.internal")
        );
    }

    #[tokio::test]
    async fn static_server_name_is_shared() {
        let config = defaulted(TransportConfig {
            tls: Some(crate::config::TlsConfig {
                server_name: "backend.internal".into(),
                ..Default::default()
            }),
            ..Default::default()
        });
        let built = Provisioned::build(&config, &ProvisionContext::default()).unwrap();
        assert!(matches!(built.primary_for(&Replacer::new()), Cow::Borrowed(_)));
    }
}
