//! The configured upstream transport and its lifecycle.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use axum::body::Body;
use hyper::http::uri::{Parts, PathAndQuery, Scheme};
use hyper::{Request, Uri};

use crate::config::{validate_config, TlsConfig, TransportConfig};
use crate::transport::builder::{apply_defaults, PoolSettings, ProvisionContext, Provisioned};
use crate::transport::error::{ProvisionError, RoundTripError};

/// HTTP transport to upstream servers.
///
/// Created from a [`TransportConfig`], then provisioned once. After that the
/// transport is shared across request tasks and only read.
#[derive(Debug)]
pub struct HttpTransport {
    config: TransportConfig,
    pub(crate) state: ArcSwapOption<Provisioned>,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            state: ArcSwapOption::const_empty(),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Apply defaults, validate, and build the clients.
    pub fn provision(&mut self, ctx: ProvisionContext) -> Result<(), ProvisionError> {
        apply_defaults(&mut self.config);
        validate_config(&self.config).map_err(ProvisionError::Invalid)?;

        let provisioned = Provisioned::build(&self.config, &ctx)?;
        tracing::info!(
            versions = ?self.config.versions,
            tls = self.config.tls_enabled(),
            proxy_protocol = ?self.config.proxy_protocol,
            keep_alive = provisioned.pool.keep_alive,
            "Upstream transport provisioned"
        );
        self.state.store(Some(Arc::new(provisioned)));
        Ok(())
    }

    pub fn is_provisioned(&self) -> bool {
        self.state.load().is_some()
    }

    /// Pool behaviour in effect, once provisioned.
    pub fn pool_settings(&self) -> Option<PoolSettings> {
        self.state.load().as_ref().map(|state| state.pool)
    }

    /// TLS server name of the shared client. Templated names are kept as
    /// written; requests use their own expanded copy.
    pub fn server_name(&self) -> Option<String> {
        self.state
            .load()
            .as_ref()
            .and_then(|state| state.primary.connector().tls_server_name().map(str::to_string))
    }

    pub fn tls_enabled(&self) -> bool {
        self.config.tls_enabled()
    }

    /// Turn on TLS, keeping any TLS settings already configured. Must be
    /// called before [`provision`](Self::provision).
    pub fn enable_tls(&mut self, tls: TlsConfig) {
        if self.config.tls.is_none() {
            self.config.tls = Some(tls);
        }
    }

    /// Whether a request to `port` should use TLS.
    pub fn should_use_tls(&self, port: Option<&str>) -> bool {
        match &self.config.tls {
            Some(tls) => !tls
                .except_ports
                .iter()
                .any(|except| Some(except.as_str()) == port),
            None => false,
        }
    }

    /// Give a scheme-less request URI a scheme and authority.
    ///
    /// The authority comes from the URI or the `Host` header. Requests that
    /// already carry a scheme are left alone.
    pub fn set_scheme(&self, req: &mut Request<Body>) -> Result<(), RoundTripError> {
        if req.uri().scheme().is_some() {
            return Ok(());
        }

        let mut parts = Parts::from(req.uri().clone());
        let authority = match parts.authority.take() {
            Some(authority) => authority,
            None => req
                .headers()
                .get(hyper::header::HOST)
                .and_then(|host| host.to_str().ok())
                .filter(|host| !host.is_empty())
                .ok_or(RoundTripError::MissingHost)?
                .parse()
                .map_err(|e: hyper::http::uri::InvalidUri| RoundTripError::InvalidUri(e.to_string()))?,
        };

        parts.scheme = Some(if self.should_use_tls(authority.port().as_ref().map(|p| p.as_str())) {
            Scheme::HTTPS
        } else {
            Scheme::HTTP
        });
        parts.authority = Some(authority);
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }

        *req.uri_mut() =
            Uri::from_parts(parts).map_err(|e| RoundTripError::InvalidUri(e.to_string()))?;
        Ok(())
    }

    /// Drop every idle pooled connection.
    ///
    /// Connections in use finish their current exchange and are then closed.
    /// Does nothing on an unprovisioned transport.
    pub fn cleanup(&self) {
        if let Some(state) = self.state.load_full() {
            self.state.store(Some(Arc::new(state.refreshed())));
            tracing::debug!("Upstream connection pools released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxyProtocolVersion, UpstreamResolverConfig};

    fn request(uri: &str, host: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(host) = host {
            builder = builder.header(hyper::header::HOST, host);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn tls_transport(except_ports: &[&str]) -> HttpTransport {
        HttpTransport::new(TransportConfig {
            tls: Some(TlsConfig {
                except_ports: except_ports.iter().map(|p| p.to_string()).collect(),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[test]
    fn except_ports_select_plain_http() {
        let transport = tls_transport(&["8080"]);

        let mut req = request("/a?b=c", Some("backend:8080"));
        transport.set_scheme(&mut req).unwrap();
        assert_eq!(req.uri().to_string(), "http://backend:8080/a?b=c");

        let mut req = request("/", Some("backend:8443"));
        transport.set_scheme(&mut req).unwrap();
        assert_eq!(req.uri().scheme_str(), Some("https"));

        let mut req = request("/", Some("backend"));
        transport.set_scheme(&mut req).unwrap();
        assert_eq!(req.uri().scheme_str(), Some("https"));
    }

    #[test]
    fn plain_transport_uses_http() {
        let transport = HttpTransport::new(TransportConfig::default());
        let mut req = request("/", Some("backend:443"));
        transport.set_scheme(&mut req).unwrap();
        assert_eq!(req.uri().to_string(), "http://backend:443/");
    }

    #[test]
    fn existing_scheme_is_kept() {
        let transport = tls_transport(&[]);
        let mut req = request("http://backend:9000/x", None);
        transport.set_scheme(&mut req).unwrap();
        assert_eq!(req.uri().to_string(), "http://backend:9000/x");
    }

    #[test]
    fn missing_host_is_rejected() {
        let transport = HttpTransport::new(TransportConfig::default());
        let mut req = request("/", None);
        assert!(matches!(
            transport.set_scheme(&mut req),
            Err(RoundTripError::MissingHost)
        ));
    }

    #[test]
    fn enable_tls_before_provision() {
        let mut transport = HttpTransport::new(TransportConfig::default());
        assert!(!transport.tls_enabled());
        transport.enable_tls(TlsConfig {
            except_ports: vec!["80".into()],
            ..Default::default()
        });
        assert!(transport.tls_enabled());
        assert!(transport.should_use_tls(Some("443")));
        assert!(!transport.should_use_tls(Some("80")));

        transport.enable_tls(TlsConfig::default());
        assert_eq!(transport.config().tls.as_ref().unwrap().except_ports, vec!["80"]);
    }

    #[tokio::test]
    async fn provision_forces_keep_alive_off_for_proxy_protocol() {
        let mut transport = HttpTransport::new(TransportConfig {
            proxy_protocol: ProxyProtocolVersion::V2,
            ..Default::default()
        });
        transport.provision(ProvisionContext::default()).unwrap();

        let pool = transport.pool_settings().unwrap();
        assert!(!pool.keep_alive);
        assert_eq!(pool.max_idle_per_host, 0);
    }

    #[tokio::test]
    async fn malformed_resolver_fails_provisioning() {
        let mut transport = HttpTransport::new(TransportConfig {
            resolver: Some(UpstreamResolverConfig {
                addresses: vec!["dns.example:53".into()],
            }),
            ..Default::default()
        });
        let err = transport.provision(ProvisionContext::default()).unwrap_err();
        assert!(matches!(err, ProvisionError::Invalid(_)));
        assert!(!transport.is_provisioned());
    }

    #[tokio::test]
    async fn cleanup_is_safe_before_and_after_provision() {
        let mut transport = HttpTransport::new(TransportConfig::default());
        transport.cleanup();
        assert!(!transport.is_provisioned());

        transport.provision(ProvisionContext::default()).unwrap();
        transport.cleanup();
        assert!(transport.is_provisioned());
    }

    #[tokio::test]
    async fn templated_server_name_stays_on_shared_client() {
        let mut transport = HttpTransport::new(TransportConfig {
            tls: Some(TlsConfig {
                server_name: "{upstream.host}".into(),
                ..Default::default()
            }),
            ..Default::default()
        });
        transport.provision(ProvisionContext::default()).unwrap();
        assert_eq!(transport.server_name().as_deref(), Some("{upstream.host}"));
    }
}
