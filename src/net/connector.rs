//! The dial pipeline, exposed to the pooling client as a `Service<Uri>`.
//!
//! # Data Flow
//! ```text
//! Client needs a connection for `uri`
//!     → UpstreamConnector::call(uri)          (captures DialScope)
//!     → PROXY info check                      (fatal when missing)
//!     → HostLimits::acquire                   (max_conns_per_host)
//!     → DialTracker::begin                    (round trip sees a dial in progress)
//!     → dial: unix socket (DialInfo) | TCP via HostResolver
//!     → TimeoutStream                         (TCP + read/write timeouts)
//!     → PROXY header write + flush
//!     → BufWriter                             (write_buffer_size)
//!     → TLS handshake for https               (SNI, ALPN, handshake timeout)
//!     → UpstreamStream
//! ```
//!
//! # Design Decisions
//! - Every failure before the stream is usable as plain bytes (resolve,
//!   connect, dial timeout, PROXY header write) is a `DialError`, so callers
//!   can tell connection establishment apart from response failures
//! - A dropped dial future drops its socket; nothing half-written reaches the
//!   pool
//! - The TLS server name override is fixed per connector; templated names get
//!   their own connector through `with_server_name`

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hyper::Uri;
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::BufWriter;
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_rustls::TlsConnector;
use tower::{Service, ServiceExt};

use crate::config::ProxyProtocolVersion;
use crate::net::proxy_protocol::ProxyHeader;
use crate::net::resolver::HostResolver;
use crate::net::scope::{DialInfo, DialScope, DialTracker};
use crate::net::stream::{BoxedIo, UpstreamStream};
use crate::net::timeout::TimeoutStream;
use crate::observability::metrics;
use crate::BoxError;

/// A failure while establishing the upstream connection.
///
/// Safe to retry against another upstream: no request bytes were sent.
#[derive(Debug, thiserror::Error)]
#[error("dialing upstream: {source}")]
pub struct DialError {
    source: BoxError,
}

impl DialError {
    pub fn new(source: impl Into<BoxError>) -> Self {
        Self {
            source: source.into(),
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self::new(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("dial timed out after {:?}", after),
        ))
    }

    /// Whether the dial ran out of time.
    pub fn is_timeout(&self) -> bool {
        self.source
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::TimedOut)
    }
}

/// Errors returned by the connector to the pooling client.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("{0}")]
    Dial(#[from] DialError),

    #[error("PROXY protocol is enabled but the request carries no client address")]
    MissingProxyProtocolInfo,

    #[error("upstream URI has no host")]
    MissingHost,

    #[error("invalid TLS server name {0:?}")]
    InvalidServerName(String),

    #[error("TLS handshake with upstream failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("TLS handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
}

impl ConnectError {
    pub fn is_dial_error(&self) -> bool {
        matches!(self, ConnectError::Dial(_))
    }
}

/// Per-destination caps on open connections.
#[derive(Debug, Clone, Default)]
pub struct HostLimits {
    max: usize,
    slots: Arc<DashMap<String, Arc<Semaphore>>>,
}

impl HostLimits {
    /// `max == 0` means unlimited.
    pub fn new(max: usize) -> Self {
        Self {
            max,
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Wait for a connection slot to `key`. `None` when unlimited.
    pub async fn acquire(&self, key: &str) -> Result<Option<OwnedSemaphorePermit>, DialError> {
        if self.max == 0 {
            return Ok(None);
        }
        let semaphore = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max)))
            .clone();
        semaphore
            .acquire_owned()
            .await
            .map(Some)
            .map_err(DialError::new)
    }

    /// Slots currently free for `key`.
    pub fn available(&self, key: &str) -> usize {
        self.slots
            .get(key)
            .map(|s| s.available_permits())
            .unwrap_or(self.max)
    }
}

/// TLS client side of the pipeline.
#[derive(Clone)]
pub struct TlsDialer {
    connector: TlsConnector,
    server_name: Option<String>,
    handshake_timeout: Duration,
}

impl std::fmt::Debug for TlsDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsDialer")
            .field("server_name", &self.server_name)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

impl TlsDialer {
    pub fn new(
        config: Arc<ClientConfig>,
        server_name: Option<String>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            connector: TlsConnector::from(config),
            server_name,
            handshake_timeout,
        }
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Run the handshake; returns the stream and whether `h2` was negotiated.
    async fn handshake(&self, io: BoxedIo, host: &str) -> Result<(BoxedIo, bool), ConnectError> {
        let name = match &self.server_name {
            Some(name) => name.clone(),
            None => host.trim_start_matches('[').trim_end_matches(']').to_string(),
        };
        let server_name = ServerName::try_from(name.clone())
            .map_err(|_| ConnectError::InvalidServerName(name))?;

        let connect = self.connector.connect(server_name, io);
        let tls = if self.handshake_timeout.is_zero() {
            connect.await
        } else {
            tokio::time::timeout(self.handshake_timeout, connect)
                .await
                .map_err(|_| ConnectError::HandshakeTimeout(self.handshake_timeout))?
        }
        .map_err(ConnectError::Handshake)?;

        let h2 = tls.get_ref().1.alpn_protocol() == Some(&b"h2"[..]);
        Ok((Box::new(tls), h2))
    }
}

/// Knobs of the dial pipeline, fixed at provisioning.
#[derive(Debug, Clone)]
pub struct DialSettings {
    pub dial_timeout: Duration,
    pub fallback_delay: Duration,
    /// TCP keep-alive probe interval; `None` leaves the OS default.
    pub tcp_keepalive: Option<Duration>,
    pub proxy_protocol: ProxyProtocolVersion,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub write_buffer_size: usize,
    pub max_conns_per_host: usize,
}

#[derive(Debug, Clone)]
struct ConnectorInner {
    tcp: HttpConnector<HostResolver>,
    settings: DialSettings,
    tls: TlsDialer,
    limits: HostLimits,
}

/// Connects the pooling client to upstreams.
#[derive(Debug, Clone)]
pub struct UpstreamConnector {
    inner: Arc<ConnectorInner>,
}

impl UpstreamConnector {
    pub fn new(settings: DialSettings, resolver: HostResolver, tls: TlsDialer) -> Self {
        let mut tcp = HttpConnector::new_with_resolver(resolver);
        tcp.enforce_http(false);
        tcp.set_nodelay(true);
        tcp.set_connect_timeout(Some(settings.dial_timeout));
        tcp.set_happy_eyeballs_timeout(Some(settings.fallback_delay));
        tcp.set_keepalive(settings.tcp_keepalive);

        Self {
            inner: Arc::new(ConnectorInner {
                tcp,
                limits: HostLimits::new(settings.max_conns_per_host),
                settings,
                tls,
            }),
        }
    }

    /// A connector identical to this one except for the TLS server name.
    ///
    /// Resolver, trust roots, client identity and per-host limits are shared.
    pub fn with_server_name(&self, server_name: String) -> Self {
        let mut inner = (*self.inner).clone();
        inner.tls.server_name = Some(server_name);
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn tls_server_name(&self) -> Option<&str> {
        self.inner.tls.server_name()
    }

    pub fn limits(&self) -> &HostLimits {
        &self.inner.limits
    }

    /// Establish a connection to `uri` using the dial parameters in `scope`.
    pub async fn connect(&self, uri: Uri, scope: DialScope) -> Result<UpstreamStream, ConnectError> {
        self.inner.connect(uri, scope).await
    }
}

impl ConnectorInner {
    async fn connect(&self, uri: Uri, scope: DialScope) -> Result<UpstreamStream, ConnectError> {
        let settings = &self.settings;
        let proxy_header = if settings.proxy_protocol.is_enabled() {
            let info = scope
                .proxy_protocol
                .ok_or(ConnectError::MissingProxyProtocolInfo)?;
            Some(ProxyHeader::new(settings.proxy_protocol, info.source))
        } else {
            None
        };

        let host = uri.host().ok_or(ConnectError::MissingHost)?.to_string();
        let unix = scope.dial_info.filter(DialInfo::is_unix);
        let tracker = scope.tracker;
        let network = if unix.is_some() { "unix" } else { "tcp" };
        let limit_key = match &unix {
            Some(info) => format!("{}/{}", info.network, info.address),
            None => format!(
                "{}://{}",
                uri.scheme_str().unwrap_or("http"),
                uri.authority().map(|a| a.as_str()).unwrap_or(&host)
            ),
        };

        let started = Instant::now();
        let result = async {
            let permit = self.limits.acquire(&limit_key).await?;
            let dialing = tracker.as_ref().map(DialTracker::begin);
            let mut io = match &unix {
                Some(info) => self.dial_unix(info).await?,
                None => self.dial_tcp(&uri).await?,
            };

            if let Some(header) = &proxy_header {
                tracing::debug!(
                    version = ?header.version,
                    source = %header.source,
                    "Sending PROXY protocol header"
                );
                header.write_to(&mut io).await.map_err(DialError::new)?;
            }
            Ok::<_, DialError>((io, permit, dialing))
        }
        .await;

        let (io, permit, _dialing) = match result {
            Ok(dialed) => dialed,
            Err(e) => {
                tracing::debug!(upstream = %uri, network, error = %e, "Upstream dial failed");
                metrics::record_dial_error(network, e.is_timeout());
                return Err(e.into());
            }
        };
        metrics::record_dial(network, started.elapsed());

        let io: BoxedIo = if settings.write_buffer_size > 0 {
            Box::new(BufWriter::with_capacity(settings.write_buffer_size, io))
        } else {
            io
        };

        if uri.scheme_str() == Some("https") {
            let (io, h2) = self.tls.handshake(io, &host).await?;
            tracing::trace!(upstream = %uri, h2, "TLS handshake complete");
            return Ok(UpstreamStream::new(io, h2, permit));
        }
        Ok(UpstreamStream::new(io, false, permit))
    }

    async fn dial_tcp(&self, uri: &Uri) -> Result<BoxedIo, DialError> {
        let settings = &self.settings;
        let dial = self.tcp.clone().oneshot(uri.clone());
        let stream: TcpStream = tokio::time::timeout(settings.dial_timeout, dial)
            .await
            .map_err(|_| DialError::timed_out(settings.dial_timeout))?
            .map_err(DialError::new)?
            .into_inner();

        if settings.read_timeout.is_zero() && settings.write_timeout.is_zero() {
            Ok(Box::new(stream))
        } else {
            Ok(Box::new(TimeoutStream::new(
                stream,
                settings.read_timeout,
                settings.write_timeout,
            )))
        }
    }

    #[cfg(unix)]
    async fn dial_unix(&self, info: &DialInfo) -> Result<BoxedIo, DialError> {
        if info.network != "unix" {
            return Err(DialError::new(format!(
                "network {:?} cannot carry HTTP; use \"unix\"",
                info.network
            )));
        }
        let timeout = self.settings.dial_timeout;
        let stream = tokio::time::timeout(timeout, tokio::net::UnixStream::connect(&info.address))
            .await
            .map_err(|_| DialError::timed_out(timeout))?
            .map_err(DialError::new)?;
        Ok(Box::new(stream))
    }

    #[cfg(not(unix))]
    async fn dial_unix(&self, info: &DialInfo) -> Result<BoxedIo, DialError> {
        Err(DialError::new(format!(
            "unix sockets are not supported on this platform ({})",
            info.address
        )))
    }
}

impl Service<Uri> for UpstreamConnector {
    type Response = UpstreamStream;
    type Error = ConnectError;
    type Future = Pin<Box<dyn Future<Output = Result<UpstreamStream, ConnectError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        // The scope is only visible while the request future is polled.
        let scope = DialScope::current();
        let inner = self.inner.clone();
        Box::pin(async move { inner.connect(uri, scope).await })
    }
}
