//! Upstream HTTP transport for a reverse proxy.
//!
//! Connects to backend servers over TCP or unix sockets, optionally with a
//! PROXY protocol preamble and TLS, pools the connections, and sends HTTP/1.1,
//! HTTP/2 or h2c requests over them.
//!
//! ```text
//!   config ──▶ transport::HttpTransport::provision
//!                    │
//!   Request ─▶ round_trip ──▶ net::UpstreamConnector ──▶ upstream
//!                    │            (resolver, PROXY, tls)
//!   Response ◀───────┘
//! ```

pub mod config;
pub mod net;
pub mod observability;
pub mod tls;
pub mod transport;

/// Boxed error used at library seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::TransportConfig;
pub use net::{DialInfo, ProxyProtocolInfo};
pub use transport::{HttpTransport, ProvisionContext, Replacer, RequestContext, RoundTripError};
