//! Network layer subsystem: everything between "the client needs a
//! connection" and "bytes can flow".
//!
//! # Data Flow
//! ```text
//! Pooling client asks for a connection (Uri)
//!     → scope.rs (per-request DialInfo / PROXY info)
//!     → resolver.rs (system DNS or configured name servers)
//!     → connector.rs (dial, per-host limits, TLS)
//!     → proxy_protocol.rs (PROXY v1/v2 header)
//!     → timeout.rs (read/write deadlines on TCP)
//!     → stream.rs (connection handed back to the pool)
//!
//! Connection states:
//!     Resolving → Connecting → Preamble → Handshaking → Pooled
//! ```
//!
//! # Design Decisions
//! - One connector serves both the primary and the h2c client
//! - PROXY headers are written only on fresh connections, before TLS
//! - Each dial is independent and keeps no state across calls

pub mod connector;
pub mod proxy_protocol;
pub mod resolver;
pub mod scope;
pub mod stream;
pub mod timeout;

pub use connector::{ConnectError, DialError, DialSettings, HostLimits, TlsDialer, UpstreamConnector};
pub use proxy_protocol::ProxyHeader;
pub use resolver::{HostResolver, NetworkAddress, Picker, ResolverError, UpstreamResolver};
pub use scope::{DialGuard, DialInfo, DialProgress, DialScope, DialTracker, ProxyProtocolInfo};
pub use stream::UpstreamStream;
pub use timeout::TimeoutStream;
