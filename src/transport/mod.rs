//! Upstream HTTP transport subsystem.
//!
//! # Responsibilities
//! - Turn a [`TransportConfig`](crate::config::TransportConfig) into pooling
//!   clients (provisioning)
//! - Send requests to upstreams and classify failures
//! - Release pooled connections on demand
//!
//! # Data Flow
//! ```text
//! TransportConfig
//!     → HttpTransport::provision (defaults, validation, TLS, resolver)
//!     → builder.rs (connector + primary / h2c clients)
//!
//! Request + RequestContext
//!     → HttpTransport::round_trip (round_trip.rs)
//!     → net::UpstreamConnector (dial pipeline)
//!     → Response<Body> | RoundTripError
//! ```
//!
//! # Design Decisions
//! - Per-request inputs (replacer, dial info, PROXY source) are explicit in
//!   [`RequestContext`]
//! - Templated TLS server names get a request-local client; the shared
//!   client is never mutated
//! - Dial failures stay distinguishable so callers can retry elsewhere

pub mod builder;
pub mod context;
pub mod error;
pub mod http_transport;
pub mod replacer;
pub mod round_trip;

pub use builder::{ClientHandle, PoolSettings, ProvisionContext};
pub use context::RequestContext;
pub use error::{ProvisionError, RoundTripError};
pub use http_transport::HttpTransport;
pub use replacer::Replacer;
pub use round_trip::Upstream;
