//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TransportConfig (validated)
//!     → HttpTransport::provision applies defaults and freezes it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once provisioned; changes require a new transport
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Durations are human-readable strings ("3s", "300ms")

pub mod duration;
pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::HttpVersion;
pub use schema::KeepAliveConfig;
pub use schema::ProxyProtocolVersion;
pub use schema::TlsConfig;
pub use schema::TransportConfig;
pub use schema::UpstreamResolverConfig;
pub use validation::{validate_config, ValidationError};
