//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the logging subsystem for binaries
//! - Configure log level at runtime through `RUST_LOG`
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging; the library only emits events
//! - Default filter keeps this crate at debug and dependencies at warn

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "reverse_proxy_transport=debug,transport_probe=debug,warn";

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
