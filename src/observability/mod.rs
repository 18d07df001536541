//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dial pipeline and dispatcher produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stderr)
//!     → Whatever metrics recorder the host process installs
//! ```
//!
//! # Design Decisions
//! - Structured fields, never formatted strings, for upstream and error data
//! - Metrics are cheap (atomic increments); with no recorder they are no-ops

pub mod logging;
pub mod metrics;
