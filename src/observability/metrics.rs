//! Metrics collection.
//!
//! # Metrics
//! - `upstream_dials_total` (counter): successful dials by network
//! - `upstream_dial_duration_seconds` (histogram): resolve + connect + preamble
//! - `upstream_dial_errors_total` (counter): failed dials by network, reason
//! - `upstream_round_trips_total` (counter): round trips by transport, outcome
//! - `upstream_round_trip_duration_seconds` (histogram): time to response headers
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; exporting is left to the binary
//!   embedding the transport
//! - Labels are low-cardinality (no hosts, no paths)

use std::time::Duration;

pub fn record_dial(network: &'static str, elapsed: Duration) {
    metrics::counter!("upstream_dials_total", "network" => network).increment(1);
    metrics::histogram!("upstream_dial_duration_seconds", "network" => network)
        .record(elapsed.as_secs_f64());
}

pub fn record_dial_error(network: &'static str, timed_out: bool) {
    let reason = if timed_out { "timeout" } else { "error" };
    metrics::counter!("upstream_dial_errors_total", "network" => network, "reason" => reason)
        .increment(1);
}

/// `outcome` is a status class (`"2xx"`…`"5xx"`), `"dial_error"` or `"error"`.
pub fn record_round_trip(transport: &'static str, outcome: &'static str, elapsed: Duration) {
    metrics::counter!("upstream_round_trips_total", "transport" => transport, "outcome" => outcome)
        .increment(1);
    metrics::histogram!("upstream_round_trip_duration_seconds", "transport" => transport)
        .record(elapsed.as_secs_f64());
}

/// Status class label for a response status.
pub fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}
