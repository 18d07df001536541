//! Request dispatch: pick a client, send, classify the outcome.
//!
//! # Data Flow
//! ```text
//! round_trip(req, ctx)
//!     → set_scheme (Host header / except_ports)
//!     → Upstream::select
//!         http + h2c enabled     → H2c client (prior knowledge)
//!         templated server name  → request-local copy of the primary
//!         otherwise              → shared primary
//!     → DialScope::run(client.send(req))   (dial parameters for the connector)
//!     → header timer                        (paused while a dial is in flight)
//!     → Response<Body> or RoundTripError
//! ```
//!
//! # Design Decisions
//! - `response_header_timeout` counts from the moment a connection is
//!   available: from the start for pooled connections, from the end of the
//!   last dial otherwise. A slow dial is bounded by `dial_timeout` and
//!   surfaces as a dial error

use std::borrow::Cow;
use std::future::Future;
use std::time::{Duration, Instant};

use axum::body::Body;
use hyper::{Request, Response};

use crate::net::scope::DialTracker;
use crate::observability::metrics;
use crate::transport::builder::{ClientHandle, Provisioned};
use crate::transport::context::RequestContext;
use crate::transport::error::RoundTripError;
use crate::transport::http_transport::HttpTransport;
use crate::transport::replacer::Replacer;

/// The client a request is sent through.
#[derive(Debug)]
pub enum Upstream<'a> {
    Primary(Cow<'a, ClientHandle>),
    H2c(&'a ClientHandle),
}

impl<'a> Upstream<'a> {
    pub fn select(state: &'a Provisioned, scheme: Option<&str>, replacer: &Replacer) -> Self {
        match (&state.h2c, scheme) {
            (Some(h2c), Some("http")) => Upstream::H2c(h2c),
            _ => Upstream::Primary(state.primary_for(replacer)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Upstream::Primary(_) => "primary",
            Upstream::H2c(_) => "h2c",
        }
    }

    fn client(&self) -> &ClientHandle {
        match self {
            Upstream::Primary(handle) => handle.as_ref(),
            Upstream::H2c(handle) => *handle,
        }
    }
}

impl HttpTransport {
    /// Send `req` to its upstream and return the response once headers
    /// arrive. The body streams from the upstream connection.
    pub async fn round_trip(
        &self,
        mut req: Request<Body>,
        ctx: RequestContext,
    ) -> Result<Response<Body>, RoundTripError> {
        let state = self
            .state
            .load_full()
            .ok_or(RoundTripError::NotProvisioned)?;

        self.set_scheme(&mut req)?;
        let upstream = Upstream::select(&state, req.uri().scheme_str(), &ctx.replacer);
        let label = upstream.label();
        let uri = req.uri().clone();

        let started = Instant::now();
        let header_timeout = self.config().response_header_timeout;
        let scope = ctx.dial_scope();
        let send = upstream.client().send(req, state.compression);
        let result = if header_timeout.is_zero() {
            scope.run(send).await.map_err(RoundTripError::from)
        } else {
            let tracker = DialTracker::new();
            let exchange = scope.with_tracker(tracker.clone()).run(send);
            match await_headers(exchange, header_timeout, &tracker).await {
                Some(result) => result.map_err(RoundTripError::from),
                None => Err(RoundTripError::ResponseHeaderTimeout(header_timeout)),
            }
        };
        let elapsed = started.elapsed();

        match &result {
            Ok(response) => {
                metrics::record_round_trip(
                    label,
                    metrics::status_class(response.status().as_u16()),
                    elapsed,
                );
                tracing::trace!(%uri, transport = label, status = %response.status(), ?elapsed, "Upstream responded");
            }
            Err(err) => {
                let dial_error = err.is_dial_error();
                metrics::record_round_trip(
                    label,
                    if dial_error { "dial_error" } else { "error" },
                    elapsed,
                );
                tracing::debug!(%uri, transport = label, dial_error, error = %err, "Upstream round trip failed");
            }
        }
        result
    }
}

/// Drive `exchange` until it completes or `timeout` passes with a connection
/// in hand. Returns `None` on timeout.
async fn await_headers<F: Future>(
    exchange: F,
    timeout: Duration,
    tracker: &DialTracker,
) -> Option<F::Output> {
    tokio::pin!(exchange);
    let mut progress = tracker.subscribe();
    let mut deadline = tokio::time::Instant::now() + timeout;

    loop {
        tokio::select! {
            biased;
            output = &mut exchange => return Some(output),
            _ = tokio::time::sleep_until(deadline) => {}
        }

        let current = *progress.borrow_and_update();
        if current.dialing > 0 {
            tokio::select! {
                biased;
                output = &mut exchange => return Some(output),
                changed = progress.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
            continue;
        }

        match current.settled_at.map(|at| at + timeout) {
            Some(extended) if extended > tokio::time::Instant::now() => deadline = extended,
            _ => return None,
        }
    }
}
