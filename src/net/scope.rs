//! Per-request dial parameters.
//!
//! The pooled client only hands the connector a `Uri`. Anything else a dial
//! needs (an explicit network address, the client address for a PROXY
//! header) travels in a task-local scope set around the request future.
//!
//! # Data Flow
//! ```text
//! round_trip(req, ctx)
//!     → DIAL_SCOPE.scope(DialScope { .. }, client.request(req))
//!         → UpstreamConnector::call(uri)
//!             → DialScope::current()   (read synchronously, before any await)
//!             → DialTracker::begin     (dial in progress until the guard drops)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;

tokio::task_local! {
    static DIAL_SCOPE: DialScope;
}

/// An explicit dial target chosen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialInfo {
    /// `"tcp"`, `"tcp4"`, `"tcp6"`, `"unix"`, `"unixgram"` or `"unixpacket"`.
    pub network: String,
    /// `host:port` for TCP networks or a filesystem path for unix sockets.
    pub address: String,
}

impl DialInfo {
    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            network: "tcp".to_string(),
            address: address.into(),
        }
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            network: "unix".to_string(),
            address: path.into(),
        }
    }

    pub fn is_unix(&self) -> bool {
        self.network.starts_with("unix")
    }
}

/// Source address of the downstream client, written into PROXY headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyProtocolInfo {
    pub source: SocketAddr,
}

/// Dials started on behalf of one round trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DialProgress {
    /// Dials currently connecting.
    pub dialing: usize,
    /// When the last dial finished, successfully or not.
    pub settled_at: Option<Instant>,
}

/// Shared view of [`DialProgress`], updated by the connector.
#[derive(Debug, Clone)]
pub struct DialTracker(Arc<watch::Sender<DialProgress>>);

impl DialTracker {
    pub fn new() -> Self {
        Self(Arc::new(watch::channel(DialProgress::default()).0))
    }

    pub fn progress(&self) -> DialProgress {
        *self.0.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DialProgress> {
        self.0.subscribe()
    }

    /// Mark a dial as started. It counts as settled when the guard drops.
    pub fn begin(&self) -> DialGuard {
        self.0.send_modify(|progress| progress.dialing += 1);
        DialGuard {
            tracker: self.clone(),
        }
    }
}

impl Default for DialTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for DialTracker {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for DialTracker {}

/// A dial in progress.
#[derive(Debug)]
pub struct DialGuard {
    tracker: DialTracker,
}

impl Drop for DialGuard {
    fn drop(&mut self) {
        self.tracker.0.send_modify(|progress| {
            progress.dialing = progress.dialing.saturating_sub(1);
            progress.settled_at = Some(Instant::now());
        });
    }
}

/// Everything a single dial may need beyond the request URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialScope {
    pub dial_info: Option<DialInfo>,
    pub proxy_protocol: Option<ProxyProtocolInfo>,
    pub tracker: Option<DialTracker>,
}

impl DialScope {
    pub fn with_tracker(mut self, tracker: DialTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// The scope of the running request, or an empty one outside any request.
    pub fn current() -> Self {
        DIAL_SCOPE.try_with(Clone::clone).unwrap_or_default()
    }

    /// Run `fut` with this scope visible to every dial it triggers.
    pub async fn run<F: std::future::Future>(self, fut: F) -> F::Output {
        DIAL_SCOPE.scope(self, fut).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scope_is_visible_inside_and_empty_outside() {
        assert_eq!(DialScope::current(), DialScope::default());

        let scope = DialScope {
            dial_info: Some(DialInfo::unix("/run/app.sock")),
            proxy_protocol: Some(ProxyProtocolInfo {
                source: "192.0.2.7:4000".parse().unwrap(),
            }),
            tracker: None,
        };

        let seen = scope.clone().run(async { DialScope::current() }).await;
        assert_eq!(seen, scope);
        assert!(seen.dial_info.unwrap().is_unix());
        assert_eq!(DialScope::current(), DialScope::default());
    }

    #[tokio::test(start_paused = true)]
    async fn guard_counts_dial_until_dropped() {
        let tracker = DialTracker::new();
        let scope = DialScope::default().with_tracker(tracker.clone());
        assert_eq!(scope.tracker.as_ref(), Some(&tracker));
        assert_ne!(Some(DialTracker::new()), scope.tracker);

        let first = tracker.begin();
        let second = tracker.begin();
        assert_eq!(tracker.progress().dialing, 2);
        assert_eq!(tracker.progress().settled_at, None);

        drop(first);
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        drop(second);
        let progress = tracker.progress();
        assert_eq!(progress.dialing, 0);
        assert_eq!(progress.settled_at, Some(Instant::now()));
    }
}
