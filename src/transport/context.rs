//! The explicit per-request parameters of a round trip.

use crate::net::scope::{DialInfo, DialScope, ProxyProtocolInfo};
use crate::transport::replacer::Replacer;

/// Supplied by the upstream router for each request.
///
/// `dial_info` absent: the URI decides where to connect. `proxy_protocol`
/// absent while PROXY protocol is enabled: the request fails.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub replacer: Replacer,
    pub dial_info: Option<DialInfo>,
    pub proxy_protocol: Option<ProxyProtocolInfo>,
}

impl RequestContext {
    pub fn new(replacer: Replacer) -> Self {
        Self {
            replacer,
            ..Default::default()
        }
    }

    pub fn with_dial_info(mut self, dial_info: DialInfo) -> Self {
        self.dial_info = Some(dial_info);
        self
    }

    pub fn with_proxy_protocol(mut self, info: ProxyProtocolInfo) -> Self {
        self.proxy_protocol = Some(info);
        self
    }

    pub(crate) fn dial_scope(&self) -> DialScope {
        DialScope {
            dial_info: self.dial_info.clone(),
            proxy_protocol: self.proxy_protocol,
            tracker: None,
        }
    }
}
