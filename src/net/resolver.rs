//! Upstream address resolution.
//!
//! # Responsibilities
//! - Parse resolver override addresses (`[udp/|tcp/]ip[:port]`)
//! - Resolve upstream host names through the override name servers,
//!   picking one uniformly per lookup
//! - Fall back to the system resolver when no override is configured
//!
//! # Design Decisions
//! - The pick is an injectable function so tests can make it deterministic
//! - Weak randomness (`fastrand`) is enough: this spreads load, it does not
//!   guard anything
//! - Name servers must be IP literals; they are parsed once at provisioning

use std::fmt;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};

use hickory_resolver::config::{
    LookupIpStrategy, NameServerConfig, Protocol, ResolverConfig, ResolverOpts,
};
use hickory_resolver::TokioAsyncResolver;
use hyper_util::client::legacy::connect::dns::Name;
use tower::Service;

use crate::config::UpstreamResolverConfig;

const DEFAULT_DNS_PORT: u16 = 53;

/// Error raised while provisioning a resolver override.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolverError {
    #[error("resolver override requires at least one address")]
    NoAddresses,

    #[error("invalid resolver address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// Transport used to reach a name server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsNetwork {
    Udp,
    Tcp,
}

impl DnsNetwork {
    fn protocol(self) -> Protocol {
        match self {
            DnsNetwork::Udp => Protocol::Udp,
            DnsNetwork::Tcp => Protocol::Tcp,
        }
    }
}

/// A validated name server address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkAddress {
    pub network: DnsNetwork,
    pub addr: SocketAddr,
}

impl FromStr for NetworkAddress {
    type Err = ResolverError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ResolverError::InvalidAddress {
            address: input.to_string(),
            reason: reason.to_string(),
        };

        let (network, rest) = match input.split_once('/') {
            Some((net, rest)) => {
                let network = match net.to_ascii_lowercase().as_str() {
                    "udp" | "udp4" | "udp6" => DnsNetwork::Udp,
                    "tcp" | "tcp4" | "tcp6" => DnsNetwork::Tcp,
                    _ => return Err(invalid("network must be udp or tcp")),
                };
                (network, rest)
            }
            None => (DnsNetwork::Udp, input),
        };

        let rest = rest.trim();
        if rest.is_empty() {
            return Err(invalid("missing host"));
        }

        if let Ok(addr) = rest.parse::<SocketAddr>() {
            if addr.port() == 0 {
                return Err(invalid("port must be non-zero"));
            }
            return Ok(Self { network, addr });
        }

        let host = rest
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(rest);
        let ip: IpAddr = host
            .parse()
            .map_err(|_| invalid("host must be an IP address, optionally with a port"))?;
        Ok(Self {
            network,
            addr: SocketAddr::new(ip, DEFAULT_DNS_PORT),
        })
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let net = match self.network {
            DnsNetwork::Udp => "udp",
            DnsNetwork::Tcp => "tcp",
        };
        write!(f, "{}/{}", net, self.addr)
    }
}

/// Parse every configured address, failing on the first malformed entry.
pub fn parse_addresses(addresses: &[String]) -> Result<Vec<NetworkAddress>, ResolverError> {
    if addresses.is_empty() {
        return Err(ResolverError::NoAddresses);
    }
    addresses.iter().map(|a| a.parse()).collect()
}

/// Chooses an index in `0..len`; `len` is never zero.
pub type Picker = Arc<dyn Fn(usize) -> usize + Send + Sync>;

/// Uniform weak-random pick.
pub fn uniform_picker() -> Picker {
    Arc::new(|len| fastrand::usize(..len))
}

/// Resolver that sends each lookup to one of the configured name servers.
#[derive(Clone)]
pub struct UpstreamResolver {
    servers: Arc<[(NetworkAddress, TokioAsyncResolver)]>,
    picker: Picker,
}

impl fmt::Debug for UpstreamResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResolver")
            .field(
                "servers",
                &self.servers.iter().map(|(a, _)| a.to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl UpstreamResolver {
    /// Validate the override and build one resolver per name server.
    pub fn new(config: &UpstreamResolverConfig) -> Result<Self, ResolverError> {
        let addresses = parse_addresses(&config.addresses)?;
        Ok(Self::from_addresses(addresses))
    }

    pub fn from_addresses(addresses: Vec<NetworkAddress>) -> Self {
        let servers = addresses
            .into_iter()
            .map(|address| {
                let mut config = ResolverConfig::new();
                config.add_name_server(NameServerConfig::new(
                    address.addr,
                    address.network.protocol(),
                ));
                let mut opts = ResolverOpts::default();
                opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
                (address, TokioAsyncResolver::tokio(config, opts))
            })
            .collect::<Vec<_>>();

        Self {
            servers: servers.into(),
            picker: uniform_picker(),
        }
    }

    /// Replace the selection function.
    pub fn with_picker(mut self, picker: Picker) -> Self {
        self.picker = picker;
        self
    }

    /// The configured name servers, in configuration order.
    pub fn addresses(&self) -> Vec<NetworkAddress> {
        self.servers.iter().map(|(a, _)| *a).collect()
    }

    /// Index of the name server the next lookup would use.
    pub fn pick(&self) -> usize {
        let len = self.servers.len();
        (self.picker)(len).min(len - 1)
    }

    /// Look up `host` through one picked name server.
    pub async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let (address, resolver) = &self.servers[self.pick()];
        tracing::trace!(host, name_server = %address, "Resolving upstream host");

        let lookup = resolver
            .lookup_ip(host)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(lookup.iter().collect())
    }
}

/// Address resolution used by the base dialer.
#[derive(Debug, Clone)]
pub enum HostResolver {
    /// The operating system resolver.
    System,
    /// Configured name servers.
    Override(UpstreamResolver),
}

impl HostResolver {
    pub async fn resolve(&self, host: &str) -> io::Result<Vec<SocketAddr>> {
        match self {
            HostResolver::System => {
                let addrs = tokio::net::lookup_host((host, 0)).await?;
                Ok(addrs.collect())
            }
            HostResolver::Override(resolver) => {
                let ips = resolver.lookup(host).await?;
                Ok(ips.into_iter().map(|ip| SocketAddr::new(ip, 0)).collect())
            }
        }
    }
}

impl Service<Name> for HostResolver {
    type Response = std::vec::IntoIter<SocketAddr>;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = io::Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, name: Name) -> Self::Future {
        let resolver = self.clone();
        Box::pin(async move {
            let addrs = resolver.resolve(name.as_str()).await?;
            if addrs.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses found for {}", name.as_str()),
                ));
            }
            Ok(addrs.into_iter())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn parses_address_forms() {
        let a: NetworkAddress = "8.8.8.8".parse().unwrap();
        assert_eq!(a.network, DnsNetwork::Udp);
        assert_eq!(a.addr, "8.8.8.8:53".parse().unwrap());

        let b: NetworkAddress = "tcp/1.1.1.1:5353".parse().unwrap();
        assert_eq!(b.network, DnsNetwork::Tcp);
        assert_eq!(b.addr.port(), 5353);

        let c: NetworkAddress = "udp/[::1]".parse().unwrap();
        assert_eq!(c.addr, "[::1]:53".parse().unwrap());

        let d: NetworkAddress = "[2001:db8::1]:54".parse().unwrap();
        assert_eq!(d.addr.port(), 54);
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in ["", "udp/", "sctp/8.8.8.8", "dns.google", "8.8.8.8:0", "1.2.3.4:99999"] {
            assert!(bad.parse::<NetworkAddress>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn one_malformed_entry_fails_the_list() {
        let err = parse_addresses(&["8.8.8.8".into(), "nope".into()]).unwrap_err();
        assert!(matches!(err, ResolverError::InvalidAddress { ref address, .. } if address == "nope"));
        assert_eq!(parse_addresses(&[]).unwrap_err(), ResolverError::NoAddresses);
    }

    #[tokio::test]
    async fn uniform_pick_spreads_across_servers() {
        let resolver = UpstreamResolver::new(&UpstreamResolverConfig {
            addresses: vec!["127.0.0.1:5301".into(), "127.0.0.1:5302".into(), "127.0.0.1:5303".into()],
        })
        .unwrap();

        let mut counts = [0usize; 3];
        for _ in 0..3000 {
            counts[resolver.pick()] += 1;
        }
        for count in counts {
            assert!((700..1300).contains(&count), "skewed distribution: {counts:?}");
        }
    }

    #[tokio::test]
    async fn injected_picker_is_deterministic() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let resolver = UpstreamResolver::new(&UpstreamResolverConfig {
            addresses: vec!["10.0.0.1".into(), "10.0.0.2".into()],
        })
        .unwrap()
        .with_picker(Arc::new(move |len| seen.fetch_add(1, Ordering::SeqCst) % len));

        let picks: Vec<_> = (0..4).map(|_| resolver.pick()).collect();
        assert_eq!(picks, vec![0, 1, 0, 1]);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
