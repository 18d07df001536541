//! PROXY protocol headers (HAProxy PROXY protocol, versions 1 and 2).
//!
//! The header announces the downstream client's address to the upstream. The
//! destination is always reported as the unspecified address of the same
//! family with port 0.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::config::ProxyProtocolVersion;

const V2_SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];
/// Version 2, PROXY command.
const V2_VERSION_COMMAND: u8 = 0x21;
const V2_TCP4: u8 = 0x11;
const V2_TCP6: u8 = 0x21;

/// A PROXY header for one upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyHeader {
    pub version: ProxyProtocolVersion,
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

impl ProxyHeader {
    pub fn new(version: ProxyProtocolVersion, source: SocketAddr) -> Self {
        let unspecified = match source.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        Self {
            version,
            source,
            destination: SocketAddr::new(unspecified, 0),
        }
    }

    /// Encode the header. Empty when the version is `Off`.
    pub fn encode(&self) -> Vec<u8> {
        match self.version {
            ProxyProtocolVersion::Off => Vec::new(),
            ProxyProtocolVersion::V1 => self.encode_v1(),
            ProxyProtocolVersion::V2 => self.encode_v2(),
        }
    }

    fn encode_v1(&self) -> Vec<u8> {
        let family = if self.source.is_ipv4() { "TCP4" } else { "TCP6" };
        format!(
            "PROXY {} {} {} {} {}\r\n",
            family,
            self.source.ip(),
            self.destination.ip(),
            self.source.port(),
            self.destination.port()
        )
        .into_bytes()
    }

    fn encode_v2(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 36);
        out.extend_from_slice(&V2_SIGNATURE);
        out.push(V2_VERSION_COMMAND);

        match (self.source.ip(), self.destination.ip()) {
            (IpAddr::V4(src), IpAddr::V4(dst)) => {
                out.push(V2_TCP4);
                out.extend_from_slice(&12u16.to_be_bytes());
                out.extend_from_slice(&src.octets());
                out.extend_from_slice(&dst.octets());
            }
            (src, dst) => {
                out.push(V2_TCP6);
                out.extend_from_slice(&36u16.to_be_bytes());
                out.extend_from_slice(&to_v6(src).octets());
                out.extend_from_slice(&to_v6(dst).octets());
            }
        }
        out.extend_from_slice(&self.source.port().to_be_bytes());
        out.extend_from_slice(&self.destination.port().to_be_bytes());
        out
    }

    /// Write the header as the first bytes of `io`.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, io: &mut W) -> io::Result<()> {
        let bytes = self.encode();
        if bytes.is_empty() {
            return Ok(());
        }
        io.write_all(&bytes).await?;
        io.flush().await
    }
}

fn to_v6(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}
