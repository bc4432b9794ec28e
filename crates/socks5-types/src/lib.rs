//! Destination/bound address value type used by the SOCKS5 wire codec.
//!
//! A SOCKS5 request or reply never carries a resolved host directly: it
//! carries either a literal IP address or a domain name plus a port. This
//! crate models that union so the codec and the session state machine can
//! share one address type without resolving anything themselves.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// An address as it appears on the wire: either already-resolved, or a
/// domain name waiting to be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

/// The server-side endpoint reported back to the client in a connect reply.
/// Always an IP address in practice (the bound local address of the
/// outbound socket), but modeled as `DestAddr` so the codec has a single
/// address encoder/decoder pair for both requests and replies.
pub type BoundAddr = DestAddr;

impl DestAddr {
    pub fn as_ip(&self) -> Option<SocketAddr> {
        match self {
            DestAddr::Ip(ip) => Some(*ip),
            DestAddr::Domain(..) => None,
        }
    }

    pub fn as_domain(&self) -> Option<(&str, u16)> {
        match self {
            DestAddr::Domain(host, port) => Some((host, *port)),
            DestAddr::Ip(_) => None,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            DestAddr::Ip(addr) => addr.port(),
            DestAddr::Domain(_, port) => *port,
        }
    }
}

/// Renders the way a destination shows up in logs and error messages: an IP
/// address prints as-is, a domain prints as `host:port` without requiring a
/// resolution step first.
impl fmt::Display for DestAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestAddr::Ip(addr) => write!(f, "{addr}"),
            DestAddr::Domain(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

/// Converts a value into a [`DestAddr`], similar in spirit to
/// `std::net::ToSocketAddrs` but able to represent an unresolved domain.
pub trait ToDestAddr {
    fn to_dest_addr(&self) -> io::Result<DestAddr>;
}

impl ToDestAddr for DestAddr {
    fn to_dest_addr(&self) -> io::Result<DestAddr> {
        Ok(self.clone())
    }
}

/// `SocketAddr`, `SocketAddrV4` and `SocketAddrV6` all wrap to the same
/// `DestAddr::Ip` shape, differing only in which `std::net` conversion gets
/// there; `SocketAddr: From<T>` already exists for all three, so one macro
/// covers them instead of three near-identical trait impls.
macro_rules! impl_to_dest_addr_for_socket_addr {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ToDestAddr for $ty {
                fn to_dest_addr(&self) -> io::Result<DestAddr> {
                    Ok(DestAddr::Ip(SocketAddr::from(*self)))
                }
            }
        )+
    };
}

impl_to_dest_addr_for_socket_addr!(SocketAddr, SocketAddrV4, SocketAddrV6);

impl ToDestAddr for &str {
    fn to_dest_addr(&self) -> io::Result<DestAddr> {
        if let Ok(addr) = self.parse::<SocketAddrV4>() {
            return addr.to_dest_addr();
        }

        if let Ok(addr) = self.parse::<SocketAddrV6>() {
            return addr.to_dest_addr();
        }

        let (host, port) = self
            .rsplit_once(':')
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "bad socket address format"))?;

        let port: u16 = port
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid port value: {e}")))?;

        // Strip exactly one matching pair of brackets, if present, before
        // retrying as an IPv6 literal; a bare domain name is left untouched.
        let unbracketed = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);

        if let Ok(ip) = unbracketed.parse::<Ipv4Addr>() {
            return Ok(DestAddr::Ip(SocketAddr::V4(SocketAddrV4::new(ip, port))));
        }

        if let Ok(ip) = unbracketed.parse::<Ipv6Addr>() {
            return Ok(DestAddr::Ip(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0))));
        }

        Ok(DestAddr::Domain(host.to_owned(), port))
    }
}

impl ToDestAddr for String {
    fn to_dest_addr(&self) -> io::Result<DestAddr> {
        self.as_str().to_dest_addr()
    }
}

impl<T: ToDestAddr + ?Sized> ToDestAddr for &T {
    fn to_dest_addr(&self) -> io::Result<DestAddr> {
        (**self).to_dest_addr()
    }
}
