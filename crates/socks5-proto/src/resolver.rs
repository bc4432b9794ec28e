//! Resolves a [`DestAddr`] parsed from a connect request into a concrete
//! [`SocketAddr`] the acceptor can dial.
//!
//! IP literals never touch the resolver beyond a match arm. Domain names go
//! through a synchronous-looking (but non-blocking, since it is backed by
//! `tokio::net::lookup_host`) forward lookup, preferring the first IPv4
//! result and falling back to IPv6 only when the caller's configuration
//! allows it (spec.md §4.2).

use socks5_types::DestAddr;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

/// Resolution failed: either the lookup itself errored, or it succeeded
/// with no address usable under the caller's IPv6 policy (treated the same
/// way by spec.md §4.2: "fail with REP=0x03").
#[derive(Debug)]
pub struct ResolveError(pub io::Error);

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "resolution failed: {}", self.0)
    }
}

impl std::error::Error for ResolveError {}

/// Abstracts DNS resolution behind a trait the same way
/// [`crate::events::EventSink`] abstracts the logging transport, so
/// `session::run` can be driven in tests with a resolver that returns a
/// fixed answer instead of depending on the test host's actual DNS setup.
pub trait Resolve: Send + Sync {
    fn resolve<'a>(
        &'a self,
        dst: &'a DestAddr,
        ipv6_enabled: bool,
    ) -> Pin<Box<dyn Future<Output = Result<SocketAddr, ResolveError>> + Send + 'a>>;
}

/// Production resolver backed by `tokio::net::lookup_host`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioResolver;

impl Resolve for TokioResolver {
    fn resolve<'a>(
        &'a self,
        dst: &'a DestAddr,
        ipv6_enabled: bool,
    ) -> Pin<Box<dyn Future<Output = Result<SocketAddr, ResolveError>> + Send + 'a>> {
        Box::pin(resolve(dst, ipv6_enabled))
    }
}

pub async fn resolve(dst: &DestAddr, ipv6_enabled: bool) -> Result<SocketAddr, ResolveError> {
    match dst {
        DestAddr::Ip(addr) => Ok(*addr),
        DestAddr::Domain(host, port) => {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), *port))
                .await
                .map_err(ResolveError)?
                .collect();

            pick_candidate(addrs, ipv6_enabled).ok_or_else(|| {
                ResolveError(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no usable address found for {host}:{port}"),
                ))
            })
        }
    }
}

/// Prefers the first IPv4 result; falls back to the first IPv6 result only
/// when `ipv6_enabled`. When disabled and only IPv6 candidates exist, this
/// returns `None` so the caller fails with REP=0x03 rather than dialing an
/// address type it was configured to refuse (spec.md §4.2).
fn pick_candidate(mut addrs: Vec<SocketAddr>, ipv6_enabled: bool) -> Option<SocketAddr> {
    if let Some(idx) = addrs.iter().position(SocketAddr::is_ipv4) {
        return Some(addrs.swap_remove(idx));
    }

    if ipv6_enabled {
        addrs.into_iter().next()
    } else {
        None
    }
}
