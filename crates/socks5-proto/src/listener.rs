//! Binds the TCP endpoint and spawns one task per accepted connection
//! (spec.md §4.6). Grounded on `crates/socks5-server/src/main.rs`'s
//! `main`/`process_socket` accept loop.

use crate::config::ServerConfig;
use crate::events::EventSink;
use crate::session;
use socket2::{Domain, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Owns the listening socket and the shared, read-only configuration. The
/// acceptor itself never blocks on a single session: each accepted
/// connection is handed to its own `tokio::spawn`ed task.
pub struct Acceptor {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    sink: Arc<dyn EventSink>,
}

impl Acceptor {
    /// Binds and starts listening with `config.max_pending` as the OS
    /// backlog (spec.md §3/§4.6) rather than whatever default
    /// `std::net::TcpListener` would otherwise pick, going through
    /// `socket2` the same way the workspace's other socket-tuning code
    /// does.
    pub async fn bind(config: Arc<ServerConfig>, sink: Arc<dyn EventSink>) -> io::Result<Self> {
        use std::net::ToSocketAddrs;

        let addr: SocketAddr = (config.bind_host.as_str(), config.bind_port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "bind address did not resolve"))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(config.max_pending as i32)?;

        let listener = TcpListener::from_std(socket.into())?;
        Ok(Self { listener, config, sink })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever, spawning an independent task per
    /// session. Each session's errors are terminal to that session alone
    /// (spec.md §7) and never propagate out of this loop.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (socket, peer) = self.listener.accept().await?;

            let config = Arc::clone(&self.config);
            let sink = Arc::clone(&self.sink);

            tokio::spawn(async move {
                if let Err(e) = session::run_owned(socket, peer, config, sink).await {
                    tracing::debug!(%peer, error = %e, "session ended with an error");
                }
            });
        }
    }
}
