//! Drives one accepted connection through
//! GREETING → (AUTH) → REQUEST → RELAY → CLOSED (spec.md §4.4).
//!
//! Grounded on the teacher's `accept_impl` / `Socks5Acceptor` plus
//! `socks5-server/src/main.rs`'s `process_socket`, restructured as an
//! explicit linear sequence of phases so the "never transitions backward,
//! each phase entered at most once" invariant (spec.md §3) is structural
//! rather than asserted.

use crate::auth::{select_method, verify_credential, NO_ACCEPTABLE_METHOD};
use crate::codec::{
    AuthReply, AuthRequest, ConnectReply, ConnectRequest, Greeting, MethodReply, RequestError, Reply,
    METHOD_USERNAME_PASSWORD,
};
use crate::config::ServerConfig;
use crate::events::{EventSink, SessionEvent};
use crate::relay::relay;
use crate::resolver::{Resolve, TokioResolver};
use socks5_types::DestAddr;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

const FRAME_READ_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The five phases from spec.md §3/§4.4. Not load-bearing for control flow
/// (the `run` function's linear structure already forbids going backward)
/// but useful for event labeling and for tests asserting how far a session
/// got before closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Greeting,
    Auth,
    Request,
    Relay,
    Closed,
}

/// Drives a single accepted connection to completion. Always returns `Ok`
/// once the session reaches a terminal phase through a protocol-defined
/// path (closed after a failure reply, closed after relay ends); returns
/// `Err` only for framing errors and other conditions where spec.md §7
/// calls for closing without any reply at all. Either way the caller should
/// simply drop the connection; no retry is ever appropriate (spec.md §7).
pub async fn run(
    mut client: TcpStream,
    peer: SocketAddr,
    config: &ServerConfig,
    sink: &dyn EventSink,
    resolver: &dyn Resolve,
) -> io::Result<Phase> {
    sink.emit(SessionEvent::Accepted { peer });

    // GREETING
    let greeting = match timeout(FRAME_READ_TIMEOUT, Greeting::read(&mut client)).await {
        Ok(Ok(greeting)) => greeting,
        Ok(Err(e)) => return fail_framing(sink, Phase::Greeting, e),
        Err(_) => return fail_timeout(sink, Phase::Greeting),
    };

    let selected = select_method(&greeting.methods, &config.auth);
    let method_byte = selected.unwrap_or(NO_ACCEPTABLE_METHOD);
    MethodReply(method_byte).write(&mut client).await?;
    sink.emit(SessionEvent::MethodSelected { method: method_byte });

    let Some(method) = selected else {
        return Ok(Phase::Closed);
    };

    // AUTH (only entered when username/password was selected)
    if method == METHOD_USERNAME_PASSWORD {
        let auth_request = match timeout(FRAME_READ_TIMEOUT, AuthRequest::read(&mut client)).await {
            Ok(Ok(req)) => req,
            Ok(Err(e)) => return fail_framing(sink, Phase::Auth, e),
            Err(_) => return fail_timeout(sink, Phase::Auth),
        };

        let ok = verify_credential(&config.auth, &auth_request.username, &auth_request.password);
        sink.emit(SessionEvent::AuthResult { success: ok });

        AuthReply(if ok { 0x00 } else { 0x01 }).write(&mut client).await?;

        if !ok {
            return Ok(Phase::Closed);
        }
    }

    // REQUEST
    let request = match timeout(FRAME_READ_TIMEOUT, ConnectRequest::read(&mut client)).await {
        Ok(Ok(request)) => request,
        Ok(Err(RequestError::UnsupportedAddressType(_))) => {
            return fail_with_reply(&mut client, sink, Reply::AddressTypeNotSupported).await;
        }
        Ok(Err(RequestError::Framing(e))) => return fail_framing(sink, Phase::Request, e),
        Err(_) => return fail_timeout(sink, Phase::Request),
    };

    sink.emit(SessionEvent::RequestParsed {
        cmd: request.cmd.0,
        dst: request.dst.to_string(),
    });

    if !request.cmd.is_connect() {
        return fail_with_reply(&mut client, sink, Reply::CommandNotSupported).await;
    }

    // A literal IPv6 destination (ATYP=0x04) is a request for an address
    // type we were told to refuse, so it is answered with REP=0x08 before
    // ever reaching the resolver. A domain that resolves to IPv6-only
    // addresses is a different case (spec.md §4.2): the resolver itself
    // fails that lookup, which is answered with REP=0x03 below.
    if is_ipv6(&request.dst) && !config.ipv6_enabled {
        return fail_with_reply(&mut client, sink, Reply::AddressTypeNotSupported).await;
    }

    let resolved = match resolver.resolve(&request.dst, config.ipv6_enabled).await {
        Ok(addr) => addr,
        Err(_) => return fail_with_reply(&mut client, sink, Reply::NetworkUnreachable).await,
    };

    let target = match timeout(CONNECT_TIMEOUT, TcpStream::connect(resolved)).await {
        Ok(Ok(target)) => target,
        Ok(Err(e)) => return fail_with_reply(&mut client, sink, Reply::from(&e)).await,
        Err(_) => return fail_with_reply(&mut client, sink, Reply::HostUnreachable).await,
    };

    let bound_addr = match target.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            sink.emit(SessionEvent::Error {
                phase: "request",
                message: e.to_string(),
            });
            return fail_with_reply(&mut client, sink, Reply::GeneralServerFailure).await;
        }
    };

    sink.emit(SessionEvent::UpstreamConnected { bound: bound_addr });

    let reply = ConnectReply::success(bound_addr)?;
    reply.write(&mut client).await?;
    sink.emit(SessionEvent::ReplySent { rep: Reply::Succeeded.to_u8() });

    // RELAY
    match relay(client, target).await {
        Ok(outcome) => {
            sink.emit(SessionEvent::RelayEnded {
                client_to_target: outcome.client_to_target,
                target_to_client: outcome.target_to_client,
            });
        }
        Err(e) => {
            sink.emit(SessionEvent::Error {
                phase: "relay",
                message: e.to_string(),
            });
        }
    }

    Ok(Phase::Closed)
}

fn is_ipv6(dst: &DestAddr) -> bool {
    matches!(dst, DestAddr::Ip(SocketAddr::V6(_)))
}

/// A framing error always closes without sending a reply: the phase that
/// failed had not yet committed to owing one (spec.md §7).
fn fail_framing<E: std::fmt::Display>(sink: &dyn EventSink, phase: Phase, error: E) -> io::Result<Phase> {
    sink.emit(SessionEvent::Error {
        phase: phase_name(phase),
        message: error.to_string(),
    });
    Err(io::Error::new(io::ErrorKind::InvalidData, error.to_string()))
}

fn fail_timeout(sink: &dyn EventSink, phase: Phase) -> io::Result<Phase> {
    sink.emit(SessionEvent::Error {
        phase: phase_name(phase),
        message: "timed out".to_owned(),
    });
    Err(io::Error::new(io::ErrorKind::TimedOut, "frame read timed out"))
}

/// Sends a connect-reply failure and closes. Used for every REQUEST-phase
/// error that spec.md §4.4/§7 says is answered rather than silently closed.
async fn fail_with_reply(client: &mut TcpStream, sink: &dyn EventSink, rep: Reply) -> io::Result<Phase> {
    let reply = ConnectReply::failure(rep);
    let rep_byte = reply.rep.to_u8();
    reply.write(client).await?;
    sink.emit(SessionEvent::ReplySent { rep: rep_byte });
    Ok(Phase::Closed)
}

fn phase_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Greeting => "greeting",
        Phase::Auth => "auth",
        Phase::Request => "request",
        Phase::Relay => "relay",
        Phase::Closed => "closed",
    }
}

/// Convenience wrapper used by the acceptor: owns the `Arc`s so a spawned
/// task only needs to move this one value.
pub async fn run_owned(
    client: TcpStream,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    sink: Arc<dyn EventSink>,
) -> io::Result<Phase> {
    run(client, peer, &config, sink.as_ref(), &TokioResolver).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credential;
    use crate::events::SessionEvent as Ev;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<Ev>>);

    impl EventSink for RecordingSink {
        fn emit(&self, event: Ev) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl RecordingSink {
        fn events(&self) -> Vec<Ev> {
            self.0.lock().unwrap().clone()
        }
    }

    async fn echo_server() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    fn spawn_echo(listener: TcpListener) {
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    loop {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if socket.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });
    }

    #[tokio::test]
    async fn no_auth_happy_path_reaches_relay() {
        let (echo_listener, echo_addr) = echo_server().await;
        spawn_echo(echo_listener);

        let proxy_listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();

        let config = Arc::new(ServerConfig::new("127.0.0.1", proxy_addr.port()));
        let sink = Arc::new(RecordingSink::default());

        let sink_for_session = Arc::clone(&sink);
        let config_for_session = Arc::clone(&config);
        let session_task = tokio::spawn(async move {
            let (socket, peer) = proxy_listener.accept().await.unwrap();
            run_owned(socket, peer, config_for_session, sink_for_session).await
        });

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method_reply = [0u8; 2];
        client.read_exact(&mut method_reply).await.unwrap();
        assert_eq!(method_reply, [0x05, 0x00]);

        let mut connect_req = vec![0x05, 0x01, 0x00, 0x01];
        connect_req.extend_from_slice(&echo_addr.ip().to_string().parse::<std::net::Ipv4Addr>().unwrap().octets());
        connect_req.extend_from_slice(&echo_addr.port().to_be_bytes());
        client.write_all(&connect_req).await.unwrap();

        let mut fixed = [0u8; 4];
        client.read_exact(&mut fixed).await.unwrap();
        assert_eq!(&fixed[..2], &[0x05, 0x00]);
        assert_eq!(fixed[3], 0x01); // ATYP IPv4
        let mut bnd = [0u8; 6];
        client.read_exact(&mut bnd).await.unwrap();

        client.write_all(b"ping").await.unwrap();
        let mut echoed = [0u8; 4];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping");

        client.shutdown().await.unwrap();

        let phase = session_task.await.unwrap().unwrap();
        assert_eq!(phase, Phase::Closed);

        let events = sink.events();
        assert!(matches!(events[0], Ev::Accepted { .. }));
        assert!(events.iter().any(|e| matches!(e, Ev::RelayEnded { .. })));
    }

    #[tokio::test]
    async fn unknown_method_closes_after_0xff() {
        let proxy_listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();

        let mut config = ServerConfig::new("127.0.0.1", proxy_addr.port());
        config.auth.require_auth = true;
        let config = Arc::new(config);
        let sink = Arc::new(RecordingSink::default());

        let session_task = tokio::spawn({
            let config = Arc::clone(&config);
            let sink = Arc::clone(&sink);
            async move {
                let (socket, peer) = proxy_listener.accept().await.unwrap();
                run_owned(socket, peer, config, sink).await
            }
        });

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0xFF]);

        let phase = session_task.await.unwrap().unwrap();
        assert_eq!(phase, Phase::Closed);
    }

    #[tokio::test]
    async fn username_password_failure_closes_without_further_bytes() {
        let proxy_listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();

        let mut config = ServerConfig::new("127.0.0.1", proxy_addr.port());
        config.auth.credential = Some(Credential {
            username: "maki".into(),
            password: "password".into(),
        });
        let config = Arc::new(config);
        let sink = Arc::new(RecordingSink::default());

        let session_task = tokio::spawn({
            let config = Arc::clone(&config);
            let sink = Arc::clone(&sink);
            async move {
                let (socket, peer) = proxy_listener.accept().await.unwrap();
                run_owned(socket, peer, config, sink).await
            }
        });

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        let mut method_reply = [0u8; 2];
        client.read_exact(&mut method_reply).await.unwrap();
        assert_eq!(method_reply, [0x05, 0x02]);

        client
            .write_all(&[0x01, 4, b'm', b'a', b'k', b'i', 3, b'b', b'a', b'd'])
            .await
            .unwrap();

        let mut auth_reply = [0u8; 2];
        client.read_exact(&mut auth_reply).await.unwrap();
        assert_eq!(auth_reply, [0x01, 0x01]);

        // No further bytes should arrive; the peer closes the connection.
        let mut buf = [0u8; 1];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        let phase = session_task.await.unwrap().unwrap();
        assert_eq!(phase, Phase::Closed);
    }

    #[tokio::test]
    async fn unsupported_command_is_rejected_with_reply_0x07() {
        let proxy_listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();

        let config = Arc::new(ServerConfig::new("127.0.0.1", proxy_addr.port()));
        let sink = Arc::new(RecordingSink::default());

        let session_task = tokio::spawn({
            let config = Arc::clone(&config);
            let sink = Arc::clone(&sink);
            async move {
                let (socket, peer) = proxy_listener.accept().await.unwrap();
                run_owned(socket, peer, config, sink).await
            }
        });

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method_reply = [0u8; 2];
        client.read_exact(&mut method_reply).await.unwrap();

        // BIND to 8.8.8.8:53
        client
            .write_all(&[0x05, 0x02, 0x00, 0x01, 8, 8, 8, 8, 0x00, 0x35])
            .await
            .unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x07, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);

        let phase = session_task.await.unwrap().unwrap();
        assert_eq!(phase, Phase::Closed);
    }

    #[tokio::test]
    async fn wrong_version_is_a_silent_close() {
        let proxy_listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();

        let config = Arc::new(ServerConfig::new("127.0.0.1", proxy_addr.port()));
        let sink = Arc::new(RecordingSink::default());

        let session_task = tokio::spawn({
            let config = Arc::clone(&config);
            let sink = Arc::clone(&sink);
            async move {
                let (socket, peer) = proxy_listener.accept().await.unwrap();
                run_owned(socket, peer, config, sink).await
            }
        });

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();

        let mut buf = [0u8; 1];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "server must not reply on a bad greeting version");

        let result = session_task.await.unwrap();
        assert!(result.is_err());
    }

    /// Always resolves to the same fixed address, regardless of `dst`. Used
    /// to drive the AAAA-only fallback path deterministically instead of
    /// depending on the test host's actual DNS records.
    struct FakeResolver(SocketAddr);

    impl Resolve for FakeResolver {
        fn resolve<'a>(
            &'a self,
            _dst: &'a DestAddr,
            ipv6_enabled: bool,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<SocketAddr, crate::resolver::ResolveError>> + Send + 'a>>
        {
            let fixed = self.0;
            Box::pin(async move {
                if fixed.is_ipv6() && !ipv6_enabled {
                    return Err(crate::resolver::ResolveError(io::Error::new(
                        io::ErrorKind::NotFound,
                        "only IPv6 candidates and IPv6 is disabled",
                    )));
                }
                Ok(fixed)
            })
        }
    }

    #[tokio::test]
    async fn domain_resolving_only_to_ipv6_fails_with_network_unreachable_when_ipv6_disabled() {
        let proxy_listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();

        let mut config = ServerConfig::new("127.0.0.1", proxy_addr.port());
        config.ipv6_enabled = false;
        let sink = RecordingSink::default();
        let resolver = FakeResolver(SocketAddr::from((std::net::Ipv6Addr::LOCALHOST, 9)));

        let session_task = tokio::spawn(async move {
            let (socket, peer) = proxy_listener.accept().await.unwrap();
            run(socket, peer, &config, &sink, &resolver).await
        });

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method_reply = [0u8; 2];
        client.read_exact(&mut method_reply).await.unwrap();

        // CONNECT to a domain name; the fake resolver always hands back an
        // IPv6-only candidate so the outcome depends solely on
        // `ipv6_enabled`, not on real name resolution.
        let mut connect_req = vec![0x05, 0x01, 0x00, 0x03, 11];
        connect_req.extend_from_slice(b"example.com");
        connect_req.extend_from_slice(&80u16.to_be_bytes());
        client.write_all(&connect_req).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);

        let phase = session_task.await.unwrap().unwrap();
        assert_eq!(phase, Phase::Closed);
    }
}
