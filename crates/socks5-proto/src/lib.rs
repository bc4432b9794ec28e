//! The SOCKS5 (RFC 1928/1929) connect-proxy core: wire codec, method
//! negotiation, credential check, session state machine, relay pump and
//! listener/acceptor loop.
//!
//! This crate never picks a process entry point or a logging transport —
//! see `socks5-server` for the binary that wires a `ServerConfig` and a
//! `tracing`-backed `EventSink` into [`listener::Acceptor`].

pub mod auth;
pub mod codec;
pub mod config;
pub mod events;
pub mod listener;
pub mod relay;
pub mod resolver;
pub mod session;

pub use config::ServerConfig;
pub use events::{EventSink, SessionEvent, TracingEventSink};
pub use listener::Acceptor;
pub use resolver::{Resolve, TokioResolver};
pub use session::Phase;
