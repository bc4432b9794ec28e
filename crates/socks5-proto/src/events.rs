//! Structured log events emitted at each session phase transition
//! (spec.md §6 Observability). The core never picks a logging transport
//! itself — it hands events to an injected [`EventSink`], keeping
//! `socks5-proto` free of a `tracing-subscriber` dependency.

use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Accepted { peer: SocketAddr },
    MethodSelected { method: u8 },
    AuthResult { success: bool },
    RequestParsed { cmd: u8, dst: String },
    UpstreamConnected { bound: SocketAddr },
    ReplySent { rep: u8 },
    RelayEnded { client_to_target: u64, target_to_client: u64 },
    Error { phase: &'static str, message: String },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

/// Default sink: forwards every event to the `tracing` crate at a severity
/// matching its nature (errors at `warn`, everything else at `debug`/`info`).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: SessionEvent) {
        match event {
            SessionEvent::Accepted { peer } => tracing::info!(%peer, "accepted"),
            SessionEvent::MethodSelected { method } => tracing::debug!(method, "method selected"),
            SessionEvent::AuthResult { success } => tracing::debug!(success, "auth result"),
            SessionEvent::RequestParsed { cmd, dst } => tracing::debug!(cmd, %dst, "request parsed"),
            SessionEvent::UpstreamConnected { bound } => tracing::debug!(%bound, "upstream connected"),
            SessionEvent::ReplySent { rep } => tracing::debug!(rep, "reply sent"),
            SessionEvent::RelayEnded {
                client_to_target,
                target_to_client,
            } => tracing::info!(client_to_target, target_to_client, "relay ended"),
            SessionEvent::Error { phase, message } => tracing::warn!(phase, %message, "session error"),
        }
    }
}
