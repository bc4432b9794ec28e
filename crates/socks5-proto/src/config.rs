//! Server Configuration (spec.md §3): immutable once constructed, shared
//! read-only by every session. The embedder builds this directly — no CLI
//! parsing or file format lives in this crate (spec.md §1 scopes that out
//! of the core).

use crate::auth::AuthPolicy;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_host: String,
    pub bind_port: u16,
    /// Listen backlog passed to the OS.
    pub max_pending: u32,
    pub auth: AuthPolicy,
    /// When `true` (the default), ATYP=0x04 (IPv6) requests are resolved and
    /// dialed like any other destination. When `false`, they are answered
    /// with REP=0x08 (address type not supported) instead, per the
    /// alternative spec.md §9 allows ("Do not silently hang").
    pub ipv6_enabled: bool,
}

impl ServerConfig {
    pub fn new(bind_host: impl Into<String>, bind_port: u16) -> Self {
        Self {
            bind_host: bind_host.into(),
            bind_port,
            max_pending: 128,
            auth: AuthPolicy::default(),
            ipv6_enabled: true,
        }
    }
}
