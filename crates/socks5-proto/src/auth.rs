//! Evaluates a client's advertised method list against server policy
//! (spec.md §4.3) and validates username/password credentials.

use crate::codec::{METHOD_NO_ACCEPTABLE, METHOD_NO_AUTH, METHOD_USERNAME_PASSWORD};

/// A configured username/password pair, both 1..=255 UTF-8 bytes per
/// spec.md §3.
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// Server-side authentication policy (part of the Server Configuration,
/// spec.md §3). Shared read-only across all sessions.
#[derive(Debug, Clone, Default)]
pub struct AuthPolicy {
    pub require_auth: bool,
    pub credential: Option<Credential>,
}

/// Selects a method from the client's offered list per the policy table in
/// spec.md §4.3. Returns `None` when no acceptable method exists, which the
/// caller encodes on the wire as `0xFF`.
pub fn select_method(offered: &[u8], policy: &AuthPolicy) -> Option<u8> {
    if policy.credential.is_some() {
        // Credentials configured: 0x02 is the only acceptable method,
        // preferred over 0x00 even if the client also offers it.
        offered.contains(&METHOD_USERNAME_PASSWORD).then_some(METHOD_USERNAME_PASSWORD)
    } else if !policy.require_auth {
        offered.contains(&METHOD_NO_AUTH).then_some(METHOD_NO_AUTH)
    } else {
        // require_auth is set but no credential was configured: nothing can
        // be validated, so no method is acceptable.
        None
    }
}

pub const NO_ACCEPTABLE_METHOD: u8 = METHOD_NO_ACCEPTABLE;

/// Byte-wise comparison of a submitted username/password against the
/// configured credential.
pub fn verify_credential(policy: &AuthPolicy, username: &str, password: &str) -> bool {
    match &policy.credential {
        Some(cred) => cred.username == username && cred.password == password,
        None => false,
    }
}
