//! Which side of the connection a codec speaks for.

/// WebSocket connection role.
///
/// Determines masking in both directions per RFC 6455 Section 5.1. The
/// client role is what this crate runs; the server role exists so a codec can
/// read what a client wrote (fake peers, tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Client role - masks outgoing frames, rejects masked incoming frames.
    Client,
    /// Server role - sends unmasked frames, requires masked incoming frames.
    Server,
}

impl Role {
    /// Check if this role must mask outgoing frames.
    #[inline]
    #[must_use]
    pub const fn must_mask(&self) -> bool {
        matches!(self, Role::Client)
    }

    /// Check if this role expects incoming frames to be masked.
    #[inline]
    #[must_use]
    pub const fn expects_masked(&self) -> bool {
        matches!(self, Role::Server)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "Client"),
            Role::Server => write!(f, "Server"),
        }
    }
}
