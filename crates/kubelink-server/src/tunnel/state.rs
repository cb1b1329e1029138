//! Tunnel lifecycle states.

use std::fmt;

/// Lifecycle of one agent stream.
///
/// `Unauthenticated → Authenticated → Active → Closed`. `Closed` is terminal
/// and reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelState {
    /// Stream opened, credential not yet verified.
    ///
    /// This phase runs entirely in the gRPC interceptor, which rejects the
    /// stream before any [`TunnelConnection`](crate::registry::TunnelConnection)
    /// exists; connections are therefore built already `Authenticated`.
    Unauthenticated,
    /// Credential verified, connection object built but not yet installed.
    Authenticated,
    /// Installed in the registry; read and heartbeat loops running.
    Active,
    /// Torn down.
    Closed,
}

impl TunnelState {
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unauthenticated, Self::Authenticated)
                | (Self::Authenticated, Self::Active)
                | (Self::Unauthenticated | Self::Authenticated | Self::Active, Self::Closed)
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated => "authenticated",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
