//! Connection lifecycle states.

use std::fmt;

/// Lifecycle of a peer connection.
///
/// The happy path walks `Disconnected → Connecting → Handshaking → Ready`;
/// every state can fall back to `Disconnected` on a socket error, a
/// peer-initiated close, or an explicit disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No socket. The idle and terminal state.
    Disconnected,
    /// TCP dial in progress.
    Connecting,
    /// Socket up, local version sent, waiting for the peer's verack.
    Handshaking,
    /// Handshake complete; operations are accepted.
    Ready,
}

impl LifecycleState {
    /// Whether operations may be issued in this state.
    pub fn is_ready(&self) -> bool {
        matches!(self, LifecycleState::Ready)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Disconnected => write!(f, "disconnected"),
            LifecycleState::Connecting => write!(f, "connecting"),
            LifecycleState::Handshaking => write!(f, "handshaking"),
            LifecycleState::Ready => write!(f, "ready"),
        }
    }
}
