//! Error types for peer operations.

use crate::transport::TransportError;
use std::error::Error;
use std::fmt;
use std::io;

/// Errors surfaced by peer operations.
#[derive(Debug)]
pub enum PeerError {
    /// An I/O error occurred during network operations.
    Io(io::Error),
    /// The framing or payload codec failed on peer data.
    Transport(TransportError),
    /// The operation requires a completed handshake.
    NotConnected,
    /// The operation's deadline elapsed. Rejects only that operation.
    Timeout,
    /// The peer explicitly reported it does not have the requested data.
    NotFound,
    /// The connection dropped while the operation was outstanding.
    Disconnected,
    /// The request exceeds the fixed per-message batch limit.
    TooManyItems { count: usize, max: usize },
    /// An identical request is already outstanding.
    RequestPending,
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerError::Io(err) => write!(f, "connection error: {err}"),
            PeerError::Transport(err) => write!(f, "wire protocol error: {err}"),
            PeerError::NotConnected => write!(f, "not connected"),
            PeerError::Timeout => write!(f, "operation timed out"),
            PeerError::NotFound => write!(f, "peer does not have the requested data"),
            PeerError::Disconnected => write!(f, "disconnected"),
            PeerError::TooManyItems { count, max } => {
                write!(f, "too many items in one message: {count} (max {max})")
            }
            PeerError::RequestPending => {
                write!(f, "an identical request is already outstanding")
            }
        }
    }
}

impl Error for PeerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PeerError::Io(err) => Some(err),
            PeerError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for PeerError {
    fn from(err: io::Error) -> Self {
        PeerError::Io(err)
    }
}

impl From<TransportError> for PeerError {
    fn from(err: TransportError) -> Self {
        PeerError::Transport(err)
    }
}
