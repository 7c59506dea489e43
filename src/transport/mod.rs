//! Wire framing: the message envelope codec and stream reassembly.
//!
//! This module owns everything between raw socket bytes and decoded
//! messages. [`envelope`] wraps and unwraps the fixed message header
//! (magic, command, length, checksum, and the extended-length variant).
//! [`Reassembler`] copes with TCP's byte-stream semantics: a single read
//! may hold a partial message, exactly one message, or several
//! concatenated messages, and `block` bodies can be routed into a
//! streaming decoder instead of being buffered whole.

pub mod envelope;
mod reassembly;

pub use envelope::{EnvelopeHeader, Frame, FrameStatus, HeaderStatus};
pub use reassembly::{Inbound, Reassembler};

use crate::codec::UnderrunError;
use std::fmt;

/// Error types specific to the framing layer.
#[derive(Debug)]
pub enum TransportError {
    /// Not enough bytes to finish a decode.
    ///
    /// Recoverable while accumulating stream data; fatal when it comes out
    /// of a payload whose length the peer already declared.
    Underrun(UnderrunError),
    /// Envelope did not start with the expected network magic.
    BadMagic {
        expected: [u8; 4],
        received: [u8; 4],
    },
    /// Payload checksum did not match the envelope header.
    Checksum {
        declared: [u8; 4],
        computed: [u8; 4],
    },
    /// Bytes remained after a payload's declared content was consumed.
    TrailingBytes { remaining: usize },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Underrun(err) => write!(f, "{err}"),
            TransportError::BadMagic { expected, received } => write!(
                f,
                "network magic mismatch: expected {}, received {}",
                hex::encode(expected),
                hex::encode(received)
            ),
            TransportError::Checksum { declared, computed } => write!(
                f,
                "payload checksum mismatch: declared {}, computed {}",
                hex::encode(declared),
                hex::encode(computed)
            ),
            TransportError::TrailingBytes { remaining } => {
                write!(f, "{remaining} trailing bytes after payload")
            }
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Underrun(err) => Some(err),
            _ => None,
        }
    }
}

impl From<UnderrunError> for TransportError {
    fn from(err: UnderrunError) -> Self {
        TransportError::Underrun(err)
    }
}
