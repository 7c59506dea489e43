//! Bitcoin SV p2p client library.
//!
//! This crate speaks the client side of the Bitcoin SV wire protocol: it
//! dials a node, performs the version handshake, frames and parses binary
//! protocol messages (including the extended large-message envelope and
//! streaming block decode), and exposes async operations (ping, header
//! fetch, block fetch, transaction broadcast) correlated against the
//! unsolicited inbound message stream.
//!
//! The [`Peer`] type is the recommended high-level API for most
//! applications; the lower layers ([`codec`], [`transport`], [`messages`],
//! [`chain`]) are public for callers that need to speak the wire format
//! directly.

pub mod chain;
pub mod codec;
pub mod messages;
pub mod network;
pub mod peer;
pub mod transport;

pub use chain::{Block, BlockHeader, BlockProgress, BlockStream, Hash256, Transaction};
pub use codec::{BufferReader, BufferWriter, UnderrunError};
pub use messages::{Command, Inventory, NetworkAddress, Reject, Version};
pub use network::Network;
pub use peer::{
    BlockChunkInfo, BlockSummary, LifecycleState, Peer, PeerConfiguration, PeerError, PeerEvent,
    TransactionBatch,
};
pub use transport::{Reassembler, TransportError};
