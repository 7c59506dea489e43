//! Observable events emitted by a peer connection.

use crate::chain::{BlockHeader, Hash256, Transaction};
use crate::messages::{Command, Inventory, NetworkAddress, Reject, Version};

/// Result of a completed block fetch.
#[derive(Debug, Clone)]
pub struct BlockSummary {
    /// The block's identifier.
    pub hash: Hash256,
    /// The decoded header.
    pub header: BlockHeader,
    /// Number of transactions in the block.
    pub transaction_count: u64,
    /// Serialized block size in bytes.
    pub size: u64,
    /// The full transaction list.
    ///
    /// Populated only when block streaming is disabled; a streamed block's
    /// transactions are delivered incrementally through
    /// [`PeerEvent::Transactions`] and are not retained.
    pub transactions: Vec<Transaction>,
}

/// A batch of decoded transactions.
///
/// Emitted for every streamed block chunk, for whole blocks when streaming
/// is off, and for lone `tx` messages.
#[derive(Debug, Clone)]
pub struct TransactionBatch {
    /// The containing block, when the transactions came from one.
    pub block: Option<Hash256>,
    /// Transactions with their index within the block (zero for lone
    /// transactions).
    pub transactions: Vec<(u64, Transaction)>,
    /// Whether this batch completes its source message.
    pub finished: bool,
}

/// Boundary marker for one streamed block chunk.
#[derive(Debug, Clone)]
pub struct BlockChunkInfo {
    /// The block being streamed.
    pub hash: Hash256,
    /// Zero-based chunk sequence number.
    pub sequence: u32,
    /// Whether this was the block's first chunk.
    pub started: bool,
    /// Whether this chunk completed the block.
    pub finished: bool,
    /// Transactions decoded so far.
    pub transactions_decoded: u64,
    /// Block payload bytes still expected.
    pub bytes_remaining: u64,
    /// Declared block payload size.
    pub size: u64,
}

/// Events observable on a peer connection.
///
/// Delivered over a broadcast channel; every subscriber sees every event.
/// Slow subscribers may lag and miss events rather than stall the
/// connection.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Socket established and local version sent.
    Connected,
    /// Handshake complete; the connection accepts operations.
    Ready,
    /// Connection torn down, with the cumulative disconnect count.
    Disconnected { disconnects: u64 },
    /// Peer's version handshake message.
    Version(Version),
    /// Peer pinged us (answered automatically).
    Ping,
    /// Peer answered a ping.
    Pong,
    /// A `headers` response.
    Headers(Vec<BlockHeader>),
    /// An inventory announcement.
    Inventory(Inventory),
    /// Block hashes from an inventory announcement.
    BlockHashes(Vec<Hash256>),
    /// A complete block (streaming disabled only).
    Block(BlockSummary),
    /// Decoded transactions from a block chunk, a whole block, or a lone
    /// `tx` message.
    Transactions(TransactionBatch),
    /// A streamed block chunk boundary.
    BlockChunk(BlockChunkInfo),
    /// Peer reported objects it does not have.
    NotFound(Inventory),
    /// Peer requested objects from us.
    GetData(Inventory),
    /// An `addr` address list.
    Addresses(Vec<NetworkAddress>),
    /// Peer rejected one of our messages.
    Reject(Reject),
    /// An `alert` payload, passed through raw.
    Alert { payload: Vec<u8> },
    /// Peer asked us for headers.
    GetHeaders,
    /// Peer prefers header announcements.
    SendHeaders,
    /// A `sendcmpct` payload, passed through raw.
    SendCompact { payload: Vec<u8> },
    /// A command this client does not recognize.
    Unknown { command: String, payload: Vec<u8> },
    /// Every completed message, regardless of command.
    Message { command: Command, payload: Vec<u8> },
    /// Peer sent data that failed to parse; the connection is torn down.
    ProtocolError { message: String },
    /// The socket failed; the connection is torn down.
    SocketError { message: String },
}
