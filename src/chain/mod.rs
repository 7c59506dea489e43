//! Structural decoding of chain primitives.
//!
//! This module understands just enough of the block and transaction wire
//! structure to walk object boundaries and compute identifiers: block
//! headers, transaction framing, and double-SHA256 hashes. There is no
//! script evaluation and no consensus validation here.

mod block_stream;

pub use block_stream::{BlockProgress, BlockStream};

use crate::codec::{BufferReader, BufferWriter, UnderrunError};
use crate::transport::TransportError;
use bitcoin_hashes::{sha256d, Hash as _};
use std::fmt;
use std::str::FromStr;

/// A 32-byte double-SHA256 identifier in display order.
///
/// The wire carries hashes byte-reversed relative to how they are rendered
/// and compared everywhere else; this type always holds the display order
/// and reverses at the codec boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Double-SHA256 of `data`, in display order.
    pub fn digest(data: &[u8]) -> Self {
        let mut bytes = sha256d::Hash::hash(data).to_byte_array();
        bytes.reverse();
        Hash256(bytes)
    }

    /// Wrap bytes already in display order.
    pub fn from_display_bytes(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }

    /// Wrap bytes in wire order.
    pub fn from_wire_bytes(mut bytes: [u8; 32]) -> Self {
        bytes.reverse();
        Hash256(bytes)
    }

    /// The display-order bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Read a wire-order hash field.
    pub fn read(reader: &mut BufferReader<'_>) -> Result<Self, UnderrunError> {
        let mut bytes = reader.read_array::<32>()?;
        bytes.reverse();
        Ok(Hash256(bytes))
    }

    /// Write this hash as a wire-order field.
    pub fn write(&self, writer: &mut BufferWriter) {
        writer.write_reverse(&self.0);
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", hex::encode(self.0))
    }
}

/// Failed to parse a hash from its hex rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum HashParseError {
    /// The string does not decode to exactly 32 bytes.
    Length(usize),
    /// The string is not valid hex.
    Hex(hex::FromHexError),
}

impl fmt::Display for HashParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashParseError::Length(len) => {
                write!(f, "expected 32 hash bytes, got {len}")
            }
            HashParseError::Hex(err) => write!(f, "invalid hash hex: {err}"),
        }
    }
}

impl std::error::Error for HashParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HashParseError::Length(_) => None,
            HashParseError::Hex(err) => Some(err),
        }
    }
}

impl FromStr for Hash256 {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(s).map_err(HashParseError::Hex)?;
        if decoded.len() != 32 {
            return Err(HashParseError::Length(decoded.len()));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        Ok(Hash256(bytes))
    }
}

/// An 80-byte block header with its identifier precomputed.
#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    hash: Hash256,
}

impl BlockHeader {
    /// Serialized size of a block header.
    pub const SIZE: usize = 80;

    /// Read a header and hash its raw bytes.
    pub fn read(reader: &mut BufferReader<'_>) -> Result<Self, UnderrunError> {
        let raw = reader.read(Self::SIZE)?;
        let mut fields = BufferReader::new(raw);
        Ok(BlockHeader {
            version: fields.read_i32_le()?,
            prev_block: Hash256::read(&mut fields)?,
            merkle_root: Hash256::read(&mut fields)?,
            time: fields.read_u32_le()?,
            bits: fields.read_u32_le()?,
            nonce: fields.read_u32_le()?,
            hash: Hash256::digest(raw),
        })
    }

    /// The header's double-SHA256 identifier.
    pub fn hash(&self) -> Hash256 {
        self.hash
    }
}

/// A transaction carried as raw bytes with its boundaries walked and its
/// identifier precomputed.
#[derive(Debug, Clone)]
pub struct Transaction {
    raw: Vec<u8>,
    hash: Hash256,
    pub version: u32,
    pub input_count: u64,
    pub output_count: u64,
    pub lock_time: u32,
}

impl Transaction {
    /// Read one transaction off the cursor, consuming exactly its
    /// serialized extent.
    pub fn read(reader: &mut BufferReader<'_>) -> Result<Self, UnderrunError> {
        let start = reader.position();
        let mut probe = reader.clone();

        let version = probe.read_u32_le()?;
        let input_count = probe.read_varint()?;
        for _ in 0..input_count {
            // Outpoint: previous txid + output index.
            probe.read(36)?;
            let script_length = probe.read_varint()?;
            probe.read(script_length as usize)?;
            // Sequence.
            probe.read(4)?;
        }
        let output_count = probe.read_varint()?;
        for _ in 0..output_count {
            // Value.
            probe.read(8)?;
            let script_length = probe.read_varint()?;
            probe.read(script_length as usize)?;
        }
        let lock_time = probe.read_u32_le()?;

        let size = probe.position() - start;
        let raw = reader.read(size)?.to_vec();
        let hash = Hash256::digest(&raw);

        Ok(Transaction {
            raw,
            hash,
            version,
            input_count,
            output_count,
            lock_time,
        })
    }

    /// Decode a transaction that must occupy the whole byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        let mut reader = BufferReader::new(bytes);
        let transaction = Transaction::read(&mut reader)?;
        if !reader.eof() {
            return Err(TransportError::TrailingBytes {
                remaining: reader.remaining(),
            });
        }
        Ok(transaction)
    }

    /// The transaction's double-SHA256 identifier.
    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    /// The raw serialized bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        self.raw.len()
    }
}

/// A fully buffered block: header plus every transaction.
///
/// Only materialized when block streaming is disabled; the streaming path
/// goes through [`BlockStream`] and never holds all transactions at once.
#[derive(Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Decode a complete block payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        let mut reader = BufferReader::new(bytes);
        let header = BlockHeader::read(&mut reader)?;
        let count = reader.read_varint()?;
        let mut transactions = Vec::with_capacity(count.min(1 << 16) as usize);
        for _ in 0..count {
            transactions.push(Transaction::read(&mut reader)?);
        }
        if !reader.eof() {
            return Err(TransportError::TrailingBytes {
                remaining: reader.remaining(),
            });
        }
        Ok(Block {
            header,
            transactions,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_vectors {
    use super::*;

    /// A minimal structurally valid transaction: one input with an empty
    /// script, one output with an empty script.
    pub fn transaction(marker: u8) -> Vec<u8> {
        let mut writer = BufferWriter::new();
        writer
            .write_u32_le(1) // version
            .write_varint(1) // inputs
            .write(&[marker; 36]) // outpoint
            .write_varint(0) // script length
            .write_u32_le(0xffff_ffff) // sequence
            .write_varint(1) // outputs
            .write_u64_le(5_000) // value
            .write_varint(0) // script length
            .write_u32_le(0); // lock time
        writer.into_bytes()
    }

    /// An 80-byte header for test blocks.
    pub fn header_bytes() -> Vec<u8> {
        let mut writer = BufferWriter::new();
        writer
            .write_i32_le(1)
            .write(&[0x11; 32])
            .write(&[0x22; 32])
            .write_u32_le(1_700_000_000)
            .write_u32_le(0x1d00_ffff)
            .write_u32_le(42);
        writer.into_bytes()
    }

    /// A block payload with the given transactions.
    pub fn block_payload(transactions: &[Vec<u8>]) -> Vec<u8> {
        let mut writer = BufferWriter::new();
        writer.write(&header_bytes());
        writer.write_varint(transactions.len() as u64);
        for tx in transactions {
            writer.write(tx);
        }
        writer.into_bytes()
    }
}
