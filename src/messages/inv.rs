//! Inventory vectors, shared by `inv`, `getdata`, and `notfound`.

use crate::chain::Hash256;
use crate::codec::{BufferReader, BufferWriter};
use crate::transport::TransportError;

/// Inventory type tag for a transaction.
pub const INV_TRANSACTION: u32 = 1;
/// Inventory type tag for a block.
pub const INV_BLOCK: u32 = 2;

/// A decoded inventory payload, entries bucketed by type tag.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// Type 0 entries.
    pub errors: Vec<Hash256>,
    /// Type 1 entries.
    pub transactions: Vec<Hash256>,
    /// Type 2 entries.
    pub blocks: Vec<Hash256>,
    /// Type 3 entries.
    pub filtered_blocks: Vec<Hash256>,
    /// Type 4 entries.
    pub compact_blocks: Vec<Hash256>,
    /// Entries with any other tag, preserved raw.
    pub other: Vec<(u32, Hash256)>,
}

impl Inventory {
    /// Decode an inventory payload: a varint count of (type, hash) pairs.
    pub fn read(payload: &[u8]) -> Result<Self, TransportError> {
        let mut reader = BufferReader::new(payload);
        let count = reader.read_varint()?;
        let mut inventory = Inventory::default();
        for _ in 0..count {
            let kind = reader.read_u32_le()?;
            let hash = Hash256::read(&mut reader)?;
            match kind {
                0 => inventory.errors.push(hash),
                INV_TRANSACTION => inventory.transactions.push(hash),
                INV_BLOCK => inventory.blocks.push(hash),
                3 => inventory.filtered_blocks.push(hash),
                4 => inventory.compact_blocks.push(hash),
                other => inventory.other.push((other, hash)),
            }
        }
        if !reader.eof() {
            return Err(TransportError::TrailingBytes {
                remaining: reader.remaining(),
            });
        }
        Ok(inventory)
    }

    /// Total number of entries across all buckets.
    pub fn len(&self) -> usize {
        self.errors.len()
            + self.transactions.len()
            + self.blocks.len()
            + self.filtered_blocks.len()
            + self.compact_blocks.len()
            + self.other.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode an inventory payload announcing or requesting `hashes`, all with
/// the same type tag.
pub fn write(hashes: &[Hash256], kind: u32) -> Vec<u8> {
    let mut writer = BufferWriter::new();
    writer.write_varint(hashes.len() as u64);
    for hash in hashes {
        writer.write_u32_le(kind);
        hash.write(&mut writer);
    }
    writer.into_bytes()
}
