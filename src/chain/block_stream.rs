//! Incremental decoding of a block arriving across many socket reads.
//!
//! A block envelope can be many megabytes; buffering it whole before
//! decoding would hold the entire payload in memory. [`BlockStream`]
//! instead consumes raw chunks as they arrive, yields the header and each
//! transaction as soon as they become decodable, and retains only the
//! bytes of the transaction currently straddling a chunk boundary.

use crate::chain::{BlockHeader, Transaction};
use crate::codec::{BufferReader, UnderrunError};
use crate::transport::TransportError;

/// Progress report for one pushed chunk.
#[derive(Debug, Clone)]
pub struct BlockProgress {
    /// The block header, present from the first chunk that completes it.
    pub header: Option<BlockHeader>,
    /// Transactions completed by this chunk, with their block-wide indices.
    pub transactions: Vec<(u64, Transaction)>,
    /// Declared transaction count, once its varint has been decoded.
    pub transaction_count: Option<u64>,
    /// Running count of transactions decoded so far.
    pub transactions_decoded: u64,
    /// Block payload bytes still expected from the socket.
    pub bytes_remaining: u64,
    /// Declared size of the whole block payload.
    pub size: u64,
    /// Whether this was the first chunk of the block.
    pub started: bool,
    /// Whether the block payload is now complete.
    pub finished: bool,
    /// Zero-based chunk sequence number.
    pub chunk: u32,
}

/// Streaming decoder for a single `block` envelope body.
///
/// Created when a block envelope begins and dropped once
/// [`BlockProgress::finished`] is reported. Bytes past the declared payload
/// length belong to the next envelope and are handed back through
/// [`BlockStream::take_leftover`].
#[derive(Debug)]
pub struct BlockStream {
    expected: u64,
    received: u64,
    pending: Vec<u8>,
    header: Option<BlockHeader>,
    transaction_count: Option<u64>,
    transactions_decoded: u64,
    chunks: u32,
    leftover: Vec<u8>,
}

impl BlockStream {
    /// Start a stream for a block envelope declaring `payload_length` bytes.
    pub fn new(payload_length: u64) -> Self {
        Self {
            expected: payload_length,
            received: 0,
            pending: Vec::new(),
            header: None,
            transaction_count: None,
            transactions_decoded: 0,
            chunks: 0,
            leftover: Vec::new(),
        }
    }

    /// The block header, once enough bytes have arrived to decode it.
    pub fn header(&self) -> Option<&BlockHeader> {
        self.header.as_ref()
    }

    /// Block payload bytes still expected.
    pub fn bytes_remaining(&self) -> u64 {
        self.expected - self.received
    }

    /// Bytes past the block payload, belonging to the next envelope.
    pub fn take_leftover(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.leftover)
    }

    /// Feed the next raw chunk and decode whatever it completes.
    ///
    /// A finished stream with bytes that never formed the declared
    /// transactions means the peer's length declaration and content
    /// disagree; that is a protocol failure, not something more bytes can
    /// repair.
    pub fn push(&mut self, data: &[u8]) -> Result<BlockProgress, TransportError> {
        let accept = (self.expected - self.received).min(data.len() as u64) as usize;
        self.pending.extend_from_slice(&data[..accept]);
        self.leftover.extend_from_slice(&data[accept..]);
        self.received += accept as u64;

        let started = self.chunks == 0;
        let chunk = self.chunks;
        self.chunks += 1;

        let mut new_header = None;
        let mut new_count = None;
        let mut new_transactions = Vec::new();
        let mut consumed = 0;
        {
            let mut reader = BufferReader::new(&self.pending);
            if self.header.is_none() {
                if let Ok(header) = BlockHeader::read(&mut reader) {
                    new_header = Some(header);
                    consumed = reader.position();
                }
            }
            if self.header.is_some() || new_header.is_some() {
                let mut count = self.transaction_count;
                if count.is_none() {
                    let mut attempt = reader.clone();
                    if let Ok(value) = attempt.read_varint() {
                        reader = attempt;
                        consumed = reader.position();
                        new_count = Some(value);
                        count = Some(value);
                    }
                }
                if let Some(count) = count {
                    while self.transactions_decoded + (new_transactions.len() as u64) < count {
                        let mut attempt = reader.clone();
                        match Transaction::read(&mut attempt) {
                            Ok(transaction) => {
                                reader = attempt;
                                consumed = reader.position();
                                let index =
                                    self.transactions_decoded + new_transactions.len() as u64;
                                new_transactions.push((index, transaction));
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
        }
        self.pending.drain(..consumed);
        if let Some(header) = new_header {
            self.header = Some(header);
        }
        if let Some(count) = new_count {
            self.transaction_count = Some(count);
        }
        self.transactions_decoded += new_transactions.len() as u64;

        let finished = self.received == self.expected;
        if finished {
            if !self.pending.is_empty() {
                return Err(TransportError::TrailingBytes {
                    remaining: self.pending.len(),
                });
            }
            let complete = self.header.is_some()
                && self
                    .transaction_count
                    .map(|count| count == self.transactions_decoded)
                    .unwrap_or(false);
            if !complete {
                return Err(TransportError::Underrun(UnderrunError { needed: 1 }));
            }
        }

        Ok(BlockProgress {
            header: self.header.clone(),
            transactions: new_transactions,
            transaction_count: self.transaction_count,
            transactions_decoded: self.transactions_decoded,
            bytes_remaining: self.expected - self.received,
            size: self.expected,
            started,
            finished,
            chunk,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::test_vectors;
    use crate::chain::Hash256;

    fn decode_in_chunks(payload: &[u8], chunk_size: usize) -> Vec<Hash256> {
        let mut stream = BlockStream::new(payload.len() as u64);
        let mut hashes = Vec::new();
        for chunk in payload.chunks(chunk_size) {
            let progress = stream.push(chunk).unwrap();
            hashes.extend(progress.transactions.iter().map(|(_, tx)| tx.hash()));
            if progress.finished {
                assert_eq!(progress.bytes_remaining, 0);
            }
        }
        hashes
    }

    #[test]
    fn test_chunk_boundary_invariance() {
        let txs = vec![
            test_vectors::transaction(1),
            test_vectors::transaction(2),
            test_vectors::transaction(3),
        ];
        let payload = test_vectors::block_payload(&txs);

        let whole = decode_in_chunks(&payload, payload.len());
        assert_eq!(whole.len(), 3);
        // Any split of the same bytes yields the same transactions.
        for chunk_size in [1, 7, 80, 81, 113] {
            assert_eq!(decode_in_chunks(&payload, chunk_size), whole);
        }
    }

    #[test]
    fn test_header_and_counts_reported() {
        let txs = vec![test_vectors::transaction(9)];
        let payload = test_vectors::block_payload(&txs);
        let mut stream = BlockStream::new(payload.len() as u64);

        // First push holds only part of the header.
        let progress = stream.push(&payload[..40]).unwrap();
        assert!(progress.header.is_none());
        assert!(progress.started);
        assert!(!progress.finished);
        assert_eq!(progress.chunk, 0);

        // Remainder completes header, count, and the transaction.
        let progress = stream.push(&payload[40..]).unwrap();
        let header = progress.header.expect("header decoded");
        assert_eq!(
            header.hash(),
            Hash256::digest(&test_vectors::header_bytes())
        );
        assert_eq!(progress.transaction_count, Some(1));
        assert_eq!(progress.transactions_decoded, 1);
        assert!(progress.finished);
        assert_eq!(progress.chunk, 1);
    }

    #[test]
    fn test_leftover_returned_to_caller() {
        let payload = test_vectors::block_payload(&[test_vectors::transaction(4)]);
        let mut combined = payload.clone();
        combined.extend_from_slice(b"next envelope bytes");

        let mut stream = BlockStream::new(payload.len() as u64);
        let progress = stream.push(&combined).unwrap();
        assert!(progress.finished);
        assert_eq!(stream.take_leftover(), b"next envelope bytes");
    }

    #[test]
    fn test_declared_length_mismatch_fails() {
        // Declare four extra bytes the block content never uses.
        let mut payload = test_vectors::block_payload(&[test_vectors::transaction(4)]);
        payload.extend_from_slice(&[0, 0, 0, 0]);

        let mut stream = BlockStream::new(payload.len() as u64);
        assert!(matches!(
            stream.push(&payload),
            Err(TransportError::TrailingBytes { remaining: 4 })
        ));
    }

    #[test]
    fn test_truncated_declaration_fails() {
        // Declare fewer bytes than one transaction needs.
        let payload = test_vectors::block_payload(&[test_vectors::transaction(4)]);
        let truncated_len = payload.len() - 10;
        let mut stream = BlockStream::new(truncated_len as u64);
        assert!(stream.push(&payload[..truncated_len]).is_err());
    }
}
