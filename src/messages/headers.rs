//! The `headers` response and `getheaders` request payloads.

use crate::chain::{BlockHeader, Hash256};
use crate::codec::{BufferReader, BufferWriter};
use crate::transport::TransportError;

/// Encode a `getheaders` payload.
///
/// `locators` are block hashes the remote should walk back from, newest
/// first; `stop` bounds the response, or all zeroes to ask for as many
/// headers as the peer will send.
pub fn write_get_headers(
    protocol_version: u32,
    locators: &[Hash256],
    stop: Option<Hash256>,
) -> Vec<u8> {
    let mut writer = BufferWriter::new();
    writer.write_u32_le(protocol_version);
    writer.write_varint(locators.len() as u64);
    for locator in locators {
        locator.write(&mut writer);
    }
    match stop {
        Some(hash) => hash.write(&mut writer),
        None => {
            writer.write(&[0u8; 32]);
        }
    }
    writer.into_bytes()
}

/// Decode a `headers` payload.
///
/// Each entry is an 80-byte header followed by a varint transaction count,
/// which is always zero in practice and discarded here.
pub fn read_headers(payload: &[u8]) -> Result<Vec<BlockHeader>, TransportError> {
    let mut reader = BufferReader::new(payload);
    let count = reader.read_varint()?;
    let mut headers = Vec::with_capacity(count.min(1 << 12) as usize);
    for _ in 0..count {
        headers.push(BlockHeader::read(&mut reader)?);
        reader.read_varint()?;
    }
    if !reader.eof() {
        return Err(TransportError::TrailingBytes {
            remaining: reader.remaining(),
        });
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::test_vectors;

    #[test]
    fn test_get_headers_layout() {
        let from = Hash256::from_display_bytes([0xab; 32]);
        let payload = write_get_headers(70015, &[from], None);
        // version + count varint + locator + zeroed stop hash.
        assert_eq!(payload.len(), 4 + 1 + 32 + 32);
        assert_eq!(&payload[..4], &70015u32.to_le_bytes());
        assert_eq!(payload[4], 1);
        // Locator hash is wire-reversed.
        assert_eq!(&payload[5..37], &[0xab; 32]);
        assert_eq!(&payload[37..], &[0u8; 32]);
    }

    #[test]
    fn test_get_headers_with_stop() {
        let from = Hash256::from_display_bytes([1; 32]);
        let stop = Hash256::from_display_bytes([2; 32]);
        let payload = write_get_headers(70015, &[from], Some(stop));
        assert_eq!(&payload[37..], &[2u8; 32]);
    }

    #[test]
    fn test_read_headers() {
        let header_bytes = test_vectors::header_bytes();
        let mut writer = BufferWriter::new();
        writer.write_varint(2);
        for _ in 0..2 {
            writer.write(&header_bytes).write_varint(0);
        }
        let headers = read_headers(&writer.into_bytes()).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].hash(), Hash256::digest(&header_bytes));
    }

    #[test]
    fn test_read_headers_trailing_bytes() {
        let mut writer = BufferWriter::new();
        writer.write_varint(0).write_u8(1);
        assert!(matches!(
            read_headers(&writer.into_bytes()),
            Err(TransportError::TrailingBytes { remaining: 1 })
        ));
    }
}
