//! The `reject` notice sent when a peer refuses a message.

use crate::chain::Hash256;
use crate::codec::BufferReader;
use crate::transport::TransportError;

/// A decoded `reject` payload.
#[derive(Debug, Clone)]
pub struct Reject {
    /// Name of the rejected message.
    pub message: String,
    /// Reason code byte.
    pub code: u8,
    /// Human-readable reason.
    pub reason: String,
    /// Hash of the rejected object, when the payload carries one.
    pub data: Option<Hash256>,
}

impl Reject {
    /// Decode a `reject` payload.
    pub fn read(payload: &[u8]) -> Result<Self, TransportError> {
        let mut reader = BufferReader::new(payload);
        let message = String::from_utf8_lossy(reader.read_var_bytes()?).into_owned();
        let code = reader.read_u8()?;
        let reason = String::from_utf8_lossy(reader.read_var_bytes()?).into_owned();
        let data = if reader.eof() {
            None
        } else {
            Some(Hash256::read(&mut reader)?)
        };
        Ok(Reject {
            message,
            code,
            reason,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BufferWriter;

    #[test]
    fn test_read_without_data() {
        let mut writer = BufferWriter::new();
        writer
            .write_var_bytes(b"tx")
            .write_u8(0x10)
            .write_var_bytes(b"bad-txns-inputs-spent");
        let reject = Reject::read(&writer.into_bytes()).unwrap();
        assert_eq!(reject.message, "tx");
        assert_eq!(reject.code, 0x10);
        assert_eq!(reject.reason, "bad-txns-inputs-spent");
        assert!(reject.data.is_none());
    }

    #[test]
    fn test_read_with_trailing_hash() {
        let hash = Hash256::from_display_bytes([9; 32]);
        let mut writer = BufferWriter::new();
        writer
            .write_var_bytes(b"block")
            .write_u8(0x43)
            .write_var_bytes(b"duplicate");
        hash.write(&mut writer);
        let reject = Reject::read(&writer.into_bytes()).unwrap();
        assert_eq!(reject.data, Some(hash));
    }

    #[test]
    fn test_truncated() {
        assert!(Reject::read(&[5, b'a']).is_err());
    }
}
