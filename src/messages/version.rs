//! The `version` handshake message.

use crate::codec::{BufferReader, BufferWriter};
use crate::messages::NetworkAddress;
use crate::transport::TransportError;

/// Service bits advertised by default, matching the reference client.
pub const DEFAULT_SERVICES: u64 = 0x25;

/// The version handshake payload.
///
/// Sent immediately after the socket connects; the peer's copy carries the
/// advertised protocol version that decides extended-message eligibility.
#[derive(Debug, Clone)]
pub struct Version {
    pub version: u32,
    pub services: u64,
    pub timestamp: i64,
    /// The address the sender believes it is talking to.
    pub receiver: NetworkAddress,
    /// The sender's own advertised address.
    pub sender: NetworkAddress,
    pub nonce: [u8; 8],
    pub user_agent: String,
    pub start_height: u32,
    pub relay: bool,
}

impl Version {
    /// Decode a `version` payload.
    pub fn read(payload: &[u8]) -> Result<Self, TransportError> {
        let mut reader = BufferReader::new(payload);
        Ok(Version {
            version: reader.read_u32_le()?,
            services: reader.read_u64_le()?,
            timestamp: reader.read_i64_le()?,
            receiver: NetworkAddress::read(&mut reader, false)?,
            sender: NetworkAddress::read(&mut reader, false)?,
            nonce: reader.read_array()?,
            user_agent: String::from_utf8_lossy(reader.read_var_bytes()?).into_owned(),
            start_height: reader.read_u32_le()?,
            relay: reader.read_u8()? != 0,
        })
    }

    /// Encode this message as a `version` payload.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut writer = BufferWriter::new();
        writer.write_u32_le(self.version);
        writer.write_u64_le(self.services);
        writer.write_i64_le(self.timestamp);
        self.receiver.write(&mut writer, false);
        self.sender.write(&mut writer, false);
        writer.write(&self.nonce);
        writer.write_var_bytes(self.user_agent.as_bytes());
        writer.write_u32_le(self.start_height);
        writer.write_u8(u8::from(self.relay));
        writer.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Version {
        Version {
            version: 70015,
            services: DEFAULT_SERVICES,
            timestamp: 1_700_000_000,
            receiver: NetworkAddress::unspecified(),
            sender: NetworkAddress::unspecified(),
            nonce: [1, 2, 3, 4, 5, 6, 7, 8],
            user_agent: "/Bitcoin SV:0.2.1(EB2000.0)/".to_string(),
            start_height: 0,
            relay: true,
        }
    }

    #[test]
    fn test_round_trip() {
        let message = sample();
        let payload = message.to_payload();
        let decoded = Version::read(&payload).unwrap();
        assert_eq!(decoded.version, message.version);
        assert_eq!(decoded.services, message.services);
        assert_eq!(decoded.timestamp, message.timestamp);
        assert_eq!(decoded.nonce, message.nonce);
        assert_eq!(decoded.user_agent, message.user_agent);
        assert_eq!(decoded.start_height, message.start_height);
        assert_eq!(decoded.relay, message.relay);
    }

    #[test]
    fn test_fixed_layout() {
        let payload = sample().to_payload();
        // version + services + timestamp + two 26-byte addresses + nonce.
        assert_eq!(&payload[..4], &70015u32.to_le_bytes());
        assert_eq!(&payload[4..12], &DEFAULT_SERVICES.to_le_bytes());
        let user_agent_offset = 4 + 8 + 8 + 26 + 26 + 8;
        assert_eq!(payload[user_agent_offset] as usize, sample().user_agent.len());
        assert_eq!(*payload.last().unwrap(), 1);
    }

    #[test]
    fn test_truncated_payload() {
        let payload = sample().to_payload();
        assert!(Version::read(&payload[..20]).is_err());
    }
}
