//! The message envelope codec.
//!
//! Every protocol message travels inside a fixed header:
//!
//! ```text
//! +-----------+--------------+---------------+--------------+
//! | magic (4) | command (12) | length (4 LE) | checksum (4) |
//! +-----------+--------------+---------------+--------------+
//! | payload (variable)                                  ... |
//! +---------------------------------------------------------+
//! ```
//!
//! The checksum is the first 4 bytes of the payload's double-SHA256.
//!
//! When both sides negotiate protocol version 70016 or later, payloads too
//! large for the 4-byte length field use the extended form: the command
//! field carries the literal `extmsg`, the length field is pinned to the
//! 0xFFFFFFFF sentinel, the checksum is zeroed, and the real command plus
//! an 8-byte length follow before the payload.
//!
//! The read half is incremental: callers hand it whatever bytes they have
//! buffered and receive either a complete frame or the count of missing
//! bytes, never a hard failure for a short buffer.

use crate::codec::BufferWriter;
use crate::messages::{Command, COMMAND_SIZE};
use crate::transport::TransportError;
use bitcoin_hashes::{sha256d, Hash as _};

/// Size of the standard envelope header.
pub const HEADER_SIZE: usize = 24;
/// Size of the extended envelope header.
pub const EXTENDED_HEADER_SIZE: usize = 44;
/// Length-field sentinel marking an extended envelope.
pub const EXTENDED_LENGTH_SENTINEL: u32 = 0xffff_ffff;
/// Payloads at or above this length require the extended form.
pub const EXTENDED_PAYLOAD_THRESHOLD: u64 = 0xffff_ffff;

/// The command field marking an extended envelope.
const EXTENDED_COMMAND_FIELD: [u8; COMMAND_SIZE] =
    [b'e', b'x', b't', b'm', b's', b'g', 0, 0, 0, 0, 0, 0];

/// First 4 bytes of the payload's double-SHA256.
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = sha256d::Hash::hash(payload).to_byte_array();
    [digest[0], digest[1], digest[2], digest[3]]
}

/// A parsed envelope header, before the payload is available.
#[derive(Debug, Clone)]
pub struct EnvelopeHeader {
    pub command: Command,
    pub payload_length: u64,
    pub checksum: [u8; 4],
    pub extended: bool,
    /// Size of the header itself; the payload begins at this offset.
    pub header_size: usize,
}

/// Outcome of a header parse attempt.
#[derive(Debug, Clone)]
pub enum HeaderStatus {
    /// The buffer is `needed` bytes short of a complete header.
    Partial { needed: usize },
    /// A complete header.
    Complete(EnvelopeHeader),
}

/// A complete decoded envelope.
#[derive(Debug, Clone)]
pub struct Frame {
    pub command: Command,
    pub payload: Vec<u8>,
    /// Offset in the source buffer where the next envelope begins.
    pub end: usize,
}

/// Outcome of a full envelope parse attempt.
#[derive(Debug)]
pub enum FrameStatus {
    /// The buffer is `needed` bytes short of the full envelope.
    Partial { needed: usize },
    /// A complete envelope.
    Complete(Frame),
}

/// Parse the envelope header at the start of `buffer`.
///
/// Validates the magic prefix as soon as 4 bytes are available, so
/// cross-network traffic fails fast instead of waiting out a bogus length.
pub fn read_header(
    buffer: &[u8],
    magic: [u8; 4],
    extended_enabled: bool,
) -> Result<HeaderStatus, TransportError> {
    if buffer.len() >= 4 && buffer[..4] != magic {
        let mut received = [0u8; 4];
        received.copy_from_slice(&buffer[..4]);
        return Err(TransportError::BadMagic {
            expected: magic,
            received,
        });
    }
    if buffer.len() < HEADER_SIZE {
        return Ok(HeaderStatus::Partial {
            needed: HEADER_SIZE - buffer.len(),
        });
    }

    let mut command_field = [0u8; COMMAND_SIZE];
    command_field.copy_from_slice(&buffer[4..16]);
    let length = u32::from_le_bytes([buffer[16], buffer[17], buffer[18], buffer[19]]);
    let mut declared_checksum = [0u8; 4];
    declared_checksum.copy_from_slice(&buffer[20..24]);

    if extended_enabled && command_field == EXTENDED_COMMAND_FIELD {
        if buffer.len() < EXTENDED_HEADER_SIZE {
            return Ok(HeaderStatus::Partial {
                needed: EXTENDED_HEADER_SIZE - buffer.len(),
            });
        }
        let mut real_command = [0u8; COMMAND_SIZE];
        real_command.copy_from_slice(&buffer[24..36]);
        let mut length_bytes = [0u8; 8];
        length_bytes.copy_from_slice(&buffer[36..44]);
        return Ok(HeaderStatus::Complete(EnvelopeHeader {
            command: Command::from_field(&real_command),
            payload_length: u64::from_le_bytes(length_bytes),
            checksum: declared_checksum,
            extended: true,
            header_size: EXTENDED_HEADER_SIZE,
        }));
    }

    Ok(HeaderStatus::Complete(EnvelopeHeader {
        command: Command::from_field(&command_field),
        payload_length: u64::from(length),
        checksum: declared_checksum,
        extended: false,
        header_size: HEADER_SIZE,
    }))
}

/// Extract the payload for an already parsed header.
///
/// Extended envelopes carry a zeroed checksum by construction, so
/// verification only applies to the standard form.
pub fn read_payload(
    header: &EnvelopeHeader,
    buffer: &[u8],
    verify_checksum: bool,
) -> Result<FrameStatus, TransportError> {
    let total = header.header_size as u64 + header.payload_length;
    if (buffer.len() as u64) < total {
        return Ok(FrameStatus::Partial {
            needed: (total - buffer.len() as u64) as usize,
        });
    }
    let end = total as usize;
    let payload = buffer[header.header_size..end].to_vec();
    if verify_checksum && !header.extended {
        let computed = checksum(&payload);
        if computed != header.checksum {
            return Err(TransportError::Checksum {
                declared: header.checksum,
                computed,
            });
        }
    }
    Ok(FrameStatus::Complete(Frame {
        command: header.command.clone(),
        payload,
        end,
    }))
}

/// Parse one complete envelope from the start of `buffer`.
pub fn read(
    buffer: &[u8],
    magic: [u8; 4],
    extended_enabled: bool,
    verify_checksum: bool,
) -> Result<FrameStatus, TransportError> {
    match read_header(buffer, magic, extended_enabled)? {
        HeaderStatus::Partial { needed } => Ok(FrameStatus::Partial { needed }),
        HeaderStatus::Complete(header) => read_payload(&header, buffer, verify_checksum),
    }
}

/// Serialize an envelope around `payload`.
///
/// The extended form is used only when extended messages are negotiated
/// and the payload length reaches [`EXTENDED_PAYLOAD_THRESHOLD`].
pub fn write(
    command: &Command,
    payload: &[u8],
    magic: [u8; 4],
    extended_enabled: bool,
) -> Vec<u8> {
    let mut writer = BufferWriter::new();
    writer.write(&magic);
    if extended_enabled && payload.len() as u64 >= EXTENDED_PAYLOAD_THRESHOLD {
        writer.write(&EXTENDED_COMMAND_FIELD);
        writer.write_u32_le(EXTENDED_LENGTH_SENTINEL);
        writer.write(&[0u8; 4]);
        writer.write(&command.to_field());
        writer.write_u64_le(payload.len() as u64);
    } else {
        writer.write(&command.to_field());
        writer.write_u32_le(payload.len() as u32);
        writer.write(&checksum(payload));
    }
    writer.write(payload);
    writer.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: [u8; 4] = [0xe3, 0xe1, 0xf3, 0xe8];

    fn complete(status: FrameStatus) -> Frame {
        match status {
            FrameStatus::Complete(frame) => frame,
            FrameStatus::Partial { needed } => panic!("expected complete frame, need {needed}"),
        }
    }

    #[test]
    fn test_empty_payload_checksum() {
        // Known value: first bytes of sha256d("").
        assert_eq!(checksum(&[]), [0x5d, 0xf6, 0xe0, 0xe2]);
    }

    #[test]
    fn test_round_trip_every_command() {
        let commands = [
            Command::Version,
            Command::Verack,
            Command::Ping,
            Command::Pong,
            Command::Inv,
            Command::GetData,
            Command::NotFound,
            Command::Block,
            Command::Tx,
            Command::Headers,
            Command::GetHeaders,
            Command::SendHeaders,
            Command::Addr,
            Command::GetAddr,
            Command::Mempool,
            Command::Reject,
            Command::Alert,
            Command::SendCmpct,
        ];
        for command in commands {
            let payload = command.as_str().as_bytes().to_vec();
            let bytes = write(&command, &payload, MAGIC, false);
            let frame = complete(read(&bytes, MAGIC, false, true).unwrap());
            assert_eq!(frame.command, command);
            assert_eq!(frame.payload, payload);
            assert_eq!(frame.end, bytes.len());
        }
    }

    #[test]
    fn test_partial_header_reports_needed() {
        let bytes = write(&Command::Ping, &[0; 8], MAGIC, false);
        match read(&bytes[..10], MAGIC, false, true).unwrap() {
            FrameStatus::Partial { needed } => assert_eq!(needed, HEADER_SIZE - 10),
            FrameStatus::Complete(_) => panic!("incomplete header parsed"),
        }
    }

    #[test]
    fn test_partial_payload_reports_needed() {
        let bytes = write(&Command::Ping, &[0; 8], MAGIC, false);
        match read(&bytes[..HEADER_SIZE + 3], MAGIC, false, true).unwrap() {
            FrameStatus::Partial { needed } => assert_eq!(needed, 5),
            FrameStatus::Complete(_) => panic!("incomplete payload parsed"),
        }
    }

    #[test]
    fn test_bad_magic_rejected_early() {
        let bytes = write(&Command::Ping, &[0; 8], MAGIC, false);
        let other = [0xf9, 0xbe, 0xb4, 0xd9];
        // Fails as soon as the 4 magic bytes are in hand.
        assert!(matches!(
            read(&bytes[..4], other, false, true),
            Err(TransportError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_corrupted_payload_byte_fails_checksum() {
        let payload = b"correct horse battery staple";
        let bytes = write(&Command::Tx, payload, MAGIC, false);
        for index in 0..payload.len() {
            let mut corrupted = bytes.clone();
            corrupted[HEADER_SIZE + index] ^= 0x01;
            assert!(
                matches!(
                    read(&corrupted, MAGIC, false, true),
                    Err(TransportError::Checksum { .. })
                ),
                "corruption at payload byte {index} went unnoticed"
            );
        }
    }

    #[test]
    fn test_checksum_skipped_when_validation_off() {
        let bytes = write(&Command::Tx, b"data", MAGIC, false);
        let mut corrupted = bytes;
        corrupted[HEADER_SIZE] ^= 0xff;
        let frame = complete(read(&corrupted, MAGIC, false, false).unwrap());
        assert_eq!(frame.command, Command::Tx);
    }

    #[test]
    fn test_extended_envelope_read() {
        // Hand-build an extended envelope; the writer only emits one for
        // payloads past the 4 GiB threshold.
        let payload = b"big block bytes";
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&EXTENDED_COMMAND_FIELD);
        bytes.extend_from_slice(&EXTENDED_LENGTH_SENTINEL.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend_from_slice(&Command::Block.to_field());
        bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes.extend_from_slice(payload);

        let frame = complete(read(&bytes, MAGIC, true, true).unwrap());
        assert_eq!(frame.command, Command::Block);
        assert_eq!(frame.payload, payload);
        assert_eq!(frame.end, EXTENDED_HEADER_SIZE + payload.len());

        // Partial extended header reports the extended size.
        match read(&bytes[..30], MAGIC, true, true).unwrap() {
            FrameStatus::Partial { needed } => assert_eq!(needed, EXTENDED_HEADER_SIZE - 30),
            FrameStatus::Complete(_) => panic!("incomplete extended header parsed"),
        }
    }

    #[test]
    fn test_extmsg_field_plain_when_not_negotiated() {
        // Without negotiation the marker parses as an ordinary command.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&EXTENDED_COMMAND_FIELD);
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&checksum(&[1, 2]));
        bytes.extend_from_slice(&[1, 2]);

        let frame = complete(read(&bytes, MAGIC, false, true).unwrap());
        assert_eq!(frame.command, Command::Unknown("extmsg".to_string()));
        assert_eq!(frame.payload, vec![1, 2]);
    }
}
