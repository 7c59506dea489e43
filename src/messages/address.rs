//! Network address structures embedded in `version` and `addr` payloads.

use crate::codec::{BufferReader, BufferWriter, UnderrunError};
use crate::transport::TransportError;
use std::fmt;
use std::net::Ipv4Addr;

/// Prefix marking an IPv4 address mapped into the 16-byte IPv6 field.
const IPV4_MAPPED_PREFIX: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff];

/// A peer address as carried on the wire.
///
/// `addr` entries carry a timestamp; the addresses embedded in a `version`
/// payload do not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAddress {
    /// Last-seen time, present only in `addr` entries.
    pub time: Option<u32>,
    /// Service bits advertised for this address.
    pub services: u64,
    /// 16-byte address field; IPv4 addresses are IPv4-mapped IPv6.
    pub ip: [u8; 16],
    /// Port, big-endian on the wire.
    pub port: u16,
}

impl NetworkAddress {
    /// An all-zero address, advertised when not listening.
    pub fn unspecified() -> Self {
        NetworkAddress {
            time: None,
            services: 0,
            ip: [0u8; 16],
            port: 0,
        }
    }

    /// Read an address structure, with a leading timestamp when `with_time`.
    pub fn read(
        reader: &mut BufferReader<'_>,
        with_time: bool,
    ) -> Result<Self, UnderrunError> {
        let time = if with_time {
            Some(reader.read_u32_le()?)
        } else {
            None
        };
        Ok(NetworkAddress {
            time,
            services: reader.read_u64_le()?,
            ip: reader.read_array()?,
            port: reader.read_u16_be()?,
        })
    }

    /// Write this address, with its timestamp when `with_time`.
    pub fn write(&self, writer: &mut BufferWriter, with_time: bool) {
        if with_time {
            writer.write_u32_le(self.time.unwrap_or(0));
        }
        writer.write_u64_le(self.services);
        writer.write(&self.ip);
        writer.write_u16_be(self.port);
    }

    /// The dotted-quad form, when the field holds an IPv4-mapped address.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        if self.ip[..12] == IPV4_MAPPED_PREFIX {
            Some(Ipv4Addr::new(
                self.ip[12],
                self.ip[13],
                self.ip[14],
                self.ip[15],
            ))
        } else {
            None
        }
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ipv4() {
            Some(ip) => write!(f, "{}:{}", ip, self.port),
            None => write!(f, "{}:{}", hex::encode(self.ip), self.port),
        }
    }
}

/// Decode an `addr` payload: a varint count of timestamped entries.
pub fn read_addr(payload: &[u8]) -> Result<Vec<NetworkAddress>, TransportError> {
    let mut reader = BufferReader::new(payload);
    let count = reader.read_varint()?;
    let mut addresses = Vec::with_capacity(count.min(1 << 10) as usize);
    for _ in 0..count {
        addresses.push(NetworkAddress::read(&mut reader, true)?);
    }
    if !reader.eof() {
        return Err(TransportError::TrailingBytes {
            remaining: reader.remaining(),
        });
    }
    Ok(addresses)
}
