//! Typed codecs for the per-command message payloads.
//!
//! Each command with structure the client cares about gets a narrow
//! read/write pair over the codec primitives. Everything here is pure
//! byte-shuffling; the connection layer decides what to do with the
//! decoded values.

pub mod address;
pub mod headers;
pub mod inv;
pub mod reject;
pub mod version;

pub use address::NetworkAddress;
pub use inv::{Inventory, INV_BLOCK, INV_TRANSACTION};
pub use reject::Reject;
pub use version::Version;

use std::fmt;

/// Width of the command field in the envelope header.
pub const COMMAND_SIZE: usize = 12;

/// A protocol command tag.
///
/// Known commands get their own variant; anything else is carried through
/// as [`Command::Unknown`] so unrecognized traffic can still be observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Version,
    Verack,
    Ping,
    Pong,
    Inv,
    GetData,
    NotFound,
    Block,
    Tx,
    Headers,
    GetHeaders,
    SendHeaders,
    Addr,
    GetAddr,
    Mempool,
    Reject,
    Alert,
    SendCmpct,
    Unknown(String),
}

impl Command {
    /// The command's wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Command::Version => "version",
            Command::Verack => "verack",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::NotFound => "notfound",
            Command::Block => "block",
            Command::Tx => "tx",
            Command::Headers => "headers",
            Command::GetHeaders => "getheaders",
            Command::SendHeaders => "sendheaders",
            Command::Addr => "addr",
            Command::GetAddr => "getaddr",
            Command::Mempool => "mempool",
            Command::Reject => "reject",
            Command::Alert => "alert",
            Command::SendCmpct => "sendcmpct",
            Command::Unknown(name) => name,
        }
    }

    /// Parse a NUL-padded 12-byte command field.
    pub fn from_field(field: &[u8; COMMAND_SIZE]) -> Self {
        let end = field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMMAND_SIZE);
        let name = String::from_utf8_lossy(&field[..end]);
        match name.as_ref() {
            "version" => Command::Version,
            "verack" => Command::Verack,
            "ping" => Command::Ping,
            "pong" => Command::Pong,
            "inv" => Command::Inv,
            "getdata" => Command::GetData,
            "notfound" => Command::NotFound,
            "block" => Command::Block,
            "tx" => Command::Tx,
            "headers" => Command::Headers,
            "getheaders" => Command::GetHeaders,
            "sendheaders" => Command::SendHeaders,
            "addr" => Command::Addr,
            "getaddr" => Command::GetAddr,
            "mempool" => Command::Mempool,
            "reject" => Command::Reject,
            "alert" => Command::Alert,
            "sendcmpct" => Command::SendCmpct,
            _ => Command::Unknown(name.into_owned()),
        }
    }

    /// Render the NUL-padded 12-byte command field.
    pub fn to_field(&self) -> [u8; COMMAND_SIZE] {
        let mut field = [0u8; COMMAND_SIZE];
        let name = self.as_str().as_bytes();
        let len = name.len().min(COMMAND_SIZE);
        field[..len].copy_from_slice(&name[..len]);
        field
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_commands_round_trip() {
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
            assert_eq!(Command::from_field(&command.to_field()), command);
        }
    }

    #[test]
    fn test_unknown_command_preserved() {
        let mut field = [0u8; COMMAND_SIZE];
        field[..7].copy_from_slice(b"feefilt");
        let command = Command::from_field(&field);
        assert_eq!(command, Command::Unknown("feefilt".to_string()));
        assert_eq!(command.to_field(), field);
    }
}
