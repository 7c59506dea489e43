//! Network parameters and protocol version constants.

use std::fmt;
use std::str::FromStr;

/// Default protocol version advertised in the version handshake.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 70015;

/// Minimum peer protocol version that supports the extended message format.
///
/// Peers advertising this version or later accept envelopes whose payload
/// length is carried in an 8-byte extended header field.
pub const EXTENDED_MESSAGES_MIN_PROTOCOL_VERSION: u32 = 70016;

/// Known networks with built-in magic bytes and handshake defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// Bitcoin SV mainnet.
    Bsv,
    /// Bitcoin Cash mainnet. Shares magic bytes with BSV.
    Bch,
    /// Bitcoin mainnet.
    Btc,
    /// Bitcoin SV scaling test network.
    BsvStn,
}

impl Network {
    /// The 4-byte magic prefix identifying this network on the wire.
    pub fn magic(&self) -> [u8; 4] {
        match self {
            Network::Bsv | Network::Bch => [0xe3, 0xe1, 0xf3, 0xe8],
            Network::Btc => [0xf9, 0xbe, 0xb4, 0xd9],
            Network::BsvStn => [0xfb, 0xce, 0xc4, 0xf9],
        }
    }

    /// Default protocol version advertised for this network.
    pub fn protocol_version(&self) -> u32 {
        DEFAULT_PROTOCOL_VERSION
    }

    /// Default user agent advertised for this network.
    pub fn user_agent(&self) -> &'static str {
        match self {
            Network::Bsv => "/Bitcoin SV:0.2.1(EB2000.0)/",
            Network::Bch | Network::Btc => "/Bitcoin/",
            Network::BsvStn => "/Bitcoin SV:0.2.2(EB10000.0)/",
        }
    }

    /// The conventional ticker for this network.
    pub fn ticker(&self) -> &'static str {
        match self {
            Network::Bsv => "BSV",
            Network::Bch => "BCH",
            Network::Btc => "BTC",
            Network::BsvStn => "BSV-STN",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ticker())
    }
}

/// Failed to recognize a network ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownNetworkError(pub String);

impl fmt::Display for UnknownNetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown network ticker: {}", self.0)
    }
}

impl std::error::Error for UnknownNetworkError {}

impl FromStr for Network {
    type Err = UnknownNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BSV" => Ok(Network::Bsv),
            "BCH" => Ok(Network::Bch),
            "BTC" => Ok(Network::Btc),
            "BSV-STN" => Ok(Network::BsvStn),
            other => Err(UnknownNetworkError(other.to_string())),
        }
    }
}
