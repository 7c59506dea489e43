//! Peer configuration types and constants.

use crate::network::Network;
use std::fmt;
use std::time::Duration;

/// Default timeout for connection establishment through handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for a header fetch.
pub const DEFAULT_HEADERS_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay before an automatic reconnect attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Maximum transactions accepted in one broadcast call.
pub const MAX_BROADCAST_PER_MESSAGE: usize = 10_000;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration used to build a peer connection.
#[derive(Debug, Clone)]
pub struct PeerConfiguration {
    /// Network whose defaults (magic, protocol version, user agent) apply.
    pub network: Network,
    /// Magic bytes override; defaults to the network's.
    pub magic: Option<[u8; 4]>,
    /// User agent override advertised in the handshake.
    pub user_agent: Option<String>,
    /// Protocol version override advertised in the handshake.
    pub protocol_version: Option<u32>,
    /// Block height advertised in the handshake.
    pub start_height: u32,
    /// Whether to ask the peer to relay transactions.
    pub relay: bool,
    /// Stream block bodies incrementally instead of buffering them whole.
    pub stream_blocks: bool,
    /// Verify envelope checksums on inbound payloads.
    pub verify_checksums: bool,
    /// Reconnect automatically after an unexpected disconnect.
    pub auto_reconnect: bool,
    /// Never enable the extended message format, regardless of the peer's
    /// advertised version.
    pub disable_extended_messages: bool,
    /// Deadline covering TCP dial through handshake completion.
    pub connect_timeout: Duration,
    /// Deadline for a header fetch.
    pub headers_timeout: Duration,
    /// Capacity of the event broadcast channel. Slow subscribers lag and
    /// miss events once it fills.
    pub event_capacity: usize,
}

impl PeerConfiguration {
    /// Creates a configuration with the defaults for `network`.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            magic: None,
            user_agent: None,
            protocol_version: None,
            start_height: 0,
            relay: true,
            stream_blocks: true,
            verify_checksums: true,
            auto_reconnect: true,
            disable_extended_messages: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            headers_timeout: DEFAULT_HEADERS_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Override the network magic bytes.
    pub fn with_magic(mut self, magic: [u8; 4]) -> Self {
        self.magic = Some(magic);
        self
    }

    /// Override the advertised user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Override the advertised protocol version.
    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = Some(version);
        self
    }

    /// Advertise a starting block height in the handshake.
    pub fn with_start_height(mut self, height: u32) -> Self {
        self.start_height = height;
        self
    }

    /// Toggle block streaming.
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.stream_blocks = enabled;
        self
    }

    /// Toggle inbound checksum verification.
    pub fn with_checksum_verification(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    /// Toggle automatic reconnection.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Never negotiate the extended message format.
    pub fn without_extended_messages(mut self) -> Self {
        self.disable_extended_messages = true;
        self
    }

    /// Set the timeout covering dial through handshake completion.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the header-fetch timeout.
    pub fn with_headers_timeout(mut self, timeout: Duration) -> Self {
        self.headers_timeout = timeout;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

impl fmt::Display for PeerConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PeerConfiguration {{ network: {}, stream: {}, validate: {}, reconnect: {}, extmsg: {} }}",
            self.network,
            self.stream_blocks,
            self.verify_checksums,
            self.auto_reconnect,
            !self.disable_extended_messages,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PeerConfiguration::new(Network::Bsv);
        assert!(config.stream_blocks);
        assert!(config.verify_checksums);
        assert!(config.auto_reconnect);
        assert!(!config.disable_extended_messages);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.headers_timeout, Duration::from_secs(30));
        assert!(config.magic.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let config = PeerConfiguration::new(Network::Bsv)
            .with_magic([1, 2, 3, 4])
            .with_streaming(false)
            .with_auto_reconnect(false)
            .without_extended_messages()
            .with_headers_timeout(Duration::from_millis(100));
        assert_eq!(config.magic, Some([1, 2, 3, 4]));
        assert!(!config.stream_blocks);
        assert!(!config.auto_reconnect);
        assert!(config.disable_extended_messages);
        assert_eq!(config.headers_timeout, Duration::from_millis(100));
    }
}
