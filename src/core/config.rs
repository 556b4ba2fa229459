//! Session configuration.

use std::time::Duration;

use tracing::warn;

use super::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_DATAGRAM_SIZE,
    DEFAULT_MAX_FRAGMENTS, DEFAULT_QUARANTINE, FRAGMENT_HEADER_SIZE, MAX_DATA_CHANNELS,
    MIN_CONNECT_TIMEOUT,
};
use super::error::ConfigError;
use super::types::{ChannelIndex, Reliability};

/// Configuration shared by the client and server roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Reliability of each data channel. The control channel sits at
    /// index `channels.len()`.
    pub channels: Vec<Reliability>,

    /// Largest datagram the substrate carries, header included.
    pub max_datagram_size: usize,

    /// Largest number of fragments a single message may use.
    pub max_fragments: usize,

    /// Time a client waits for ACCEPT_CONNECT.
    pub connect_timeout: Duration,

    /// Window after activation during which inbound traffic is discarded.
    pub quarantine: Duration,

    /// Maximum number of concurrent server connections.
    pub max_connections: usize,

    /// Age after which an incomplete message is discarded. `None` keeps
    /// partial messages until they complete or their peer goes away.
    pub reassembly_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channels: vec![Reliability::ReliableOrdered, Reliability::UnreliableUnordered],
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            max_fragments: DEFAULT_MAX_FRAGMENTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            quarantine: DEFAULT_QUARANTINE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            reassembly_timeout: None,
        }
    }
}

impl SessionConfig {
    /// Check the configuration for values the multiplexer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        if self.channels.len() >= MAX_DATA_CHANNELS {
            return Err(ConfigError::TooManyChannels(self.channels.len()));
        }
        if self.max_datagram_size <= FRAGMENT_HEADER_SIZE {
            return Err(ConfigError::DatagramTooSmall(self.max_datagram_size));
        }
        if self.max_fragments == 0 {
            return Err(ConfigError::ZeroFragments);
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroConnections);
        }
        Ok(())
    }

    /// Index of the control channel.
    pub fn control_channel(&self) -> ChannelIndex {
        self.channels.len() as ChannelIndex
    }

    /// Payload bytes carried by one fragment.
    pub fn fragment_payload_size(&self) -> usize {
        self.max_datagram_size.saturating_sub(FRAGMENT_HEADER_SIZE)
    }

    /// Largest message that can be sent on any channel.
    pub fn max_message_size(&self) -> usize {
        self.fragment_payload_size().saturating_mul(self.max_fragments)
    }

    /// Handshake timeout with the lower bound applied.
    pub fn effective_connect_timeout(&self) -> Duration {
        self.connect_timeout.max(MIN_CONNECT_TIMEOUT)
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a builder starting from the defaults.
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    /// Set the data channel layout.
    pub fn channels(mut self, channels: impl Into<Vec<Reliability>>) -> Self {
        self.config.channels = channels.into();
        self
    }

    /// Set the substrate's maximum datagram size.
    pub fn max_datagram_size(mut self, size: usize) -> Self {
        self.config.max_datagram_size = size;
        self
    }

    /// Set the maximum fragments per message.
    pub fn max_fragments(mut self, count: usize) -> Self {
        self.config.max_fragments = count;
        self
    }

    /// Set the handshake timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the quarantine window.
    pub fn quarantine(mut self, window: Duration) -> Self {
        self.config.quarantine = window;
        self
    }

    /// Set the maximum number of concurrent server connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Discard incomplete messages older than `timeout`.
    pub fn reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.config.reassembly_timeout = Some(timeout);
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        self.config.validate()?;

        if self.config.channels.first() != Some(&Reliability::ReliableOrdered) {
            warn!("channel 0 is not reliable-ordered; most upper layers expect it to be");
        }
        if self.config.connect_timeout < MIN_CONNECT_TIMEOUT {
            warn!(
                timeout = ?self.config.connect_timeout,
                "connect timeout below minimum, using {:?}", MIN_CONNECT_TIMEOUT
            );
        }

        Ok(self.config)
    }
}
