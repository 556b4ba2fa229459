//! Error types shared across layers.

use thiserror::Error;

/// Errors decoding a datagram.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Data datagram shorter than the fragment header.
    #[error("malformed packet: {len} bytes is shorter than the fragment header")]
    Malformed {
        /// Received length.
        len: usize,
    },

    /// Control byte outside the known message set.
    #[error("unknown control message: {0:#04x}")]
    UnknownControl(u8),

    /// Control datagram that is not exactly one byte.
    #[error("control datagram has length {0}, expected 1")]
    ControlLength(usize),
}

/// Errors reported by the datagram substrate.
#[derive(Debug, Error)]
pub enum SubstrateError {
    /// The substrate refused or failed to send.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Datagram exceeds the substrate's maximum size.
    #[error("datagram of {len} bytes exceeds maximum of {max}")]
    DatagramTooLarge {
        /// Datagram length.
        len: usize,
        /// Substrate maximum.
        max: usize,
    },

    /// Channel index the substrate cannot carry.
    #[error("invalid channel: {0}")]
    InvalidChannel(u8),

    /// No pending or open connection for the peer and socket.
    #[error("no such connection")]
    NoSuchConnection,

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors validating a [`SessionConfig`](super::SessionConfig).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// At least one data channel is required.
    #[error("no data channels configured")]
    NoChannels,

    /// The control channel index must fit in a byte.
    #[error("too many data channels: {0}")]
    TooManyChannels(usize),

    /// Datagrams must have room for the fragment header and some payload.
    #[error("maximum datagram size {0} leaves no room for payload")]
    DatagramTooSmall(usize),

    /// At least one fragment per message is required.
    #[error("maximum fragment count must be at least 1")]
    ZeroFragments,

    /// A server needs room for at least one connection.
    #[error("maximum connection count must be at least 1")]
    ZeroConnections,
}
