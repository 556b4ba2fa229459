//! Identifier and channel types.

use std::fmt;

use rand::Rng;

use super::constants::SOCKET_NAME_LEN;

/// Index of a data channel (`0..N`); index `N` is the control channel.
pub type ChannelIndex = u8;

/// Delivery guarantee the substrate applies to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Reliability {
    /// Delivered at most once, in any order.
    UnreliableUnordered,
    /// Delivered exactly once, in any order.
    ReliableUnordered,
    /// Delivered exactly once, in send order.
    #[default]
    ReliableOrdered,
}

impl Reliability {
    /// Whether the substrate retransmits lost datagrams on this channel.
    pub fn is_reliable(self) -> bool {
        !matches!(self, Reliability::UnreliableUnordered)
    }

    /// Whether the substrate preserves send order on this channel.
    pub fn is_ordered(self) -> bool {
        matches!(self, Reliability::ReliableOrdered)
    }
}

/// Name scoping a logical socket on the substrate.
///
/// A peer may rotate socket names between connection attempts; closed names
/// are remembered so that stale sessions cannot be resurrected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketName(String);

impl SocketName {
    /// Create a socket name from an existing string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Generate a random name of ASCII letters.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let name = (0..SOCKET_NAME_LEN)
            .map(|_| {
                let base = if rng.gen_bool(0.5) { b'a' } else { b'A' };
                (base + rng.gen_range(0..26u8)) as char
            })
            .collect();
        Self(name)
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SocketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SocketName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for SocketName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for SocketName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Locally assigned identifier of a live server-side connection.
///
/// Never zero. Unique among live connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u32);

impl ConnectionId {
    /// Create a connection id. Returns `None` for zero.
    pub fn new(id: u32) -> Option<Self> {
        (id != 0).then_some(Self(id))
    }

    /// Get the raw value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ConnectionId> for u32 {
    fn from(id: ConnectionId) -> u32 {
        id.0
    }
}

/// Why the substrate closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Closed gracefully by the local user.
    ClosedByLocalUser,
    /// Closed gracefully by the remote user.
    ClosedByPeer,
    /// Closed unexpectedly.
    ConnectionClosed,
    /// Could not be established.
    ConnectionFailed,
    /// The remote user sent invalid data.
    InvalidData,
    /// The remote user sent an invalid message.
    InvalidMessage,
    /// Negotiation failed.
    NegotiationFailed,
    /// Timed out.
    TimedOut,
    /// Too many connections.
    TooManyConnections,
    /// Unexpected substrate error.
    UnexpectedError,
    /// No reason given.
    Unknown,
}

impl CloseReason {
    /// Whether either side closed the connection on purpose.
    pub fn is_graceful(self) -> bool {
        matches!(self, CloseReason::ClosedByLocalUser | CloseReason::ClosedByPeer)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::ClosedByLocalUser => "connection gracefully closed by the local user",
            CloseReason::ClosedByPeer => "connection gracefully closed by the remote user",
            CloseReason::ConnectionClosed => "connection unexpectedly closed",
            CloseReason::ConnectionFailed => "failed to establish connection",
            CloseReason::InvalidData => "remote user sent invalid data",
            CloseReason::InvalidMessage => "remote user sent an invalid message",
            CloseReason::NegotiationFailed => "negotiation failed",
            CloseReason::TimedOut => "connection timed out",
            CloseReason::TooManyConnections => "too many connections",
            CloseReason::UnexpectedError => "unexpected error, connection closed",
            CloseReason::Unknown => "unknown error, connection closed",
        };
        f.write_str(text)
    }
}
