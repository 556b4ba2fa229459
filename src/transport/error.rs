//! Session layer error types.
//!
//! Nothing here is fatal to the multiplexer: every error ends at most one
//! connection or one message.

use thiserror::Error;

use crate::core::{ChannelIndex, CloseReason, ConnectionId, PacketError, SubstrateError};

/// Broad class of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed datagram. Dropped without a state change.
    Protocol,
    /// Connection table full. Answered with DISCONNECT.
    Admission,
    /// Traffic from or to a peer that has no connection.
    Identity,
    /// Handshake did not complete in time.
    Timeout,
    /// Failure reported by the datagram substrate.
    Substrate,
    /// The caller used the API incorrectly.
    Usage,
}

/// Session layer errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Datagram could not be decoded.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// Substrate operation failed.
    #[error("substrate error: {0}")]
    Substrate(#[from] SubstrateError),

    /// The server was full.
    #[error("connection rejected: server at capacity")]
    Rejected,

    /// Traffic arrived from a peer without a connection.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// No live connection has this id.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The handshake deadline passed.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The substrate closed the connection.
    #[error("connection closed by substrate: {0}")]
    RemoteClosed(CloseReason),

    /// Message does not fit in the configured number of fragments.
    #[error("message of {len} bytes exceeds maximum of {max}")]
    MessageTooLarge {
        /// Message length.
        len: usize,
        /// Maximum message length.
        max: usize,
    },

    /// Channel index is not a configured data channel.
    #[error("invalid data channel: {0}")]
    InvalidChannel(ChannelIndex),

    /// The client has no established connection.
    #[error("not connected")]
    NotConnected,

    /// The endpoint has been shut down.
    #[error("endpoint shut down")]
    ShutDown,
}

impl SessionError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Packet(_) => ErrorKind::Protocol,
            SessionError::Rejected => ErrorKind::Admission,
            SessionError::UnknownPeer(_) | SessionError::UnknownConnection(_) => {
                ErrorKind::Identity
            }
            SessionError::HandshakeTimeout => ErrorKind::Timeout,
            SessionError::Substrate(_) | SessionError::RemoteClosed(_) => ErrorKind::Substrate,
            SessionError::MessageTooLarge { .. }
            | SessionError::InvalidChannel(_)
            | SessionError::NotConnected
            | SessionError::ShutDown => ErrorKind::Usage,
        }
    }

    /// Check if the offending datagram is simply dropped.
    pub fn is_silent_drop(&self) -> bool {
        self.kind() == ErrorKind::Protocol
    }

    /// Check if this error ends the connection it relates to.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Rejected
                | SessionError::UnknownPeer(_)
                | SessionError::HandshakeTimeout
                | SessionError::RemoteClosed(_)
        )
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
