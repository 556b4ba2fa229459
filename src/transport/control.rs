//! Handshake control messages.
//!
//! Control datagrams travel on the channel just above the data channels and
//! are exactly one byte long.

use crate::core::PacketError;
use crate::core::constants::{
    CONTROL_ACCEPT_CONNECT, CONTROL_CONNECT, CONTROL_DISCONNECT, CONTROL_MESSAGE_SIZE,
};

/// A control-channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlMessage {
    /// Request a logical connection.
    Connect = CONTROL_CONNECT,
    /// Accept a connection request.
    AcceptConnect = CONTROL_ACCEPT_CONNECT,
    /// Close a connection, or reject a request.
    Disconnect = CONTROL_DISCONNECT,
}

impl ControlMessage {
    /// Parse a control message from a byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            CONTROL_CONNECT => Some(Self::Connect),
            CONTROL_ACCEPT_CONNECT => Some(Self::AcceptConnect),
            CONTROL_DISCONNECT => Some(Self::Disconnect),
            _ => None,
        }
    }

    /// Convert to the byte representation.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Serialize to a control datagram.
    pub fn to_bytes(self) -> [u8; CONTROL_MESSAGE_SIZE] {
        [self.as_byte()]
    }

    /// Parse a control datagram.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        match bytes {
            [byte] => Self::from_byte(*byte).ok_or(PacketError::UnknownControl(*byte)),
            _ => Err(PacketError::ControlLength(bytes.len())),
        }
    }
}
