//! The datagram substrate contract.
//!
//! The multiplexer owns one [`Substrate`] and drives it from `pump()`. The
//! substrate delivers individual datagrams, each at most
//! [`Substrate::max_datagram_size`] bytes, on numbered channels. It knows
//! nothing about messages, connections or handshakes.

use std::fmt::Debug;
use std::hash::Hash;

use super::error::SubstrateError;
use super::types::{ChannelIndex, CloseReason, Reliability, SocketName};

/// A datagram received from the substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram<P> {
    /// Sending peer.
    pub peer: P,
    /// Socket the datagram arrived on.
    pub socket: SocketName,
    /// Raw datagram bytes.
    pub data: Vec<u8>,
}

/// Out-of-band notification from the substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification<P> {
    /// A remote peer wants to open `socket`. Nothing is delivered from it
    /// until [`Substrate::accept_connection`] is called.
    ConnectionRequest {
        /// Requesting peer.
        peer: P,
        /// Requested socket.
        socket: SocketName,
    },

    /// The substrate closed the connection to `peer`.
    ConnectionClosed {
        /// Remote peer.
        peer: P,
        /// Socket that was closed.
        socket: SocketName,
        /// Why it was closed.
        reason: CloseReason,
    },
}

/// Unreliable peer-to-peer datagram service.
///
/// Every method is non-blocking.
pub trait Substrate {
    /// Opaque identity of a remote peer.
    type Peer: Clone + Eq + Hash + Debug;

    /// Send one datagram to `peer` on `socket`.
    ///
    /// Sending opens the local side of the `(peer, socket)` connection.
    fn send_datagram(
        &mut self,
        peer: &Self::Peer,
        socket: &SocketName,
        channel: ChannelIndex,
        reliability: Reliability,
        data: &[u8],
    ) -> Result<(), SubstrateError>;

    /// Take the next datagram waiting on `channel`, if any.
    fn poll_datagram(&mut self, channel: ChannelIndex) -> Option<Datagram<Self::Peer>>;

    /// Take the next pending notification, if any.
    fn poll_notification(&mut self) -> Option<Notification<Self::Peer>>;

    /// Accept a requested connection so its datagrams are delivered.
    fn accept_connection(
        &mut self,
        peer: &Self::Peer,
        socket: &SocketName,
    ) -> Result<(), SubstrateError>;

    /// Close the connection to `peer` on `socket`.
    fn close_connection(
        &mut self,
        peer: &Self::Peer,
        socket: &SocketName,
    ) -> Result<(), SubstrateError>;

    /// Largest datagram the substrate carries.
    fn max_datagram_size(&self) -> usize;
}
