//! relaymux - Transport Layer
//!
//! Everything between the datagram substrate and the client and server
//! roles:
//!
//! - **Fragment codec**: [`packet`] encodes the 9-byte fragment header
//! - **Control messages**: [`ControlMessage`] for CONNECT, ACCEPT_CONNECT
//!   and DISCONNECT
//! - **Reassembly**: [`ReassemblyTable`] rebuilds messages from fragments
//! - **Handshake**: [`Handshake`], the client connection state machine
//! - **Quarantine**: [`Quarantine`], [`DeadSockets`], [`PendingCloses`]
//! - **Endpoint**: [`Endpoint`], the pump engine shared by both roles
//! - **Substrates**: [`LoopbackNetwork`] in process, `UdpSubstrate` over
//!   UDP (requires the `udp` feature)
//!
//! # Layering
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Client / Server roles           │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │  fragments, reassembly, handshake       │
//! ├─────────────────────────────────────────┤
//! │         Datagram substrate              │
//! └─────────────────────────────────────────┘
//! ```

mod control;
mod endpoint;
mod error;
mod handshake;
mod loopback;
pub mod packet;
mod quarantine;
mod reassembly;
#[cfg(feature = "udp")]
mod udp;

pub use control::ControlMessage;
pub use endpoint::{ControlPoll, Delivery, Endpoint};
pub use error::*;
pub use handshake::{Handshake, HandshakeEvent, HandshakePhase};
pub use loopback::{LoopbackNetwork, LoopbackPeer, LoopbackSubstrate};
pub use packet::{split_message, Fragment};
pub use quarantine::{DeadSockets, PendingCloses, Quarantine};
pub use reassembly::{CompletedMessage, ReassemblyTable};
#[cfg(feature = "udp")]
#[cfg_attr(docsrs, doc(cfg(feature = "udp")))]
pub use udp::UdpSubstrate;
