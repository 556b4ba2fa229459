//! # relaymux
//!
//! Session multiplexing and message fragmentation over relayed
//! peer-to-peer datagram services.
//!
//! A datagram substrate (a relay service, a P2P SDK, plain UDP) moves
//! small datagrams between peers on numbered channels. relaymux turns it
//! into a client/server transport:
//!
//! - **Fragmentation**: messages larger than one datagram are split with a
//!   9-byte header and reassembled in any arrival order
//! - **Handshake**: CONNECT / ACCEPT_CONNECT / DISCONNECT on a dedicated
//!   control channel, with a connect timeout
//! - **Admission**: the server assigns connection ids and refuses clients
//!   beyond its capacity
//! - **Hygiene**: a quarantine window discards stale traffic and closed
//!   sockets are never reopened
//!
//! Everything is driven from a single-threaded `pump()` called once per
//! frame. Events are delivered on a tokio unbounded channel.
//!
//! ## Feature Flags
//!
//! - `client` (default): [`client::Client`]
//! - `server` (default): [`server::Server`]
//! - `udp` (default): `UdpSubstrate`, a substrate over a tokio UDP socket
//!
//! ## Modules
//!
//! - [`core`]: Constants, identifiers, configuration, errors and the
//!   [`Substrate`] trait (always included)
//! - [`transport`]: Fragment codec, reassembly, handshake, quarantine and
//!   the in-process loopback substrate (always included)
//! - [`client`]: Client role (requires `client` feature)
//! - [`server`]: Server role (requires `server` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Duration;
//! use relaymux::prelude::*;
//!
//! let network = LoopbackNetwork::new();
//! let config = SessionConfigBuilder::new()
//!     .quarantine(Duration::ZERO)
//!     .build()
//!     .unwrap();
//!
//! let (mut server, mut server_events) =
//!     Server::new(network.endpoint("host"), config.clone()).unwrap();
//! let (mut client, mut client_events) =
//!     Client::new(network.endpoint("player"), "host".to_string(), config).unwrap();
//!
//! // CONNECT, ACCEPT_CONNECT
//! for _ in 0..3 {
//!     client.pump();
//!     server.pump();
//! }
//! client.pump();
//! assert!(client.is_connected());
//! assert!(matches!(client_events.try_recv(), Ok(ClientEvent::Connected)));
//!
//! client.send(0, &vec![7u8; 4000]).unwrap();
//! server.pump();
//! match server_events.try_recv() {
//!     Ok(ServerEvent::Connected { .. }) => {}
//!     other => panic!("{other:?}"),
//! }
//! match server_events.try_recv() {
//!     Ok(ServerEvent::Data { data, .. }) => assert_eq!(data.len(), 4000),
//!     other => panic!("{other:?}"),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Transport layer (always included)
pub mod transport;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Server API (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::transport::{
        ControlMessage, HandshakePhase, LoopbackNetwork, LoopbackSubstrate, SessionError,
        SessionResult,
    };

    #[cfg(feature = "udp")]
    pub use crate::transport::UdpSubstrate;

    #[cfg(feature = "client")]
    pub use crate::client::{Client, ClientEvent};

    #[cfg(feature = "server")]
    pub use crate::server::{Server, ServerEvent};
}

// Re-export commonly used items at crate root
pub use crate::core::{ConnectionId, Reliability, SessionConfig, SocketName, Substrate};
pub use crate::transport::{SessionError, SessionResult};
