//! Server role.
//!
//! Provides [`Server<S>`], which admits clients over a substrate `S`,
//! assigns each a [`ConnectionId`] and reports traffic through
//! [`ServerEvent`]s.

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::connections::{Connection, ConnectionTable};
use crate::core::constants::FIRST_CONNECTION_ID;
use crate::core::{
    ChannelIndex, ConfigError, ConnectionId, Notification, SessionConfig, SocketName, Substrate,
};
use crate::transport::{
    ControlMessage, ControlPoll, Delivery, Endpoint, SessionError, SessionResult,
};

/// Event from the server.
#[derive(Debug)]
pub enum ServerEvent {
    /// A client was admitted.
    Connected {
        /// Id assigned to the client.
        connection_id: ConnectionId,
    },

    /// A client went away.
    Disconnected {
        /// Id the client had.
        connection_id: ConnectionId,
    },

    /// A complete message arrived.
    Data {
        /// Sending client.
        connection_id: ConnectionId,
        /// Data channel it arrived on.
        channel: ChannelIndex,
        /// Message bytes.
        data: Vec<u8>,
    },

    /// Traffic that could not be attributed or handled.
    Error {
        /// Connection involved, if any.
        connection_id: Option<ConnectionId>,
        /// What went wrong.
        cause: SessionError,
    },
}

/// The server side of the multiplexer.
///
/// # Example
///
/// ```
/// use relaymux::prelude::*;
///
/// let network = LoopbackNetwork::new();
/// let config = SessionConfigBuilder::new().max_connections(8).build().unwrap();
///
/// let (mut server, mut events) = Server::new(network.endpoint("host"), config).unwrap();
///
/// server.pump();
/// while let Ok(event) = events.try_recv() {
///     match event {
///         ServerEvent::Connected { connection_id } => println!("{connection_id} joined"),
///         ServerEvent::Data { connection_id, data, .. } => {
///             server.send(connection_id, 0, &data).unwrap();
///         }
///         _ => {}
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Server<S: Substrate> {
    endpoint: Endpoint<S>,
    connections: ConnectionTable<S::Peer>,
    next_connection_id: u32,
    max_connections: usize,
    shut_down: bool,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl<S: Substrate> Server<S> {
    /// Create a server over `substrate`.
    pub fn new(
        substrate: S,
        config: SessionConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>), ConfigError> {
        let endpoint = Endpoint::new(substrate, &config)?;
        let (events, rx) = mpsc::unbounded_channel();

        debug!(max_connections = config.max_connections, "server created");
        let server = Self {
            endpoint,
            connections: ConnectionTable::new(),
            next_connection_id: FIRST_CONNECTION_ID,
            max_connections: config.max_connections,
            shut_down: false,
            events,
        };
        Ok((server, rx))
    }

    /// Run one tick at the current time.
    pub fn pump(&mut self) {
        self.pump_at(Instant::now());
    }

    /// Run one tick at `now`.
    ///
    /// Order: deferred closes and quarantine, notifications, at most one
    /// control message, then data. After [`Server::shutdown`] inbound
    /// traffic is discarded.
    pub fn pump_at(&mut self, now: Instant) {
        if !self.endpoint.begin_tick(now) {
            return;
        }
        if self.shut_down {
            self.endpoint.discard_inbound();
            return;
        }

        while let Some(notification) = self.endpoint.poll_notification() {
            self.handle_notification(notification);
        }

        match self.endpoint.poll_control() {
            ControlPoll::Empty => {}
            ControlPoll::Ignored => return,
            ControlPoll::Message {
                peer,
                socket,
                message,
            } => {
                self.handle_control(peer, socket, message, now);
                return;
            }
        }

        for delivery in self.endpoint.poll_data(now) {
            self.handle_data(delivery);
        }
    }

    /// Handle a substrate notification.
    ///
    /// Called by [`Server::pump`]; exposed for substrates that deliver
    /// notifications through callbacks instead of polling.
    pub fn handle_notification(&mut self, notification: Notification<S::Peer>) {
        if self.shut_down || self.endpoint.is_ignoring() {
            return;
        }

        match notification {
            Notification::ConnectionRequest { peer, socket } => {
                if self.endpoint.is_dead(&socket) {
                    warn!(peer = ?peer, socket = %socket, "refusing request on closed socket");
                    return;
                }
                let _ = self.endpoint.accept_connection(&peer, &socket);
            }
            Notification::ConnectionClosed {
                peer,
                socket,
                reason,
            } => {
                let registered = self
                    .connections
                    .get_by_peer(&peer)
                    .is_some_and(|c| c.socket == socket);
                if !registered {
                    debug!(peer = ?peer, socket = %socket, %reason, "close of unregistered connection");
                    return;
                }
                if let Some(connection) = self.connections.remove_by_peer(&peer) {
                    warn!(
                        connection_id = %connection.id,
                        peer = ?peer,
                        %reason,
                        "connection closed by substrate"
                    );
                    self.endpoint.close_session(&peer, socket);
                    self.emit(ServerEvent::Disconnected {
                        connection_id: connection.id,
                    });
                }
            }
        }
    }

    /// Send a message to a client.
    pub fn send(
        &mut self,
        connection_id: ConnectionId,
        channel: ChannelIndex,
        data: &[u8],
    ) -> SessionResult<()> {
        if self.shut_down {
            return Err(SessionError::ShutDown);
        }
        let connection = self
            .connections
            .get(connection_id)
            .ok_or(SessionError::UnknownConnection(connection_id))?;
        let (peer, socket) = (connection.peer.clone(), connection.socket.clone());
        self.endpoint.send_message(&peer, &socket, channel, data)
    }

    /// Send a message to every client.
    ///
    /// Returns the number of clients it was sent to. Failures are logged.
    pub fn broadcast(&mut self, channel: ChannelIndex, data: &[u8]) -> usize {
        let mut sent = 0;
        for connection_id in self.connections.ids() {
            match self.send(connection_id, channel, data) {
                Ok(()) => sent += 1,
                Err(e) => warn!(%connection_id, error = %e, "broadcast send failed"),
            }
        }
        sent
    }

    /// Disconnect a client.
    ///
    /// Sends DISCONNECT, forgets the connection and closes its socket on
    /// the next pump. No [`ServerEvent::Disconnected`] is emitted for a
    /// local disconnect.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> SessionResult<()> {
        let Some(connection) = self.connections.remove(connection_id) else {
            warn!(%connection_id, "disconnect of unknown connection");
            return Err(SessionError::UnknownConnection(connection_id));
        };

        info!(%connection_id, peer = ?connection.peer, "disconnecting client");
        self.retire(connection);
        Ok(())
    }

    /// Disconnect every client and stop handling traffic.
    ///
    /// Pending socket closes still run on the next pump.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }

        let connections = self.connections.drain();
        info!(connections = connections.len(), "shutting down");
        for connection in connections {
            self.retire(connection);
        }

        self.shut_down = true;
        self.endpoint.discard_inbound();
        self.endpoint.restart_quarantine();
    }

    /// Whether [`Server::shutdown`] was called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Substrate address of a client.
    pub fn client_address(&self, connection_id: ConnectionId) -> Option<&S::Peer> {
        self.connections.get(connection_id).map(|c| &c.peer)
    }

    /// Connection details of a client.
    pub fn connection(&self, connection_id: ConnectionId) -> Option<&Connection<S::Peer>> {
        self.connections.get(connection_id)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Live connection ids in ascending order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.ids()
    }

    /// Whether `socket` belongs to an ended session.
    pub fn is_socket_dead(&self, socket: &SocketName) -> bool {
        self.endpoint.is_dead(socket)
    }

    /// Largest message [`Server::send`] accepts.
    pub fn max_message_size(&self) -> usize {
        self.endpoint.max_message_size()
    }

    /// The substrate.
    pub fn substrate(&self) -> &S {
        self.endpoint.substrate()
    }

    /// Mutable access to the substrate.
    pub fn substrate_mut(&mut self) -> &mut S {
        self.endpoint.substrate_mut()
    }

    fn handle_control(
        &mut self,
        peer: S::Peer,
        socket: SocketName,
        message: ControlMessage,
        now: Instant,
    ) {
        match message {
            ControlMessage::Connect => self.admit(peer, socket, now),
            ControlMessage::Disconnect => self.remote_disconnect(peer, socket),
            ControlMessage::AcceptConnect => {
                warn!(peer = ?peer, socket = %socket, "unexpected ACCEPT_CONNECT");
            }
        }
    }

    fn admit(&mut self, peer: S::Peer, socket: SocketName, now: Instant) {
        if self.endpoint.is_dead(&socket) {
            warn!(peer = ?peer, socket = %socket, "CONNECT on closed socket");
            return;
        }

        if let Some(existing) = self.connections.get_by_peer(&peer) {
            if existing.socket == socket {
                debug!(connection_id = %existing.id, "repeated CONNECT, accepting again");
                let _ = self
                    .endpoint
                    .send_control(&peer, &socket, ControlMessage::AcceptConnect);
                return;
            }

            if let Some(old) = self.connections.remove_by_peer(&peer) {
                info!(
                    connection_id = %old.id,
                    peer = ?peer,
                    socket = %socket,
                    "peer reconnected on a new socket"
                );
                self.endpoint.close_session(&peer, old.socket);
                self.emit(ServerEvent::Disconnected {
                    connection_id: old.id,
                });
            }
        }

        if self.connections.len() >= self.max_connections {
            warn!(peer = ?peer, max = self.max_connections, "server full, rejecting client");
            let _ = self
                .endpoint
                .send_control(&peer, &socket, ControlMessage::Disconnect);
            return;
        }

        if self
            .endpoint
            .send_control(&peer, &socket, ControlMessage::AcceptConnect)
            .is_err()
        {
            return;
        }

        let connection_id = self.allocate_id();
        info!(%connection_id, peer = ?peer, socket = %socket, "client connected");
        self.connections.insert(Connection {
            id: connection_id,
            peer,
            socket,
            admitted_at: now,
        });
        self.emit(ServerEvent::Connected { connection_id });
    }

    fn remote_disconnect(&mut self, peer: S::Peer, socket: SocketName) {
        match self.connections.get_by_peer(&peer) {
            Some(connection) if connection.socket == socket => {
                let connection_id = connection.id;
                self.connections.remove(connection_id);
                info!(%connection_id, peer = ?peer, "client disconnected");
                self.endpoint.close_session(&peer, socket);
                self.emit(ServerEvent::Disconnected { connection_id });
            }
            Some(connection) => {
                debug!(
                    connection_id = %connection.id,
                    socket = %socket,
                    "DISCONNECT on stale socket"
                );
                self.endpoint.close_session(&peer, socket);
            }
            None => self.reject_unknown(peer, socket),
        }
    }

    fn handle_data(&mut self, delivery: Delivery<S::Peer>) {
        let message = delivery.message;
        match self.connections.id_of(&message.peer) {
            Some(connection_id) => self.emit(ServerEvent::Data {
                connection_id,
                channel: message.channel,
                data: message.data,
            }),
            None => self.reject_unknown(message.peer, delivery.socket),
        }
    }

    fn reject_unknown(&mut self, peer: S::Peer, socket: SocketName) {
        if self.endpoint.is_dead(&socket) {
            debug!(peer = ?peer, socket = %socket, "traffic on closed socket");
            return;
        }
        error!(peer = ?peer, socket = %socket, "traffic from unknown peer, closing socket");
        let cause = SessionError::UnknownPeer(format!("{peer:?}"));
        self.endpoint.close_session(&peer, socket);
        self.emit(ServerEvent::Error {
            connection_id: None,
            cause,
        });
    }

    fn retire(&mut self, connection: Connection<S::Peer>) {
        let _ = self.endpoint.send_control(
            &connection.peer,
            &connection.socket,
            ControlMessage::Disconnect,
        );
        self.endpoint
            .schedule_close(connection.peer, connection.socket);
    }

    fn allocate_id(&mut self) -> ConnectionId {
        loop {
            let raw = self.next_connection_id;
            self.next_connection_id = raw.wrapping_add(1).max(FIRST_CONNECTION_ID);
            if let Some(id) = ConnectionId::new(raw) {
                if !self.connections.contains_id(id) {
                    return id;
                }
            }
        }
    }

    fn emit(&self, event: ServerEvent) {
        if self.events.send(event).is_err() {
            debug!("server event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::core::{Reliability, SessionConfigBuilder};
    use crate::transport::{packet, LoopbackNetwork, LoopbackSubstrate};

    const CONTROL: ChannelIndex = 2;
    const RO: Reliability = Reliability::ReliableOrdered;

    struct Harness {
        network: LoopbackNetwork,
        server: Server<LoopbackSubstrate>,
        events: mpsc::UnboundedReceiver<ServerEvent>,
        now: Instant,
    }

    impl Harness {
        fn new(max_connections: usize) -> Self {
            let network = LoopbackNetwork::new();
            let config = SessionConfigBuilder::new()
                .quarantine(Duration::ZERO)
                .max_connections(max_connections)
                .build()
                .unwrap();
            let (server, events) = Server::new(network.endpoint("host"), config).unwrap();
            Self {
                network,
                server,
                events,
                now: Instant::now(),
            }
        }

        fn control(&self, from: &str, socket: &str, message: ControlMessage) {
            self.network
                .endpoint(from)
                .send_datagram(
                    &"host".to_string(),
                    &SocketName::from(socket),
                    CONTROL,
                    RO,
                    &message.to_bytes(),
                )
                .unwrap();
        }

        fn reply(&self, to: &str) -> Option<ControlMessage> {
            let datagram = self.network.endpoint(to).poll_datagram(CONTROL)?;
            ControlMessage::from_bytes(&datagram.data).ok()
        }

        fn pump(&mut self) {
            self.server.pump_at(self.now);
        }

        fn event(&mut self) -> Option<ServerEvent> {
            self.events.try_recv().ok()
        }
    }

    fn id(n: u32) -> ConnectionId {
        ConnectionId::new(n).unwrap()
    }

    #[test]
    fn test_server_admits() {
        let mut h = Harness::new(4);
        h.control("a", "SA", ControlMessage::Connect);
        h.pump();

        assert_eq!(h.reply("a"), Some(ControlMessage::AcceptConnect));
        assert!(matches!(
            h.event(),
            Some(ServerEvent::Connected { connection_id }) if connection_id == id(1)
        ));
        assert_eq!(h.server.client_address(id(1)), Some(&"a".to_string()));
        assert_eq!(h.server.connection_count(), 1);
    }

    #[test]
    fn test_server_rejects_at_capacity() {
        let mut h = Harness::new(1);
        h.control("a", "SA", ControlMessage::Connect);
        h.pump();
        h.control("b", "SB", ControlMessage::Connect);
        h.pump();

        assert_eq!(h.reply("b"), Some(ControlMessage::Disconnect));
        assert_eq!(h.server.connection_count(), 1);
        assert!(matches!(h.event(), Some(ServerEvent::Connected { .. })));
        assert!(h.event().is_none());
    }

    #[test]
    fn test_one_control_message_per_pump() {
        let mut h = Harness::new(4);
        h.control("a", "SA", ControlMessage::Connect);
        h.control("b", "SB", ControlMessage::Connect);

        h.pump();
        assert_eq!(h.server.connection_count(), 1);
        h.pump();
        assert_eq!(h.server.connection_count(), 2);
    }

    #[test]
    fn test_repeated_connect_keeps_id() {
        let mut h = Harness::new(4);
        h.control("a", "SA", ControlMessage::Connect);
        h.pump();
        h.control("a", "SA", ControlMessage::Connect);
        h.pump();

        assert_eq!(h.reply("a"), Some(ControlMessage::AcceptConnect));
        assert_eq!(h.reply("a"), Some(ControlMessage::AcceptConnect));
        assert_eq!(h.server.connection_ids(), vec![id(1)]);
        assert!(h.event().is_some());
        assert!(h.event().is_none());
    }

    #[test]
    fn test_reconnect_on_new_socket_replaces() {
        let mut h = Harness::new(4);
        h.control("a", "S1", ControlMessage::Connect);
        h.pump();
        h.control("a", "S2", ControlMessage::Connect);
        h.pump();

        assert!(matches!(h.event(), Some(ServerEvent::Connected { connection_id }) if connection_id == id(1)));
        assert!(matches!(h.event(), Some(ServerEvent::Disconnected { connection_id }) if connection_id == id(1)));
        assert!(matches!(h.event(), Some(ServerEvent::Connected { connection_id }) if connection_id == id(2)));
        assert!(h.server.is_socket_dead(&SocketName::from("S1")));
        assert_eq!(h.server.connection(id(2)).unwrap().socket, SocketName::from("S2"));
    }

    #[test]
    fn test_late_disconnect_on_old_socket() {
        let mut h = Harness::new(4);
        let fragment = |h: &Harness, index: u32, more: bool, payload: &[u8]| {
            h.network
                .endpoint("a")
                .send_datagram(
                    &"host".to_string(),
                    &SocketName::from("S2"),
                    0,
                    RO,
                    &packet::encode(9, index, more, payload),
                )
                .unwrap();
        };

        h.control("a", "S1", ControlMessage::Connect);
        h.pump();
        h.control("a", "S2", ControlMessage::Connect);
        h.pump();

        fragment(&h, 0, true, b"first ");
        h.pump();
        h.control("a", "S1", ControlMessage::Disconnect);
        h.pump();
        fragment(&h, 1, false, b"second");
        h.pump();

        assert!(matches!(h.event(), Some(ServerEvent::Connected { connection_id }) if connection_id == id(1)));
        assert!(matches!(h.event(), Some(ServerEvent::Disconnected { connection_id }) if connection_id == id(1)));
        assert!(matches!(h.event(), Some(ServerEvent::Connected { connection_id }) if connection_id == id(2)));
        match h.event() {
            Some(ServerEvent::Data {
                connection_id,
                data,
                ..
            }) => {
                assert_eq!(connection_id, id(2));
                assert_eq!(data, b"first second");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(h.event().is_none());
        assert_eq!(h.server.connection_ids(), vec![id(2)]);
    }

    #[test]
    fn test_remote_disconnect() {
        let mut h = Harness::new(4);
        h.control("a", "SA", ControlMessage::Connect);
        h.pump();
        h.control("a", "SA", ControlMessage::Disconnect);
        h.pump();

        h.event();
        assert!(matches!(h.event(), Some(ServerEvent::Disconnected { connection_id }) if connection_id == id(1)));
        assert_eq!(h.server.connection_count(), 0);
        assert!(h.server.is_socket_dead(&SocketName::from("SA")));

        // A closed socket cannot come back.
        h.control("a", "SA", ControlMessage::Connect);
        h.pump();
        h.pump();
        assert_eq!(h.server.connection_count(), 0);
    }

    #[test]
    fn test_unknown_peer_disconnect_is_error() {
        let mut h = Harness::new(4);
        h.control("x", "SX", ControlMessage::Disconnect);
        h.pump();

        assert!(matches!(
            h.event(),
            Some(ServerEvent::Error {
                connection_id: None,
                cause: SessionError::UnknownPeer(_)
            })
        ));
        assert!(h.server.is_socket_dead(&SocketName::from("SX")));
    }

    #[test]
    fn test_unknown_peer_data_is_error() {
        let mut h = Harness::new(4);
        let bytes = packet::encode(0, 0, false, b"sneaky");
        h.network
            .endpoint("x")
            .send_datagram(&"host".to_string(), &SocketName::from("SX"), 0, RO, &bytes)
            .unwrap();
        h.pump();

        assert!(matches!(
            h.event(),
            Some(ServerEvent::Error { connection_id: None, .. })
        ));
        assert!(h.event().is_none());
    }

    #[test]
    fn test_server_data_and_send() {
        let mut h = Harness::new(4);
        h.control("a", "SA", ControlMessage::Connect);
        h.pump();
        h.event();
        h.reply("a");

        let bytes = packet::encode(7, 0, false, b"hello");
        h.network
            .endpoint("a")
            .send_datagram(&"host".to_string(), &SocketName::from("SA"), 1, RO, &bytes)
            .unwrap();
        h.pump();

        match h.event() {
            Some(ServerEvent::Data {
                connection_id,
                channel,
                data,
            }) => {
                assert_eq!(connection_id, id(1));
                assert_eq!(channel, 1);
                assert_eq!(data, b"hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        h.server.send(id(1), 0, b"world").unwrap();
        let datagram = h.network.endpoint("a").poll_datagram(0).unwrap();
        assert_eq!(packet::decode(&datagram.data).unwrap().payload, b"world");

        assert!(matches!(
            h.server.send(id(9), 0, b"x"),
            Err(SessionError::UnknownConnection(_))
        ));
    }

    #[test]
    fn test_server_disconnect() {
        let mut h = Harness::new(4);
        h.control("a", "SA", ControlMessage::Connect);
        h.pump();
        h.event();
        h.reply("a");

        h.server.disconnect(id(1)).unwrap();
        assert_eq!(h.reply("a"), Some(ControlMessage::Disconnect));
        assert_eq!(h.server.connection_count(), 0);
        assert!(h.event().is_none());
        assert!(h.server.disconnect(id(1)).is_err());

        h.pump();
        assert!(h.server.is_socket_dead(&SocketName::from("SA")));
    }

    #[test]
    fn test_server_shutdown() {
        let mut h = Harness::new(4);
        h.control("a", "SA", ControlMessage::Connect);
        h.pump();
        h.control("b", "SB", ControlMessage::Connect);
        h.pump();
        h.reply("a");
        h.reply("b");

        h.server.shutdown();
        assert_eq!(h.reply("a"), Some(ControlMessage::Disconnect));
        assert_eq!(h.reply("b"), Some(ControlMessage::Disconnect));
        assert_eq!(h.server.connection_count(), 0);
        assert!(matches!(h.server.send(id(1), 0, b"x"), Err(SessionError::ShutDown)));

        h.control("c", "SC", ControlMessage::Connect);
        h.pump();
        h.pump();
        assert_eq!(h.server.connection_count(), 0);
        assert!(h.server.is_socket_dead(&SocketName::from("SA")));
        assert!(h.server.is_socket_dead(&SocketName::from("SB")));
    }

    #[test]
    fn test_substrate_close_disconnects() {
        let mut h = Harness::new(4);
        h.control("a", "SA", ControlMessage::Connect);
        h.pump();
        h.event();

        h.network
            .endpoint("a")
            .close_connection(&"host".to_string(), &SocketName::from("SA"))
            .unwrap();
        h.pump();

        assert!(matches!(h.event(), Some(ServerEvent::Disconnected { connection_id }) if connection_id == id(1)));
        assert_eq!(h.server.connection_count(), 0);
    }

    #[test]
    fn test_connection_ids_skip_live() {
        let mut h = Harness::new(4);
        h.server.next_connection_id = u32::MAX;
        h.control("a", "SA", ControlMessage::Connect);
        h.pump();
        h.control("b", "SB", ControlMessage::Connect);
        h.pump();

        assert_eq!(h.server.connection_ids(), vec![id(1), id(u32::MAX)]);
    }
}
