//! Client role.
//!
//! Provides [`Client<S>`], which owns one session to a single host over a
//! substrate `S`. The client connects automatically once its quarantine
//! window has passed and reports everything through [`ClientEvent`]s.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::{ChannelIndex, ConfigError, Notification, SessionConfig, SocketName, Substrate};
use crate::transport::{
    ControlMessage, ControlPoll, Delivery, Endpoint, Handshake, HandshakeEvent, HandshakePhase,
    SessionError, SessionResult,
};

/// Event from the client.
#[derive(Debug)]
pub enum ClientEvent {
    /// The host accepted the connection.
    Connected,

    /// The connection attempt failed. Always followed by
    /// [`ClientEvent::Disconnected`].
    ConnectionFailed {
        /// Why the attempt failed.
        cause: SessionError,
    },

    /// The connection is gone.
    Disconnected,

    /// A complete message arrived from the host.
    Data {
        /// Data channel it arrived on.
        channel: ChannelIndex,
        /// Message bytes.
        data: Vec<u8>,
    },

    /// Something went wrong that did not end the connection.
    Error(SessionError),
}

/// The client side of the multiplexer.
///
/// # Example
///
/// ```
/// use relaymux::prelude::*;
///
/// let network = LoopbackNetwork::new();
/// let config = SessionConfig::default();
///
/// let (mut client, mut events) =
///     Client::new(network.endpoint("client"), "host".to_string(), config).unwrap();
///
/// client.pump();
/// assert!(events.try_recv().is_err());
/// ```
#[derive(Debug)]
pub struct Client<S: Substrate> {
    endpoint: Endpoint<S>,
    host: S::Peer,
    socket: SocketName,
    handshake: Handshake,
    connect_timeout: Duration,
    wants_connection: bool,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl<S: Substrate> Client<S> {
    /// Create a client for `host` on a random socket name.
    ///
    /// The connection starts on the first pump after the quarantine window.
    pub fn new(
        substrate: S,
        host: S::Peer,
        config: SessionConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ConfigError> {
        Self::with_socket_name(substrate, host, SocketName::generate(), config)
    }

    /// Create a client for `host` on a chosen socket name.
    pub fn with_socket_name(
        substrate: S,
        host: S::Peer,
        socket: SocketName,
        config: SessionConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ConfigError> {
        let endpoint = Endpoint::new(substrate, &config)?;
        let (events, rx) = mpsc::unbounded_channel();

        debug!(host = ?host, socket = %socket, "client created");
        let client = Self {
            endpoint,
            host,
            socket,
            handshake: Handshake::new(),
            connect_timeout: config.effective_connect_timeout(),
            wants_connection: true,
            events,
        };
        Ok((client, rx))
    }

    /// Run one tick at the current time.
    pub fn pump(&mut self) {
        self.pump_at(Instant::now());
    }

    /// Run one tick at `now`.
    ///
    /// Order: deferred closes and quarantine, notifications, handshake
    /// deadline, at most one control message, data, then a new connection
    /// attempt if one is wanted.
    pub fn pump_at(&mut self, now: Instant) {
        if !self.endpoint.begin_tick(now) {
            return;
        }

        while let Some(notification) = self.endpoint.poll_notification() {
            self.handle_notification(notification);
        }

        let events = self.handshake.poll_timeout(now);
        if !events.is_empty() {
            warn!(host = ?self.host, timeout = ?self.connect_timeout, "connection attempt timed out");
            self.end_session();
            self.report(events, SessionError::HandshakeTimeout);
        }

        match self.endpoint.poll_control() {
            ControlPoll::Empty => {}
            ControlPoll::Ignored => return,
            ControlPoll::Message {
                peer,
                socket,
                message,
            } => {
                self.handle_control(peer, socket, message);
                return;
            }
        }

        for delivery in self.endpoint.poll_data(now) {
            self.handle_data(delivery);
        }

        self.start_connecting(now);
    }

    /// Handle a substrate notification.
    ///
    /// Called by [`Client::pump`]; exposed for substrates that deliver
    /// notifications through callbacks instead of polling.
    pub fn handle_notification(&mut self, notification: Notification<S::Peer>) {
        if self.endpoint.is_ignoring() {
            return;
        }

        match notification {
            Notification::ConnectionRequest { peer, socket } => {
                if self.endpoint.is_dead(&socket) {
                    warn!(peer = ?peer, socket = %socket, "refusing request on closed socket");
                    return;
                }
                if peer != self.host {
                    warn!(peer = ?peer, socket = %socket, "refusing request from unknown peer");
                    return;
                }
                let _ = self.endpoint.accept_connection(&peer, &socket);
            }
            Notification::ConnectionClosed {
                peer,
                socket,
                reason,
            } => {
                if peer != self.host || socket != self.socket {
                    debug!(peer = ?peer, socket = %socket, "ignoring close of unrelated connection");
                    return;
                }
                let events = self.handshake.on_disconnect();
                if !events.is_empty() {
                    warn!(host = ?peer, %reason, "connection closed by substrate");
                    self.endpoint.close_session(&peer, socket);
                }
                self.report(events, SessionError::RemoteClosed(reason));
            }
        }
    }

    /// Start a new connection after a disconnect or failure.
    ///
    /// The new attempt uses a fresh socket name. Has no effect while a
    /// connection or attempt is active.
    pub fn connect(&mut self) {
        self.wants_connection = true;
        if self.handshake.phase() == HandshakePhase::Disconnected {
            self.socket = SocketName::generate();
            self.handshake.reset();
            debug!(socket = %self.socket, "reconnecting on new socket");
        }
    }

    /// Disconnect from the host.
    ///
    /// Sends DISCONNECT and closes the socket on the next pump. No
    /// [`ClientEvent::Disconnected`] is emitted for a local disconnect.
    pub fn disconnect(&mut self) {
        self.wants_connection = false;
        if !self.handshake.close() {
            debug!("disconnect without connection");
            return;
        }

        info!(host = ?self.host, socket = %self.socket, "disconnecting");
        let _ = self
            .endpoint
            .send_control(&self.host, &self.socket, ControlMessage::Disconnect);
        self.endpoint
            .schedule_close(self.host.clone(), self.socket.clone());
        self.endpoint.restart_quarantine();
    }

    /// Send a message to the host.
    pub fn send(&mut self, channel: ChannelIndex, data: &[u8]) -> SessionResult<()> {
        if !self.handshake.is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.endpoint
            .send_message(&self.host, &self.socket, channel, data)
    }

    /// Whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.handshake.is_connected()
    }

    /// Whether the last connection attempt failed.
    pub fn has_error(&self) -> bool {
        self.handshake.has_error()
    }

    /// Current handshake phase.
    pub fn phase(&self) -> HandshakePhase {
        self.handshake.phase()
    }

    /// The host this client connects to.
    pub fn host(&self) -> &S::Peer {
        &self.host
    }

    /// Socket name of the current session.
    pub fn socket_name(&self) -> &SocketName {
        &self.socket
    }

    /// Whether `socket` belongs to an ended session.
    pub fn is_socket_dead(&self, socket: &SocketName) -> bool {
        self.endpoint.is_dead(socket)
    }

    /// Largest message [`Client::send`] accepts.
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

    fn handle_control(&mut self, peer: S::Peer, socket: SocketName, message: ControlMessage) {
        if peer != self.host {
            warn!(peer = ?peer, ?message, "control message from unknown peer");
            return;
        }
        if socket != self.socket {
            debug!(socket = %socket, ?message, "control message on stale socket");
            return;
        }

        match message {
            ControlMessage::AcceptConnect => {
                if self.handshake.on_accept().is_empty() {
                    debug!("unexpected ACCEPT_CONNECT");
                } else {
                    info!(host = ?self.host, socket = %self.socket, "connected");
                    self.emit(ClientEvent::Connected);
                }
            }
            ControlMessage::Disconnect => {
                let events = self.handshake.on_disconnect();
                if !events.is_empty() {
                    info!(host = ?self.host, "disconnected by host");
                    self.end_session();
                }
                self.report(events, SessionError::Rejected);
            }
            ControlMessage::Connect => {
                warn!(host = ?self.host, "unexpected CONNECT from host");
            }
        }
    }

    fn handle_data(&mut self, delivery: Delivery<S::Peer>) {
        let message = delivery.message;
        if message.peer != self.host {
            warn!(peer = ?message.peer, "message from unknown peer");
            self.emit(ClientEvent::Error(SessionError::UnknownPeer(format!(
                "{:?}",
                message.peer
            ))));
            return;
        }
        if !self.handshake.is_connected() {
            debug!(channel = message.channel, "message before connection established");
            return;
        }
        self.emit(ClientEvent::Data {
            channel: message.channel,
            data: message.data,
        });
    }

    fn start_connecting(&mut self, now: Instant) {
        if !self.wants_connection || !self.handshake.initiate(now, self.connect_timeout) {
            return;
        }

        info!(host = ?self.host, socket = %self.socket, "connecting");
        if let Err(e) = self
            .endpoint
            .send_control(&self.host, &self.socket, ControlMessage::Connect)
        {
            let events = self.handshake.abort();
            self.end_session();
            self.report(events, SessionError::Substrate(e));
        }
    }

    fn end_session(&mut self) {
        self.endpoint
            .schedule_close(self.host.clone(), self.socket.clone());
    }

    fn report(&mut self, events: Vec<HandshakeEvent>, cause: SessionError) {
        let mut cause = Some(cause);
        for event in events {
            let event = match event {
                HandshakeEvent::Connected => ClientEvent::Connected,
                HandshakeEvent::Disconnected => ClientEvent::Disconnected,
                HandshakeEvent::ConnectionFailed => match cause.take() {
                    Some(cause) => ClientEvent::ConnectionFailed { cause },
                    None => continue,
                },
            };
            self.emit(event);
        }
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("client event receiver dropped");
        }
    }
}
