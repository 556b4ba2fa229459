//! Shared session engine for the client and server roles.
//!
//! An [`Endpoint`] owns the substrate together with everything both roles
//! need: channel layout, reassembly table, quarantine, dead sockets and
//! deferred closes. The roles decide what control messages and completed
//! messages mean; the endpoint only moves bytes.
//!
//! A role's `pump` calls, in order:
//! 1. [`Endpoint::begin_tick`], which stops the tick while quarantined
//! 2. [`Endpoint::poll_notification`] until empty
//! 3. [`Endpoint::poll_control`] once
//! 4. [`Endpoint::poll_data`]

use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use super::control::ControlMessage;
use super::error::{SessionError, SessionResult};
use super::packet::{self, split_message};
use super::quarantine::{DeadSockets, PendingCloses, Quarantine};
use super::reassembly::{CompletedMessage, ReassemblyTable};
use crate::core::constants::FRAGMENT_HEADER_SIZE;
use crate::core::{
    ChannelIndex, ConfigError, Notification, PacketError, Reliability, SessionConfig,
    SocketName, Substrate, SubstrateError,
};

/// Result of polling the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPoll<P> {
    /// No control datagram was waiting.
    Empty,
    /// A control datagram was consumed but carried nothing usable.
    Ignored,
    /// A control message.
    Message {
        /// Sending peer.
        peer: P,
        /// Socket it arrived on.
        socket: SocketName,
        /// The message.
        message: ControlMessage,
    },
}

/// A completed message and the socket its final fragment arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery<P> {
    /// Socket of the final fragment.
    pub socket: SocketName,
    /// The message.
    pub message: CompletedMessage<P>,
}

/// Substrate plus the state shared by both roles.
#[derive(Debug)]
pub struct Endpoint<S: Substrate> {
    substrate: S,
    channels: Vec<Reliability>,
    control_channel: ChannelIndex,
    fragment_payload: usize,
    max_fragments: usize,
    reassembly: ReassemblyTable<S::Peer>,
    reassembly_timeout: Option<Duration>,
    quarantine: Quarantine,
    dead_sockets: DeadSockets,
    pending_closes: PendingCloses<S::Peer>,
    next_message_id: u32,
    tick: u64,
    ignoring: bool,
}

impl<S: Substrate> Endpoint<S> {
    /// Create an endpoint over `substrate`.
    ///
    /// The datagram size is the smaller of the configured one and the
    /// substrate's own limit.
    pub fn new(substrate: S, config: &SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let max_datagram_size = config
            .max_datagram_size
            .min(substrate.max_datagram_size());
        if max_datagram_size <= FRAGMENT_HEADER_SIZE {
            return Err(ConfigError::DatagramTooSmall(max_datagram_size));
        }

        Ok(Self {
            substrate,
            channels: config.channels.clone(),
            control_channel: config.control_channel(),
            fragment_payload: max_datagram_size - FRAGMENT_HEADER_SIZE,
            max_fragments: config.max_fragments,
            reassembly: ReassemblyTable::new(config.max_fragments),
            reassembly_timeout: config.reassembly_timeout,
            quarantine: Quarantine::new(config.quarantine),
            dead_sockets: DeadSockets::new(),
            pending_closes: PendingCloses::new(),
            next_message_id: 0,
            tick: 0,
            ignoring: false,
        })
    }

    /// Start a pump tick.
    ///
    /// Runs deferred closes and reassembly eviction, then checks the
    /// quarantine. Returns `false` when quarantined, in which case all
    /// inbound traffic has been discarded and the tick must end.
    pub fn begin_tick(&mut self, now: Instant) -> bool {
        self.tick += 1;

        for (peer, socket) in self.pending_closes.take_due(self.tick) {
            self.close_session(&peer, socket);
        }

        if let Some(max_age) = self.reassembly_timeout {
            let evicted = self.reassembly.evict_older_than(now, max_age);
            if evicted > 0 {
                debug!(evicted, "dropped stale partial messages");
            }
        }

        if self.quarantine.is_active(now) {
            if !self.ignoring {
                debug!(window = ?self.quarantine.window(), "quarantine started");
                self.ignoring = true;
            }
            self.discard_inbound();
            return false;
        }

        if self.ignoring {
            debug!("quarantine over");
            self.ignoring = false;
        }
        true
    }

    /// Whether inbound traffic is currently being discarded.
    pub fn is_ignoring(&self) -> bool {
        self.ignoring
    }

    /// Drain and drop every pending notification and datagram on every
    /// channel, control included.
    pub fn discard_inbound(&mut self) {
        let mut notifications = 0usize;
        while self.substrate.poll_notification().is_some() {
            notifications += 1;
        }

        let mut datagrams = 0usize;
        for channel in 0..=self.control_channel {
            while self.substrate.poll_datagram(channel).is_some() {
                datagrams += 1;
            }
        }

        if notifications + datagrams > 0 {
            trace!(notifications, datagrams, "discarded inbound traffic");
        }
    }

    /// Take the next substrate notification.
    pub fn poll_notification(&mut self) -> Option<Notification<S::Peer>> {
        self.substrate.poll_notification()
    }

    /// Take the next control message.
    ///
    /// Datagrams of the wrong length are skipped. An unknown control byte
    /// consumes the poll and yields [`ControlPoll::Ignored`].
    pub fn poll_control(&mut self) -> ControlPoll<S::Peer> {
        while let Some(datagram) = self.substrate.poll_datagram(self.control_channel) {
            match ControlMessage::from_bytes(&datagram.data) {
                Ok(message) => {
                    return ControlPoll::Message {
                        peer: datagram.peer,
                        socket: datagram.socket,
                        message,
                    };
                }
                Err(PacketError::ControlLength(len)) => {
                    warn!(peer = ?datagram.peer, len, "incorrect datagram length on control channel");
                }
                Err(e) => {
                    warn!(peer = ?datagram.peer, error = %e, "ignoring control datagram");
                    return ControlPoll::Ignored;
                }
            }
        }
        ControlPoll::Empty
    }

    /// Drain every data channel through the reassembly table.
    ///
    /// Malformed datagrams are logged and dropped.
    pub fn poll_data(&mut self, now: Instant) -> Vec<Delivery<S::Peer>> {
        let mut deliveries = Vec::new();

        for channel in 0..self.control_channel {
            while let Some(datagram) = self.substrate.poll_datagram(channel) {
                let fragment = match packet::decode(&datagram.data) {
                    Ok(fragment) => fragment,
                    Err(e) => {
                        warn!(peer = ?datagram.peer, channel, error = %e, "dropping datagram");
                        continue;
                    }
                };

                if let Some(message) =
                    self.reassembly
                        .ingest(datagram.peer, &datagram.socket, channel, fragment, now)
                {
                    deliveries.push(Delivery {
                        socket: datagram.socket,
                        message,
                    });
                }
            }
        }

        deliveries
    }

    /// Send a control message on the control channel.
    pub fn send_control(
        &mut self,
        peer: &S::Peer,
        socket: &SocketName,
        message: ControlMessage,
    ) -> Result<(), SubstrateError> {
        trace!(peer = ?peer, socket = %socket, ?message, "sending control message");
        self.substrate
            .send_datagram(
                peer,
                socket,
                self.control_channel,
                Reliability::ReliableOrdered,
                &message.to_bytes(),
            )
            .inspect_err(|e| {
                error!(peer = ?peer, socket = %socket, ?message, error = %e, "control send failed");
            })
    }

    /// Fragment and send a message on a data channel.
    ///
    /// Substrate failures are logged and returned; nothing is retried.
    pub fn send_message(
        &mut self,
        peer: &S::Peer,
        socket: &SocketName,
        channel: ChannelIndex,
        data: &[u8],
    ) -> SessionResult<()> {
        let reliability = *self
            .channels
            .get(channel as usize)
            .ok_or(SessionError::InvalidChannel(channel))?;

        let max = self.max_message_size();
        if data.len() > max {
            return Err(SessionError::MessageTooLarge {
                len: data.len(),
                max,
            });
        }

        let message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);

        for fragment in split_message(message_id, data, self.fragment_payload) {
            self.substrate
                .send_datagram(peer, socket, channel, reliability, &fragment.to_bytes())
                .inspect_err(|e| {
                    error!(
                        peer = ?peer,
                        channel,
                        message_id,
                        fragment_index = fragment.fragment_index,
                        error = %e,
                        "send failed"
                    );
                })?;
        }
        Ok(())
    }

    /// Accept a requested substrate connection.
    pub fn accept_connection(
        &mut self,
        peer: &S::Peer,
        socket: &SocketName,
    ) -> Result<(), SubstrateError> {
        debug!(peer = ?peer, socket = %socket, "accepting connection request");
        self.substrate
            .accept_connection(peer, socket)
            .inspect_err(|e| warn!(peer = ?peer, socket = %socket, error = %e, "accept failed"))
    }

    /// End a session now: mark its socket dead, close it on the substrate
    /// and drop the partial messages received on it.
    pub fn close_session(&mut self, peer: &S::Peer, socket: SocketName) {
        if let Err(e) = self.substrate.close_connection(peer, &socket) {
            debug!(peer = ?peer, socket = %socket, error = %e, "substrate close");
        }

        let dropped = self.reassembly.remove_session(peer, &socket);
        if dropped > 0 {
            debug!(peer = ?peer, socket = %socket, dropped, "dropped partial messages of closed session");
        }

        if self.dead_sockets.mark(socket.clone()) {
            debug!(peer = ?peer, socket = %socket, "socket marked dead");
        }
    }

    /// End a session on the next tick, after the substrate had a chance to
    /// flush anything just sent.
    pub fn schedule_close(&mut self, peer: S::Peer, socket: SocketName) {
        self.pending_closes.schedule(self.tick + 1, peer, socket);
    }

    /// Whether `socket` belongs to an ended session.
    pub fn is_dead(&self, socket: &SocketName) -> bool {
        self.dead_sockets.contains(socket)
    }

    /// Start a fresh quarantine window on the next tick.
    pub fn restart_quarantine(&mut self) {
        self.quarantine.restart();
    }

    /// Reliability of a data channel, if configured.
    pub fn channel_reliability(&self, channel: ChannelIndex) -> Option<Reliability> {
        self.channels.get(channel as usize).copied()
    }

    /// Number of data channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Index of the control channel.
    pub fn control_channel(&self) -> ChannelIndex {
        self.control_channel
    }

    /// Payload bytes per fragment.
    pub fn fragment_payload_size(&self) -> usize {
        self.fragment_payload
    }

    /// Largest message accepted by [`Endpoint::send_message`].
    pub fn max_message_size(&self) -> usize {
        self.fragment_payload.saturating_mul(self.max_fragments)
    }

    /// Incomplete inbound messages.
    pub fn pending_messages(&self) -> usize {
        self.reassembly.pending_messages()
    }

    /// Number of ticks started.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The substrate.
    pub fn substrate(&self) -> &S {
        &self.substrate
    }

    /// Mutable access to the substrate.
    pub fn substrate_mut(&mut self) -> &mut S {
        &mut self.substrate
    }
}
