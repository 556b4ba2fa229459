//! In-process datagram substrate.
//!
//! A [`LoopbackNetwork`] is a shared hub of named mailboxes. Each
//! [`LoopbackSubstrate`] is one named endpoint on it. Delivery is immediate
//! and in order on every channel, which makes the network deterministic for
//! tests and demos.
//!
//! Connection semantics follow the substrate contract:
//! - sending opens the local side of `(peer, socket)`
//! - the first datagram on a pair the receiver has not opened raises a
//!   [`Notification::ConnectionRequest`] and is held until accepted
//! - closing notifies the other side with [`CloseReason::ClosedByPeer`]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::core::constants::DEFAULT_MAX_DATAGRAM_SIZE;
use crate::core::{
    ChannelIndex, CloseReason, Datagram, Notification, Reliability, SocketName, Substrate,
    SubstrateError,
};

/// Peer identity on a loopback network.
pub type LoopbackPeer = String;

type Pair = (LoopbackPeer, SocketName);

#[derive(Debug, Default)]
struct Mailbox {
    queues: HashMap<ChannelIndex, VecDeque<Datagram<LoopbackPeer>>>,
    open: HashSet<Pair>,
    held: HashMap<Pair, Vec<(ChannelIndex, Vec<u8>)>>,
    notifications: VecDeque<Notification<LoopbackPeer>>,
}

impl Mailbox {
    fn enqueue(&mut self, peer: LoopbackPeer, socket: SocketName, channel: ChannelIndex, data: Vec<u8>) {
        self.queues.entry(channel).or_default().push_back(Datagram { peer, socket, data });
    }

    fn queued(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

#[derive(Debug)]
struct Hub {
    mailboxes: HashMap<LoopbackPeer, Mailbox>,
    max_datagram_size: usize,
}

/// Shared in-process network.
///
/// Cloning yields another handle to the same network.
#[derive(Debug, Clone)]
pub struct LoopbackNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackNetwork {
    /// Create a network carrying datagrams up to the default size.
    pub fn new() -> Self {
        Self::with_max_datagram_size(DEFAULT_MAX_DATAGRAM_SIZE)
    }

    /// Create a network carrying datagrams up to `max_datagram_size` bytes.
    pub fn with_max_datagram_size(max_datagram_size: usize) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                mailboxes: HashMap::new(),
                max_datagram_size,
            })),
        }
    }

    /// Create the endpoint named `name`.
    pub fn endpoint(&self, name: impl Into<LoopbackPeer>) -> LoopbackSubstrate {
        let name = name.into();
        self.lock().mailboxes.entry(name.clone()).or_default();
        LoopbackSubstrate {
            name,
            network: self.clone(),
        }
    }

    /// Datagrams delivered to `name` and not yet polled.
    pub fn queued_datagrams(&self, name: &str) -> usize {
        self.lock().mailboxes.get(name).map_or(0, Mailbox::queued)
    }

    /// Datagrams held for `name` until it accepts their connection.
    pub fn held_datagrams(&self, name: &str) -> usize {
        self.lock()
            .mailboxes
            .get(name)
            .map_or(0, |m| m.held.values().map(Vec::len).sum())
    }

    /// Whether `name` has the connection to `peer` on `socket` open.
    pub fn is_open(&self, name: &str, peer: &str, socket: &SocketName) -> bool {
        self.lock()
            .mailboxes
            .get(name)
            .is_some_and(|m| m.open.contains(&(peer.to_string(), socket.clone())))
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One named endpoint on a [`LoopbackNetwork`].
#[derive(Debug, Clone)]
pub struct LoopbackSubstrate {
    name: LoopbackPeer,
    network: LoopbackNetwork,
}

impl LoopbackSubstrate {
    /// This endpoint's name, as seen by its peers.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The network this endpoint lives on.
    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }
}

impl Substrate for LoopbackSubstrate {
    type Peer = LoopbackPeer;

    fn send_datagram(
        &mut self,
        peer: &LoopbackPeer,
        socket: &SocketName,
        channel: ChannelIndex,
        _reliability: Reliability,
        data: &[u8],
    ) -> Result<(), SubstrateError> {
        let mut hub = self.network.lock();
        if data.len() > hub.max_datagram_size {
            return Err(SubstrateError::DatagramTooLarge {
                len: data.len(),
                max: hub.max_datagram_size,
            });
        }

        hub.mailboxes
            .entry(self.name.clone())
            .or_default()
            .open
            .insert((peer.clone(), socket.clone()));

        let recipient = hub.mailboxes.entry(peer.clone()).or_default();
        let pair = (self.name.clone(), socket.clone());
        if recipient.open.contains(&pair) {
            recipient.enqueue(self.name.clone(), socket.clone(), channel, data.to_vec());
            return Ok(());
        }

        if !recipient.held.contains_key(&pair) {
            trace!(from = %self.name, to = %peer, socket = %socket, "connection request");
            recipient.notifications.push_back(Notification::ConnectionRequest {
                peer: self.name.clone(),
                socket: socket.clone(),
            });
        }
        recipient
            .held
            .entry(pair)
            .or_default()
            .push((channel, data.to_vec()));
        Ok(())
    }

    fn poll_datagram(&mut self, channel: ChannelIndex) -> Option<Datagram<LoopbackPeer>> {
        self.network
            .lock()
            .mailboxes
            .get_mut(&self.name)?
            .queues
            .get_mut(&channel)?
            .pop_front()
    }

    fn poll_notification(&mut self) -> Option<Notification<LoopbackPeer>> {
        self.network
            .lock()
            .mailboxes
            .get_mut(&self.name)?
            .notifications
            .pop_front()
    }

    fn accept_connection(
        &mut self,
        peer: &LoopbackPeer,
        socket: &SocketName,
    ) -> Result<(), SubstrateError> {
        let mut hub = self.network.lock();
        let mailbox = hub.mailboxes.entry(self.name.clone()).or_default();
        let pair = (peer.clone(), socket.clone());

        for (channel, data) in mailbox.held.remove(&pair).unwrap_or_default() {
            mailbox.enqueue(peer.clone(), socket.clone(), channel, data);
        }
        mailbox.open.insert(pair);
        Ok(())
    }

    fn close_connection(
        &mut self,
        peer: &LoopbackPeer,
        socket: &SocketName,
    ) -> Result<(), SubstrateError> {
        let mut hub = self.network.lock();

        let mut known = false;
        if let Some(mailbox) = hub.mailboxes.get_mut(&self.name) {
            let pair = (peer.clone(), socket.clone());
            known |= mailbox.open.remove(&pair);
            known |= mailbox.held.remove(&pair).is_some();
            for queue in mailbox.queues.values_mut() {
                queue.retain(|d| &d.peer != peer || &d.socket != socket);
            }
        }

        if let Some(remote) = hub.mailboxes.get_mut(peer) {
            let pair = (self.name.clone(), socket.clone());
            remote.held.remove(&pair);
            if remote.open.remove(&pair) {
                known = true;
                remote.notifications.push_back(Notification::ConnectionClosed {
                    peer: self.name.clone(),
                    socket: socket.clone(),
                    reason: CloseReason::ClosedByPeer,
                });
            }
        }

        if known {
            Ok(())
        } else {
            Err(SubstrateError::NoSuchConnection)
        }
    }

    fn max_datagram_size(&self) -> usize {
        self.network.lock().max_datagram_size
    }
}
