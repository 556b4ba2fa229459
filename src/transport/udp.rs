//! UDP datagram substrate.
//!
//! Runs the multiplexer over a single tokio [`UdpSocket`]. Every UDP
//! datagram carries a small envelope naming the channel and the socket:
//!
//! ```text
//! +------+---------+----------+-------------+---------+
//! | Kind | Channel | Name len | Socket name | Payload |
//! |  1B  |   1B    |    1B    |  0-255 B    |   ...   |
//! +------+---------+----------+-------------+---------+
//! ```
//!
//! UDP does not retransmit or reorder, so reliability hints are not honored.
//! Use it on links where loss is rare, or put a reliable substrate in its
//! place.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::core::constants::DEFAULT_MAX_DATAGRAM_SIZE;
use crate::core::{
    ChannelIndex, CloseReason, Datagram, Notification, Reliability, SocketName, Substrate,
    SubstrateError,
};

/// Receive buffer size.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65535;

/// Datagrams held per unaccepted connection request.
pub const MAX_HELD_PER_REQUEST: usize = 64;

const KIND_DATA: u8 = 0;
const KIND_CLOSE: u8 = 1;
const ENVELOPE_HEADER_SIZE: usize = 3;

type Pair = (SocketAddr, SocketName);

#[derive(Debug, PartialEq, Eq)]
struct Envelope<'a> {
    kind: u8,
    channel: ChannelIndex,
    socket: &'a str,
    payload: &'a [u8],
}

fn encode_envelope(
    kind: u8,
    channel: ChannelIndex,
    socket: &SocketName,
    payload: &[u8],
) -> Result<Vec<u8>, SubstrateError> {
    let name = socket.as_str().as_bytes();
    let name_len = u8::try_from(name.len())
        .map_err(|_| SubstrateError::SendFailed(format!("socket name too long: {}", name.len())))?;

    let mut buf = Vec::with_capacity(ENVELOPE_HEADER_SIZE + name.len() + payload.len());
    buf.push(kind);
    buf.push(channel);
    buf.push(name_len);
    buf.extend_from_slice(name);
    buf.extend_from_slice(payload);
    Ok(buf)
}

fn decode_envelope(data: &[u8]) -> Option<Envelope<'_>> {
    if data.len() < ENVELOPE_HEADER_SIZE {
        return None;
    }
    let name_end = ENVELOPE_HEADER_SIZE + data[2] as usize;
    let name = data.get(ENVELOPE_HEADER_SIZE..name_end)?;
    Some(Envelope {
        kind: data[0],
        channel: data[1],
        socket: std::str::from_utf8(name).ok()?,
        payload: &data[name_end..],
    })
}

/// [`Substrate`] over one UDP socket, with peers identified by address.
#[derive(Debug)]
pub struct UdpSubstrate {
    socket: UdpSocket,
    recv_buffer: Vec<u8>,
    max_datagram_size: usize,
    queues: HashMap<ChannelIndex, VecDeque<Datagram<SocketAddr>>>,
    open: HashSet<Pair>,
    held: HashMap<Pair, Vec<(ChannelIndex, Vec<u8>)>>,
    notifications: VecDeque<Notification<SocketAddr>>,
}

impl UdpSubstrate {
    /// Bind a new substrate to `addr`.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        socket.writable().await?;
        Ok(Self::from_socket(socket))
    }

    /// Wrap an existing socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            recv_buffer: vec![0u8; DEFAULT_RECV_BUFFER_SIZE],
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            queues: HashMap::new(),
            open: HashSet::new(),
            held: HashMap::new(),
            notifications: VecDeque::new(),
        }
    }

    /// Set the largest datagram handed to the multiplexer.
    pub fn set_max_datagram_size(&mut self, size: usize) {
        self.max_datagram_size = size;
    }

    /// Local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Wait until the socket has something to read.
    pub async fn readable(&self) -> io::Result<()> {
        self.socket.readable().await
    }

    fn receive_all(&mut self) {
        loop {
            match self.socket.try_recv_from(&mut self.recv_buffer) {
                Ok((len, from)) => {
                    let data = self.recv_buffer[..len].to_vec();
                    self.dispatch(from, &data);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "udp receive failed");
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, from: SocketAddr, data: &[u8]) {
        let Some(envelope) = decode_envelope(data) else {
            debug!(%from, len = data.len(), "dropping datagram without envelope");
            return;
        };
        let socket = SocketName::from(envelope.socket);
        let pair = (from, socket.clone());

        match envelope.kind {
            KIND_DATA => {
                if self.open.contains(&pair) {
                    self.queues
                        .entry(envelope.channel)
                        .or_default()
                        .push_back(Datagram {
                            peer: from,
                            socket,
                            data: envelope.payload.to_vec(),
                        });
                    return;
                }

                let held = self.held.entry(pair).or_default();
                if held.is_empty() {
                    trace!(%from, socket = %socket, "connection request");
                    self.notifications
                        .push_back(Notification::ConnectionRequest { peer: from, socket });
                }
                if held.len() < MAX_HELD_PER_REQUEST {
                    held.push((envelope.channel, envelope.payload.to_vec()));
                }
            }
            KIND_CLOSE => {
                self.held.remove(&pair);
                if self.open.remove(&pair) {
                    self.notifications.push_back(Notification::ConnectionClosed {
                        peer: from,
                        socket,
                        reason: CloseReason::ClosedByPeer,
                    });
                }
            }
            kind => debug!(%from, kind, "unknown envelope kind"),
        }
    }

    fn send_envelope(&self, peer: SocketAddr, envelope: &[u8]) -> Result<(), SubstrateError> {
        match self.socket.try_send_to(envelope, peer) {
            Ok(_) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                Err(SubstrateError::SendFailed("socket not writable".into()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Substrate for UdpSubstrate {
    type Peer = SocketAddr;

    fn send_datagram(
        &mut self,
        peer: &SocketAddr,
        socket: &SocketName,
        channel: ChannelIndex,
        _reliability: Reliability,
        data: &[u8],
    ) -> Result<(), SubstrateError> {
        if data.len() > self.max_datagram_size {
            return Err(SubstrateError::DatagramTooLarge {
                len: data.len(),
                max: self.max_datagram_size,
            });
        }

        let envelope = encode_envelope(KIND_DATA, channel, socket, data)?;
        self.open.insert((*peer, socket.clone()));
        self.send_envelope(*peer, &envelope)
    }

    fn poll_datagram(&mut self, channel: ChannelIndex) -> Option<Datagram<SocketAddr>> {
        self.receive_all();
        self.queues.get_mut(&channel)?.pop_front()
    }

    fn poll_notification(&mut self) -> Option<Notification<SocketAddr>> {
        self.receive_all();
        self.notifications.pop_front()
    }

    fn accept_connection(
        &mut self,
        peer: &SocketAddr,
        socket: &SocketName,
    ) -> Result<(), SubstrateError> {
        let pair = (*peer, socket.clone());
        for (channel, data) in self.held.remove(&pair).unwrap_or_default() {
            self.queues.entry(channel).or_default().push_back(Datagram {
                peer: *peer,
                socket: socket.clone(),
                data,
            });
        }
        self.open.insert(pair);
        Ok(())
    }

    fn close_connection(
        &mut self,
        peer: &SocketAddr,
        socket: &SocketName,
    ) -> Result<(), SubstrateError> {
        let pair = (*peer, socket.clone());
        let held = self.held.remove(&pair).is_some();
        let open = self.open.remove(&pair);
        for queue in self.queues.values_mut() {
            queue.retain(|d| &d.peer != peer || &d.socket != socket);
        }

        if !open && !held {
            return Err(SubstrateError::NoSuchConnection);
        }
        if open {
            let envelope = encode_envelope(KIND_CLOSE, 0, socket, &[])?;
            self.send_envelope(*peer, &envelope)?;
        }
        Ok(())
    }

    fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }
}
