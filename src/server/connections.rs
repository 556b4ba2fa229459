//! Server connection table.
//!
//! Maps peers to connection ids in both directions. For every live
//! connection `by_peer[p] == id` exactly when `by_id[id].peer == p`.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Instant;

use crate::core::{ConnectionId, SocketName};

/// One admitted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection<P> {
    /// Connection id.
    pub id: ConnectionId,
    /// Remote peer.
    pub peer: P,
    /// Socket the connection was admitted on.
    pub socket: SocketName,
    /// When the connection was admitted.
    pub admitted_at: Instant,
}

/// Bidirectional peer / id table.
#[derive(Debug)]
pub struct ConnectionTable<P> {
    by_peer: HashMap<P, ConnectionId>,
    by_id: HashMap<ConnectionId, Connection<P>>,
}

impl<P> Default for ConnectionTable<P> {
    fn default() -> Self {
        Self {
            by_peer: HashMap::new(),
            by_id: HashMap::new(),
        }
    }
}

impl<P> ConnectionTable<P>
where
    P: Clone + Eq + Hash + Debug,
{
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection, displacing any entry with the same id or peer.
    ///
    /// Returns the displaced entries.
    pub fn insert(&mut self, connection: Connection<P>) -> Vec<Connection<P>> {
        let mut displaced = Vec::new();
        if let Some(old) = self.remove_by_peer(&connection.peer) {
            displaced.push(old);
        }
        if let Some(old) = self.remove(connection.id) {
            displaced.push(old);
        }

        self.by_peer.insert(connection.peer.clone(), connection.id);
        self.by_id.insert(connection.id, connection);
        displaced
    }

    /// Connection by id.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection<P>> {
        self.by_id.get(&id)
    }

    /// Connection by peer.
    pub fn get_by_peer(&self, peer: &P) -> Option<&Connection<P>> {
        self.by_peer.get(peer).and_then(|id| self.by_id.get(id))
    }

    /// Id assigned to `peer`.
    pub fn id_of(&self, peer: &P) -> Option<ConnectionId> {
        self.by_peer.get(peer).copied()
    }

    /// Whether `id` is live.
    pub fn contains_id(&self, id: ConnectionId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Remove by id.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection<P>> {
        let connection = self.by_id.remove(&id)?;
        self.by_peer.remove(&connection.peer);
        Some(connection)
    }

    /// Remove by peer.
    pub fn remove_by_peer(&mut self, peer: &P) -> Option<Connection<P>> {
        let id = self.by_peer.remove(peer)?;
        self.by_id.remove(&id)
    }

    /// Remove every connection.
    pub fn drain(&mut self) -> Vec<Connection<P>> {
        self.by_peer.clear();
        let mut all: Vec<_> = self.by_id.drain().map(|(_, c)| c).collect();
        all.sort_by_key(|c| c.id);
        all
    }

    /// Live ids in ascending order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.by_id.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no connection is live.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
