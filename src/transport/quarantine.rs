//! Stale traffic suppression.
//!
//! - [`Quarantine`]: inbound traffic is discarded for a fixed window after
//!   an endpoint becomes active, so datagrams cached by the substrate from a
//!   previous session are never mistaken for new ones.
//! - [`DeadSockets`]: socket names whose session ended. Requests on them are
//!   refused so a closed session cannot be resurrected.
//! - [`PendingCloses`]: sockets to close one pump later, giving the substrate
//!   a tick to flush a DISCONNECT first.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::core::SocketName;

/// Discard window after (re)activation.
///
/// The window starts on the first pump after creation or
/// [`Quarantine::restart`].
#[derive(Debug, Clone)]
pub struct Quarantine {
    window: Duration,
    started: Option<Instant>,
}

impl Quarantine {
    /// Create a quarantine of length `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            started: None,
        }
    }

    /// Whether traffic at `now` falls inside the window. Starts the window
    /// if it is not running yet.
    pub fn is_active(&mut self, now: Instant) -> bool {
        let started = *self.started.get_or_insert(now);
        now.saturating_duration_since(started) < self.window
    }

    /// Start a fresh window on the next pump.
    pub fn restart(&mut self) {
        self.started = None;
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Socket names whose session has ended.
#[derive(Debug, Clone, Default)]
pub struct DeadSockets {
    names: HashSet<SocketName>,
}

impl DeadSockets {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `socket` as dead. Returns `false` if it already was.
    pub fn mark(&mut self, socket: SocketName) -> bool {
        self.names.insert(socket)
    }

    /// Whether `socket` is dead.
    pub fn contains(&self, socket: &SocketName) -> bool {
        self.names.contains(socket)
    }

    /// Number of dead sockets.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no socket is dead.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Sockets scheduled to close on a later tick.
#[derive(Debug, Clone)]
pub struct PendingCloses<P> {
    entries: Vec<(u64, P, SocketName)>,
}

impl<P> Default for PendingCloses<P> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<P> PendingCloses<P> {
    /// Create an empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Close `(peer, socket)` once tick `due` is reached.
    pub fn schedule(&mut self, due: u64, peer: P, socket: SocketName) {
        self.entries.push((due, peer, socket));
    }

    /// Remove and return every entry due at or before `tick`.
    pub fn take_due(&mut self, tick: u64) -> Vec<(P, SocketName)> {
        let mut due = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for (at, peer, socket) in self.entries.drain(..) {
            if at <= tick {
                due.push((peer, socket));
            } else {
                kept.push((at, peer, socket));
            }
        }
        self.entries = kept;
        due
    }

    /// Number of scheduled closes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
