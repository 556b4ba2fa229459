//! Client handshake state machine.
//!
//! ```text
//!          initiate              ACCEPT_CONNECT
//!   Idle ───────────► Connecting ───────────────► Connected
//!                        │                           │
//!        deadline passes │ DISCONNECT / closed       │ DISCONNECT / closed / close()
//!                        ▼                           ▼
//!                   Disconnected ◄──────────────────-┘
//! ```
//!
//! The connect timeout is a deadline checked on every pump. Whichever of
//! ACCEPT_CONNECT and the deadline is observed first wins; the other finds
//! the phase already changed and does nothing. Every transition reports its
//! events exactly once.

use std::time::{Duration, Instant};

/// Handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// No attempt started.
    Idle,
    /// CONNECT sent, waiting for ACCEPT_CONNECT.
    Connecting {
        /// When the attempt fails.
        deadline: Instant,
    },
    /// Connection established.
    Connected,
    /// Terminal. A new attempt starts from [`Handshake::reset`].
    Disconnected,
}

/// Events produced by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// ACCEPT_CONNECT arrived in time.
    Connected,
    /// The attempt failed before a connection was established.
    ConnectionFailed,
    /// The connection is gone.
    Disconnected,
}

/// Client side of the CONNECT / ACCEPT_CONNECT / DISCONNECT exchange.
#[derive(Debug, Clone)]
pub struct Handshake {
    phase: HandshakePhase,
    error: bool,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// Create an idle handshake.
    pub fn new() -> Self {
        Self {
            phase: HandshakePhase::Idle,
            error: false,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.phase == HandshakePhase::Connected
    }

    /// Whether an attempt is waiting for ACCEPT_CONNECT.
    pub fn is_connecting(&self) -> bool {
        matches!(self.phase, HandshakePhase::Connecting { .. })
    }

    /// Whether the last attempt failed.
    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Pending deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            HandshakePhase::Connecting { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// `Idle -> Connecting`. Returns `false` in any other phase.
    ///
    /// The caller sends CONNECT when this returns `true`.
    pub fn initiate(&mut self, now: Instant, timeout: Duration) -> bool {
        if self.phase != HandshakePhase::Idle {
            return false;
        }
        self.phase = HandshakePhase::Connecting {
            deadline: now + timeout,
        };
        true
    }

    /// ACCEPT_CONNECT received.
    pub fn on_accept(&mut self) -> Vec<HandshakeEvent> {
        match self.phase {
            HandshakePhase::Connecting { .. } => {
                self.phase = HandshakePhase::Connected;
                vec![HandshakeEvent::Connected]
            }
            _ => Vec::new(),
        }
    }

    /// DISCONNECT received, or the substrate closed the connection.
    ///
    /// While connecting this is a failed attempt (the server rejected us).
    pub fn on_disconnect(&mut self) -> Vec<HandshakeEvent> {
        match self.phase {
            HandshakePhase::Connecting { .. } => self.fail(),
            HandshakePhase::Connected => {
                self.phase = HandshakePhase::Disconnected;
                vec![HandshakeEvent::Disconnected]
            }
            HandshakePhase::Idle | HandshakePhase::Disconnected => Vec::new(),
        }
    }

    /// Check the deadline.
    pub fn poll_timeout(&mut self, now: Instant) -> Vec<HandshakeEvent> {
        match self.phase {
            HandshakePhase::Connecting { deadline } if now >= deadline => self.fail(),
            _ => Vec::new(),
        }
    }

    /// Attempt failed before starting (e.g. CONNECT could not be sent).
    pub fn abort(&mut self) -> Vec<HandshakeEvent> {
        match self.phase {
            HandshakePhase::Idle | HandshakePhase::Connecting { .. } => self.fail(),
            _ => Vec::new(),
        }
    }

    /// Local teardown. Clears any pending deadline.
    ///
    /// Returns whether a connection or attempt existed, in which case the
    /// caller sends DISCONNECT. No events are produced.
    pub fn close(&mut self) -> bool {
        let active = matches!(
            self.phase,
            HandshakePhase::Connecting { .. } | HandshakePhase::Connected
        );
        self.phase = HandshakePhase::Disconnected;
        active
    }

    /// Return to `Idle` for a new attempt. Clears the error flag.
    pub fn reset(&mut self) {
        self.phase = HandshakePhase::Idle;
        self.error = false;
    }

    fn fail(&mut self) -> Vec<HandshakeEvent> {
        self.phase = HandshakePhase::Disconnected;
        self.error = true;
        vec![HandshakeEvent::ConnectionFailed, HandshakeEvent::Disconnected]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_handshake_lifecycle() {
        let now = Instant::now();
        let mut hs = Handshake::new();
        assert_eq!(hs.phase(), HandshakePhase::Idle);

        assert!(hs.initiate(now, TIMEOUT));
        assert!(hs.is_connecting());
        assert_eq!(hs.deadline(), Some(now + TIMEOUT));
        assert!(!hs.initiate(now, TIMEOUT));

        assert_eq!(hs.on_accept(), vec![HandshakeEvent::Connected]);
        assert!(hs.is_connected());
        assert_eq!(hs.deadline(), None);

        assert_eq!(hs.on_disconnect(), vec![HandshakeEvent::Disconnected]);
        assert_eq!(hs.phase(), HandshakePhase::Disconnected);
        assert!(!hs.has_error());
    }

    #[test]
    fn test_timeout_fires_once() {
        let now = Instant::now();
        let mut hs = Handshake::new();
        hs.initiate(now, TIMEOUT);

        assert!(hs.poll_timeout(now + Duration::from_secs(4)).is_empty());
        assert_eq!(
            hs.poll_timeout(now + TIMEOUT),
            vec![HandshakeEvent::ConnectionFailed, HandshakeEvent::Disconnected]
        );
        assert!(hs.has_error());

        // Nothing is reported twice.
        assert!(hs.poll_timeout(now + TIMEOUT * 2).is_empty());
        assert!(hs.on_disconnect().is_empty());
        assert!(hs.abort().is_empty());
    }

    #[test]
    fn test_accept_after_timeout_ignored() {
        let now = Instant::now();
        let mut hs = Handshake::new();
        hs.initiate(now, TIMEOUT);
        hs.poll_timeout(now + TIMEOUT);

        assert!(hs.on_accept().is_empty());
        assert_eq!(hs.phase(), HandshakePhase::Disconnected);
    }

    #[test]
    fn test_timeout_after_accept_ignored() {
        let now = Instant::now();
        let mut hs = Handshake::new();
        hs.initiate(now, TIMEOUT);
        hs.on_accept();

        assert!(hs.poll_timeout(now + TIMEOUT * 3).is_empty());
        assert!(hs.is_connected());
    }

    #[test]
    fn test_rejected_while_connecting() {
        let now = Instant::now();
        let mut hs = Handshake::new();
        hs.initiate(now, TIMEOUT);

        assert_eq!(
            hs.on_disconnect(),
            vec![HandshakeEvent::ConnectionFailed, HandshakeEvent::Disconnected]
        );
        assert!(hs.has_error());
    }

    #[test]
    fn test_close_cancels_deadline() {
        let now = Instant::now();
        let mut hs = Handshake::new();
        hs.initiate(now, TIMEOUT);

        assert!(hs.close());
        assert!(hs.poll_timeout(now + TIMEOUT).is_empty());
        assert!(!hs.has_error());
        assert!(!hs.close());
    }

    #[test]
    fn test_reset() {
        let now = Instant::now();
        let mut hs = Handshake::new();
        hs.initiate(now, TIMEOUT);
        hs.poll_timeout(now + TIMEOUT);
        assert!(hs.has_error());

        hs.reset();
        assert_eq!(hs.phase(), HandshakePhase::Idle);
        assert!(!hs.has_error());
        assert!(hs.initiate(now, TIMEOUT));
    }
}
