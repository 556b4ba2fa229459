//! Protocol constants.
//!
//! Wire values in this module are shared by both ends of a connection and
//! MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// FRAGMENT HEADER
// =============================================================================

/// Size of the message id field (LE32).
pub const MESSAGE_ID_SIZE: usize = 4;

/// Size of the fragment index field (LE32).
pub const FRAGMENT_INDEX_SIZE: usize = 4;

/// Size of the more-fragments flag.
pub const MORE_FRAGMENTS_SIZE: usize = 1;

/// Fragment header size (message id + fragment index + more-fragments flag).
pub const FRAGMENT_HEADER_SIZE: usize = MESSAGE_ID_SIZE + FRAGMENT_INDEX_SIZE + MORE_FRAGMENTS_SIZE;

/// Value of the more-fragments byte when further fragments follow.
pub const MORE_FRAGMENTS_SET: u8 = 1;

// =============================================================================
// CONTROL CHANNEL
// =============================================================================

/// Control datagrams are exactly one byte.
pub const CONTROL_MESSAGE_SIZE: usize = 1;

/// Control byte: connection request.
pub const CONTROL_CONNECT: u8 = 0;

/// Control byte: connection accepted.
pub const CONTROL_ACCEPT_CONNECT: u8 = 1;

/// Control byte: disconnect (also used to reject a request).
pub const CONTROL_DISCONNECT: u8 = 2;

// =============================================================================
// SUBSTRATE LIMITS
// =============================================================================

/// Maximum datagram size of the default relay substrate.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1170;

/// Default upper bound on fragments per message.
pub const DEFAULT_MAX_FRAGMENTS: usize = 55;

/// Highest channel count; the control channel index must still fit in a byte.
pub const MAX_DATA_CHANNELS: usize = u8::MAX as usize;

// =============================================================================
// TIMING
// =============================================================================

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(25);

/// Handshake timeouts shorter than this are raised to it.
pub const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default window during which inbound traffic is discarded after activation.
pub const DEFAULT_QUARANTINE: Duration = Duration::from_secs(2);

// =============================================================================
// SERVER
// =============================================================================

/// Default maximum number of concurrent connections on a server.
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// First connection id handed out by a server.
pub const FIRST_CONNECTION_ID: u32 = 1;

// =============================================================================
// SOCKET NAMES
// =============================================================================

/// Length of generated socket names.
pub const SOCKET_NAME_LEN: usize = 20;
