//! Fragment encoding and decoding.
//!
//! Every datagram on a data channel carries one fragment of a message.
//!
//! Wire format (9-byte header):
//! ```text
//! +------------------+--------------------+----------+-------------+
//! | Message ID       | Fragment Index     | More     | Payload     |
//! | 4 bytes (LE32)   | 4 bytes (LE32)     | 1 byte   | rest        |
//! +------------------+--------------------+----------+-------------+
//! ```

use crate::core::PacketError;
use crate::core::constants::{FRAGMENT_HEADER_SIZE, MORE_FRAGMENTS_SET};

/// One piece of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Groups the fragments of one message.
    pub message_id: u32,
    /// Position of this fragment within its message.
    pub fragment_index: u32,
    /// Whether fragments with a higher index follow.
    pub more_fragments: bool,
    /// Fragment payload.
    pub payload: Vec<u8>,
}

impl Fragment {
    /// Create a fragment.
    pub fn new(message_id: u32, fragment_index: u32, more_fragments: bool, payload: Vec<u8>) -> Self {
        Self {
            message_id,
            fragment_index,
            more_fragments,
            payload,
        }
    }

    /// Whether this is the final fragment of its message.
    pub fn is_last(&self) -> bool {
        !self.more_fragments
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        FRAGMENT_HEADER_SIZE + self.payload.len()
    }

    /// Serialize to wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(
            self.message_id,
            self.fragment_index,
            self.more_fragments,
            &self.payload,
        )
    }

    /// Parse from wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        decode(bytes)
    }
}

/// Encode a fragment header followed by `payload`.
pub fn encode(message_id: u32, fragment_index: u32, more_fragments: bool, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAGMENT_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&message_id.to_le_bytes());
    buf.extend_from_slice(&fragment_index.to_le_bytes());
    buf.push(if more_fragments { MORE_FRAGMENTS_SET } else { 0 });
    buf.extend_from_slice(payload);
    buf
}

/// Decode a fragment.
///
/// Fails with [`PacketError::Malformed`] when `bytes` is shorter than the
/// header.
pub fn decode(bytes: &[u8]) -> Result<Fragment, PacketError> {
    if bytes.len() < FRAGMENT_HEADER_SIZE {
        return Err(PacketError::Malformed { len: bytes.len() });
    }

    let message_id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let fragment_index = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let more_fragments = bytes[8] == MORE_FRAGMENTS_SET;

    Ok(Fragment {
        message_id,
        fragment_index,
        more_fragments,
        payload: bytes[FRAGMENT_HEADER_SIZE..].to_vec(),
    })
}

/// Split `data` into fragments of at most `max_payload` bytes.
///
/// Produces `ceil(len / max_payload)` fragments; an empty message still
/// produces one (empty, final) fragment so that it is delivered.
///
/// # Panics
///
/// Panics if `max_payload` is zero.
pub fn split_message(message_id: u32, data: &[u8], max_payload: usize) -> Vec<Fragment> {
    assert!(max_payload > 0, "fragment payload size must be non-zero");

    if data.is_empty() {
        return vec![Fragment::new(message_id, 0, false, Vec::new())];
    }

    let count = data.len().div_ceil(max_payload);
    data.chunks(max_payload)
        .enumerate()
        .map(|(index, chunk)| {
            Fragment::new(message_id, index as u32, index + 1 < count, chunk.to_vec())
        })
        .collect()
}
