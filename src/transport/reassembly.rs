//! Message reassembly.
//!
//! Fragments are grouped per `(peer, socket, channel)` and then per message
//! id. Each group keeps its fragments sorted by index regardless of arrival
//! order, so unordered channels work, and several messages can be in flight
//! on the same channel without blocking each other. Every socket is its own
//! substrate session, so a peer's old and new sockets never share groups.
//!
//! A group is complete when it holds fragments `0..=K` with no gaps and
//! fragment `K` has the more-fragments flag cleared. Completed groups are
//! removed immediately.
//!
//! # Memory Bounds
//!
//! Fragment indices at or above the configured fragment limit are refused.
//! A final fragment discards any buffered fragments above its index. Other
//! incomplete groups are only dropped by
//! [`ReassemblyTable::evict_older_than`] or
//! [`ReassemblyTable::remove_session`]; callers decide when to run either.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::packet::Fragment;
use crate::core::{ChannelIndex, SocketName};

/// A fully reassembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedMessage<P> {
    /// Sending peer.
    pub peer: P,
    /// Channel the message arrived on.
    pub channel: ChannelIndex,
    /// Message bytes in original order.
    pub data: Vec<u8>,
}

/// Outcome of inserting a fragment into a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Insert {
    Added,
    Duplicate,
    PastFinal,
    /// The final fragment was added and this many buffered fragments above
    /// it were discarded.
    Truncated(usize),
}

/// Fragments of one message, sorted by index.
#[derive(Debug)]
struct ReassemblyGroup {
    message_id: u32,
    fragments: Vec<Fragment>,
    first_seen: Instant,
}

impl ReassemblyGroup {
    fn new(message_id: u32, now: Instant) -> Self {
        Self {
            message_id,
            fragments: Vec::new(),
            first_seen: now,
        }
    }

    fn insert(&mut self, fragment: Fragment) -> Insert {
        if let Some(last) = self.fragments.last() {
            if last.is_last() && fragment.fragment_index > last.fragment_index {
                return Insert::PastFinal;
            }
        }

        match self
            .fragments
            .binary_search_by_key(&fragment.fragment_index, |f| f.fragment_index)
        {
            Ok(_) => Insert::Duplicate,
            Err(position) => {
                let is_last = fragment.is_last();
                self.fragments.insert(position, fragment);
                if is_last && position + 1 < self.fragments.len() {
                    let discarded = self.fragments.len() - position - 1;
                    self.fragments.truncate(position + 1);
                    return Insert::Truncated(discarded);
                }
                Insert::Added
            }
        }
    }

    /// Indices are unique and sorted, so they are exactly `0..len` when the
    /// highest one equals `len - 1`.
    fn is_complete(&self) -> bool {
        match self.fragments.last() {
            Some(last) => last.is_last() && last.fragment_index as usize + 1 == self.fragments.len(),
            None => false,
        }
    }

    fn assemble(self) -> Vec<u8> {
        let len = self.fragments.iter().map(|f| f.payload.len()).sum();
        let mut data = Vec::with_capacity(len);
        for fragment in self.fragments {
            data.extend_from_slice(&fragment.payload);
        }
        data
    }
}

type GroupKey<P> = (P, SocketName, ChannelIndex);

/// In-flight messages for every `(peer, socket, channel)`.
#[derive(Debug)]
pub struct ReassemblyTable<P> {
    groups: HashMap<GroupKey<P>, Vec<ReassemblyGroup>>,
    max_fragments: usize,
}

impl<P> ReassemblyTable<P>
where
    P: Clone + Eq + Hash + Debug,
{
    /// Create a table refusing fragment indices at or above `max_fragments`.
    pub fn new(max_fragments: usize) -> Self {
        Self {
            groups: HashMap::new(),
            max_fragments,
        }
    }

    /// Add a fragment, returning the message it completes, if any.
    pub fn ingest(
        &mut self,
        peer: P,
        socket: &SocketName,
        channel: ChannelIndex,
        fragment: Fragment,
        now: Instant,
    ) -> Option<CompletedMessage<P>> {
        if fragment.fragment_index as usize >= self.max_fragments {
            warn!(
                peer = ?peer,
                channel,
                message_id = fragment.message_id,
                fragment_index = fragment.fragment_index,
                "fragment index beyond limit, dropping"
            );
            return None;
        }

        let key = (peer, socket.clone(), channel);
        let groups = self.groups.entry(key.clone()).or_default();

        let position = match groups
            .iter()
            .position(|g| g.message_id == fragment.message_id)
        {
            Some(position) => position,
            None => {
                groups.push(ReassemblyGroup::new(fragment.message_id, now));
                groups.len() - 1
            }
        };

        let message_id = fragment.message_id;
        let fragment_index = fragment.fragment_index;
        match groups[position].insert(fragment) {
            Insert::Added => {}
            Insert::Truncated(discarded) => {
                warn!(
                    peer = ?key.0,
                    channel,
                    message_id,
                    fragment_index,
                    discarded,
                    "fragments past final fragment, dropping"
                );
            }
            Insert::Duplicate => {
                debug!(peer = ?key.0, channel, message_id, fragment_index, "duplicate fragment");
                return None;
            }
            Insert::PastFinal => {
                warn!(
                    peer = ?key.0,
                    channel,
                    message_id,
                    fragment_index,
                    "fragment after final fragment, dropping"
                );
                return None;
            }
        }

        if !groups[position].is_complete() {
            trace!(peer = ?key.0, channel, message_id, fragment_index, "fragment buffered");
            return None;
        }

        let group = groups.swap_remove(position);
        if groups.is_empty() {
            self.groups.remove(&key);
        }

        let (peer, _, channel) = key;
        Some(CompletedMessage {
            peer,
            channel,
            data: group.assemble(),
        })
    }

    /// Drop incomplete messages first seen at least `max_age` before `now`.
    ///
    /// Returns the number of messages dropped.
    pub fn evict_older_than(&mut self, now: Instant, max_age: Duration) -> usize {
        let mut evicted = 0;
        self.groups.retain(|(peer, _, channel), groups| {
            groups.retain(|group| {
                let stale = now.saturating_duration_since(group.first_seen) >= max_age;
                if stale {
                    debug!(
                        peer = ?peer,
                        channel = *channel,
                        message_id = group.message_id,
                        fragments = group.fragments.len(),
                        "evicting stale partial message"
                    );
                    evicted += 1;
                }
                !stale
            });
            !groups.is_empty()
        });
        evicted
    }

    /// Drop every incomplete message `peer` sent on `socket`.
    ///
    /// Returns the number of messages dropped.
    pub fn remove_session(&mut self, peer: &P, socket: &SocketName) -> usize {
        let mut removed = 0;
        self.groups.retain(|(p, s, _), groups| {
            if p == peer && s == socket {
                removed += groups.len();
                false
            } else {
                true
            }
        });
        removed
    }

    /// Number of incomplete messages.
    pub fn pending_messages(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Whether no message is in flight.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::packet::split_message;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;

    fn s1() -> SocketName {
        SocketName::from("S1")
    }

    fn frag(message_id: u32, index: u32, more: bool, payload: &[u8]) -> Fragment {
        Fragment::new(message_id, index, more, payload.to_vec())
    }

    #[test]
    fn test_single_fragment_message() {
        let mut table = ReassemblyTable::new(8);
        let now = Instant::now();

        let done = table.ingest("a", &s1(), 0, frag(1, 0, false, b"hello"), now).unwrap();
        assert_eq!(done.peer, "a");
        assert_eq!(done.channel, 0);
        assert_eq!(done.data, b"hello");
        assert!(table.is_empty());
    }

    #[test]
    fn test_out_of_order() {
        let mut table = ReassemblyTable::new(8);
        let now = Instant::now();

        assert!(table.ingest("a", &s1(), 1, frag(5, 2, false, b"C"), now).is_none());
        assert!(table.ingest("a", &s1(), 1, frag(5, 0, true, b"A"), now).is_none());
        let done = table.ingest("a", &s1(), 1, frag(5, 1, true, b"B"), now).unwrap();

        assert_eq!(done.data, b"ABC");
        assert!(table.is_empty());
    }

    #[test]
    fn test_partial_never_completes() {
        let mut table = ReassemblyTable::new(8);
        let now = Instant::now();

        assert!(table.ingest("a", &s1(), 0, frag(5, 0, true, b"A"), now).is_none());
        assert!(table.ingest("a", &s1(), 0, frag(5, 1, true, b"B"), now).is_none());
        assert_eq!(table.pending_messages(), 1);
    }

    #[test]
    fn test_final_fragment_with_gap() {
        let mut table = ReassemblyTable::new(8);
        let now = Instant::now();

        assert!(table.ingest("a", &s1(), 0, frag(5, 0, true, b"A"), now).is_none());
        assert!(table.ingest("a", &s1(), 0, frag(5, 2, false, b"C"), now).is_none());
        assert_eq!(table.pending_messages(), 1);

        assert_eq!(
            table.ingest("a", &s1(), 0, frag(5, 1, true, b"B"), now).unwrap().data,
            b"ABC"
        );
    }

    #[test]
    fn test_interleaved_messages() {
        let mut table = ReassemblyTable::new(8);
        let now = Instant::now();

        assert!(table.ingest("a", &s1(), 0, frag(1, 0, true, b"x1"), now).is_none());
        assert!(table.ingest("a", &s1(), 0, frag(2, 1, false, b"y2"), now).is_none());
        assert!(table.ingest("a", &s1(), 0, frag(2, 0, true, b"y1"), now).is_some_and(|m| m.data == b"y1y2"));
        assert_eq!(table.pending_messages(), 1);
        assert!(table.ingest("a", &s1(), 0, frag(1, 1, false, b"x2"), now).is_some_and(|m| m.data == b"x1x2"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_peers_and_channels_isolated() {
        let mut table = ReassemblyTable::new(8);
        let now = Instant::now();

        // Same message id on three different keys.
        assert!(table.ingest("a", &s1(), 0, frag(1, 0, true, b"a0"), now).is_none());
        assert!(table.ingest("b", &s1(), 0, frag(1, 0, true, b"b0"), now).is_none());
        assert!(table.ingest("a", &s1(), 1, frag(1, 0, true, b"c0"), now).is_none());
        assert_eq!(table.pending_messages(), 3);

        let done = table.ingest("b", &s1(), 0, frag(1, 1, false, b"b1"), now).unwrap();
        assert_eq!(done.peer, "b");
        assert_eq!(done.data, b"b0b1");
        assert_eq!(table.pending_messages(), 2);
    }

    #[test]
    fn test_duplicate_not_double_counted() {
        let mut table = ReassemblyTable::new(8);
        let now = Instant::now();

        assert!(table.ingest("a", &s1(), 0, frag(1, 0, true, b"A"), now).is_none());
        assert!(table.ingest("a", &s1(), 0, frag(1, 0, true, b"Z"), now).is_none());
        assert!(table.ingest("a", &s1(), 0, frag(1, 2, false, b"C"), now).is_none());

        let done = table.ingest("a", &s1(), 0, frag(1, 1, true, b"B"), now).unwrap();
        assert_eq!(done.data, b"ABC");
    }

    #[test]
    fn test_fragment_past_final_dropped() {
        let mut table = ReassemblyTable::new(8);
        let now = Instant::now();

        assert!(table.ingest("a", &s1(), 0, frag(1, 1, false, b"B"), now).is_none());
        assert!(table.ingest("a", &s1(), 0, frag(1, 2, true, b"C"), now).is_none());
        assert_eq!(table.ingest("a", &s1(), 0, frag(1, 0, true, b"A"), now).unwrap().data, b"AB");
    }

    #[test]
    fn test_fragment_limit() {
        let mut table = ReassemblyTable::new(2);
        let now = Instant::now();

        assert!(table.ingest("a", &s1(), 0, frag(1, 2, false, b"C"), now).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_any_permutation_round_trip() {
        let mut rng = StdRng::seed_from_u64(0x5EED);

        for len in [1usize, 7, 999, 1000, 1001, 2999, 3000, 4321] {
            for fragment_size in [1usize, 13, 500, 1000, 5000] {
                let data: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
                let mut fragments = split_message(42, &data, fragment_size);
                assert_eq!(fragments.len(), len.div_ceil(fragment_size));
                fragments.shuffle(&mut rng);

                let mut table = ReassemblyTable::new(fragments.len());
                let now = Instant::now();
                let total = fragments.len();
                let mut completed = Vec::new();
                for (i, fragment) in fragments.into_iter().enumerate() {
                    let result = table.ingest(1u64, &s1(), 0, fragment, now);
                    if i + 1 < total {
                        assert!(result.is_none(), "completed early: len={len} size={fragment_size}");
                    } else {
                        completed.push(result.unwrap());
                    }
                }

                assert_eq!(completed.len(), 1);
                assert_eq!(completed[0].data, data);
                assert!(table.is_empty(), "leaked group: len={len} size={fragment_size}");
            }
        }
    }

    #[test]
    fn test_evict_older_than() {
        let mut table = ReassemblyTable::new(8);
        let start = Instant::now();

        table.ingest("a", &s1(), 0, frag(1, 0, true, b"old"), start);
        table.ingest("a", &s1(), 0, frag(2, 0, true, b"new"), start + Duration::from_secs(4));

        assert_eq!(
            table.evict_older_than(start + Duration::from_secs(5), Duration::from_secs(3)),
            1
        );
        assert_eq!(table.pending_messages(), 1);

        assert_eq!(
            table.evict_older_than(start + Duration::from_secs(10), Duration::from_secs(3)),
            1
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_session() {
        let mut table = ReassemblyTable::new(8);
        let now = Instant::now();

        table.ingest("a", &s1(), 0, frag(1, 0, true, b"x"), now);
        table.ingest("a", &s1(), 1, frag(2, 0, true, b"x"), now);
        table.ingest("b", &s1(), 0, frag(1, 0, true, b"x"), now);

        assert_eq!(table.remove_session(&"a", &s1()), 2);
        assert_eq!(table.pending_messages(), 1);
        assert_eq!(table.remove_session(&"a", &s1()), 0);
    }

    #[test]
    fn test_sockets_isolated() {
        let mut table = ReassemblyTable::new(8);
        let now = Instant::now();
        let s2 = SocketName::from("S2");

        table.ingest("a", &s1(), 0, frag(9, 0, true, b"old"), now);
        table.ingest("a", &s2, 0, frag(9, 0, true, b"A"), now);
        assert_eq!(table.pending_messages(), 2);

        // Closing the old socket leaves the new one's message intact.
        assert_eq!(table.remove_session(&"a", &s1()), 1);
        let done = table.ingest("a", &s2, 0, frag(9, 1, false, b"B"), now).unwrap();
        assert_eq!(done.data, b"AB");
        assert!(table.is_empty());
    }

    #[test]
    fn test_final_fragment_discards_higher_indices() {
        let mut table = ReassemblyTable::new(8);
        let now = Instant::now();

        assert!(table.ingest("a", &s1(), 0, frag(1, 2, true, b"C"), now).is_none());
        assert!(table.ingest("a", &s1(), 0, frag(1, 1, false, b"B"), now).is_none());
        assert_eq!(table.ingest("a", &s1(), 0, frag(1, 0, true, b"A"), now).unwrap().data, b"AB");
        assert!(table.is_empty());
    }
}
