//! Ring capture buffer
//!
//! An always-on recorder of the last N packets in both directions, kept
//! independently of whether a full recording is armed. Capturing every
//! packet unconditionally would grow without bound over a long session; the
//! ring trades completeness for a constant memory ceiling while staying
//! useful after an unexpected disconnect.

use crate::codec;
use crate::codec::payload::PayloadValue;
use crate::types::{Direction, PacketEntry, ProtocolState, SessionLog};

/// Default number of packets retained.
pub const DEFAULT_RING_CAPACITY: usize = 30;

/// One captured packet in the ring.
#[derive(Debug, Clone, PartialEq)]
pub struct RingEntry {
    pub name: String,
    pub state: ProtocolState,
    pub payload: PayloadValue,
    pub from_server: bool,
    pub timestamp_ms: u64,
}

/// Fixed-capacity overwrite-on-full packet trail.
///
/// `push` is O(1) and never blocks, grows, or fails; once full, the oldest
/// entry is silently overwritten.
pub struct RingCapture {
    slots: Vec<RingEntry>,
    capacity: usize,
    /// Index of the oldest entry once the ring is full.
    head: usize,
}

impl RingCapture {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            head: 0,
        }
    }

    /// Record a packet, overwriting the oldest entry when at capacity.
    pub fn push(&mut self, entry: RingEntry) {
        if self.slots.len() < self.capacity {
            self.slots.push(entry);
        } else {
            self.slots[self.head] = entry;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// Current occupied count (at most the capacity).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Entries oldest-to-newest, independent of the write position.
    pub fn snapshot(&self) -> Vec<RingEntry> {
        let mut out = Vec::with_capacity(self.slots.len());
        out.extend_from_slice(&self.slots[self.head..]);
        out.extend_from_slice(&self.slots[..self.head]);
        out
    }

    /// Render the current contents as a packets-only session log text.
    ///
    /// Available at any time, even outside an active recording; used to
    /// preserve a diagnostic trail before the ring is discarded.
    pub fn dump(&self, protocol_version: &str) -> String {
        let mut log = SessionLog::new(protocol_version);
        let mut seq: [u64; 2] = [0, 0];
        for entry in self.snapshot() {
            let direction = if entry.from_server {
                Direction::FromServer
            } else {
                Direction::FromClient
            };
            let slot = usize::from(!entry.from_server);
            log.entries.push(PacketEntry {
                name: entry.name,
                state: entry.state,
                direction,
                payload: entry.payload,
                sequence: seq[slot],
                timestamp_ms: entry.timestamp_ms,
                time_diff_ms: None,
                custom_channel: false,
            });
            seq[slot] += 1;
        }
        codec::serialize(&log)
    }
}

impl Default for RingCapture {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: u64) -> RingEntry {
        RingEntry {
            name: format!("packet_{n}"),
            state: ProtocolState::Play,
            payload: PayloadValue::Null,
            from_server: n % 2 == 0,
            timestamp_ms: n,
        }
    }

    #[test]
    fn test_fills_up_to_capacity() {
        let mut ring = RingCapture::new(4);
        for i in 0..3 {
            ring.push(entry(i));
        }
        assert_eq!(ring.len(), 3);
        let snap = ring.snapshot();
        assert_eq!(snap[0].name, "packet_0");
        assert_eq!(snap[2].name, "packet_2");
    }

    #[test]
    fn test_overwrites_oldest_when_full() {
        let mut ring = RingCapture::new(4);
        // capacity + k pushes keep exactly `capacity` newest, oldest-first
        for i in 0..10 {
            ring.push(entry(i));
        }
        assert_eq!(ring.len(), 4);
        let names: Vec<_> = ring.snapshot().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["packet_6", "packet_7", "packet_8", "packet_9"]);
    }

    #[test]
    fn test_snapshot_at_exact_capacity() {
        let mut ring = RingCapture::new(3);
        for i in 0..3 {
            ring.push(entry(i));
        }
        let names: Vec<_> = ring.snapshot().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["packet_0", "packet_1", "packet_2"]);
    }

    #[test]
    fn test_dump_parses_back() {
        let mut ring = RingCapture::new(8);
        for i in 0..5 {
            ring.push(entry(i));
        }
        let text = ring.dump("1.21.4");
        let log = codec::parse(&text).unwrap();
        assert_eq!(log.entries.len(), 5);
        assert_eq!(log.header.protocol_version, "1.21.4");
        // Per-direction sequences restart from zero.
        assert_eq!(log.entries[0].sequence, 0);
        assert_eq!(log.entries[1].sequence, 0);
        assert_eq!(log.entries[2].sequence, 1);
    }
}
