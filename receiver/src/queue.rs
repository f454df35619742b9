//! Bounded sorted packet queue, one per session per stream kind.
//!
//! Single producer (network context) and single consumer (audio context)
//! share the queue through a short internal critical section. Packets are
//! kept ordered by wrap-safe (media timestamp, sequence); exact duplicates
//! are dropped silently; overflow evicts the oldest entry rather than
//! blocking the producer.

use crate::packet::PacketPtr;
use rtp_mix_common::{media_ts_diff, seq_diff, MediaTs};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// Insertion failed because the owning session was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

/// What happened to an inserted packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    // ---
    /// Packet queued in order.
    Queued,

    /// Exact duplicate of a queued packet; dropped.
    Duplicate,

    /// Queued, but the oldest entry was evicted to make room.
    Evicted,
}

#[derive(Debug)]
struct Inner {
    // ---
    packets: VecDeque<PacketPtr>,
    latest_end: Option<MediaTs>,
    closed: bool,
    overflows: u64,
}

/// Sorted, bounded, wrap-aware packet queue.
#[derive(Debug)]
pub struct SortedQueue {
    // ---
    inner: Mutex<Inner>,
    capacity: usize,
}

impl SortedQueue {
    // ---
    /// Creates a queue holding at most `capacity` packets.
    pub fn new(capacity: usize) -> Self {
        // ---
        Self {
            inner: Mutex::new(Inner {
                packets: VecDeque::with_capacity(capacity.min(64)),
                latest_end: None,
                closed: false,
                overflows: 0,
            }),
            capacity,
        }
    }

    /// Inserts a packet in order.
    ///
    /// Ordering key is (begin timestamp, sequence) under wrap-safe
    /// comparison. Most traffic arrives nearly in order, so the insert
    /// position is searched from the tail.
    pub fn insert(&self, packet: PacketPtr) -> Result<InsertOutcome, QueueClosed> {
        // ---
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(QueueClosed);
        }

        // Find the first position from the back whose packet sorts at or
        // before the new one.
        let mut pos = inner.packets.len();
        for existing in inner.packets.iter().rev() {
            let ts_cmp = media_ts_diff(packet.begin(), existing.begin());
            let cmp = if ts_cmp != 0 {
                ts_cmp
            } else {
                seq_diff(packet.sequence(), existing.sequence()) as i32
            };

            if cmp == 0 {
                debug!(
                    seq = packet.sequence(),
                    ts = packet.begin(),
                    "dropping duplicate packet"
                );
                return Ok(InsertOutcome::Duplicate);
            }
            if cmp > 0 {
                break;
            }
            pos -= 1;
        }

        inner.packets.insert(pos, packet.clone());

        match inner.latest_end {
            Some(latest) if media_ts_diff(packet.end(), latest) <= 0 => {}
            _ => inner.latest_end = Some(packet.end()),
        }

        if inner.packets.len() > self.capacity {
            inner.packets.pop_front();
            inner.overflows += 1;
            debug!(capacity = self.capacity, "queue overflow, evicted oldest");
            return Ok(InsertOutcome::Evicted);
        }

        Ok(InsertOutcome::Queued)
    }

    /// Removes and returns the earliest packet.
    pub fn pop_next(&self) -> Option<PacketPtr> {
        // ---
        self.inner.lock().unwrap().packets.pop_front()
    }

    /// End timestamp of the latest queued packet ever seen (O(1) cache).
    ///
    /// Survives pops: this is the queue tail the latency monitor measures
    /// against, not the currently buffered maximum.
    pub fn latest_end(&self) -> Option<MediaTs> {
        // ---
        self.inner.lock().unwrap().latest_end
    }

    pub fn len(&self) -> usize {
        // ---
        self.inner.lock().unwrap().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of oldest-entry evictions so far.
    pub fn overflows(&self) -> u64 {
        // ---
        self.inner.lock().unwrap().overflows
    }

    /// Closes the queue: subsequent inserts fail, remaining packets drop.
    pub fn close(&self) {
        // ---
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        inner.packets.clear();
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::packet::Packet;
    use rtp_mix_common::{RtpPacket, SampleSpec};
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:5004".parse().unwrap()
    }

    fn make_packet(seq: u16, ts: u32) -> PacketPtr {
        // ---
        let spec = SampleSpec::new(48000, 1);
        let wire = RtpPacket::new(10, seq, ts, 0x1, vec![0u8; 480 * 2]);
        Packet::from_source(&wire, addr(), &spec)
    }

    #[test]
    fn pops_in_timestamp_order() {
        // ---
        let queue = SortedQueue::new(10);
        queue.insert(make_packet(0, 0)).unwrap();
        queue.insert(make_packet(2, 960)).unwrap();
        queue.insert(make_packet(1, 480)).unwrap(); // out of order

        assert_eq!(queue.pop_next().unwrap().sequence(), 0);
        assert_eq!(queue.pop_next().unwrap().sequence(), 1);
        assert_eq!(queue.pop_next().unwrap().sequence(), 2);
        assert!(queue.pop_next().is_none());
    }

    #[test]
    fn orders_across_timestamp_wraparound() {
        // ---
        let queue = SortedQueue::new(10);
        queue.insert(make_packet(1, u32::MAX - 479)).unwrap();
        queue.insert(make_packet(2, 1)).unwrap();

        assert_eq!(queue.pop_next().unwrap().sequence(), 1);
        assert_eq!(queue.pop_next().unwrap().sequence(), 2);
    }

    #[test]
    fn exact_duplicate_is_dropped() {
        // ---
        let queue = SortedQueue::new(10);
        assert_eq!(queue.insert(make_packet(5, 2400)).unwrap(), InsertOutcome::Queued);
        assert_eq!(
            queue.insert(make_packet(5, 2400)).unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn overflow_evicts_oldest() {
        // ---
        let queue = SortedQueue::new(2);
        queue.insert(make_packet(0, 0)).unwrap();
        queue.insert(make_packet(1, 480)).unwrap();
        assert_eq!(
            queue.insert(make_packet(2, 960)).unwrap(),
            InsertOutcome::Evicted
        );

        assert_eq!(queue.overflows(), 1);
        assert_eq!(queue.pop_next().unwrap().sequence(), 1);
    }

    #[test]
    fn latest_end_survives_pops() {
        // ---
        let queue = SortedQueue::new(10);
        queue.insert(make_packet(0, 0)).unwrap();
        queue.insert(make_packet(1, 480)).unwrap();
        assert_eq!(queue.latest_end(), Some(960));

        queue.pop_next();
        queue.pop_next();
        assert_eq!(queue.latest_end(), Some(960));
    }

    #[test]
    fn closed_queue_rejects_inserts() {
        // ---
        let queue = SortedQueue::new(10);
        queue.insert(make_packet(0, 0)).unwrap();
        queue.close();

        assert_eq!(queue.insert(make_packet(1, 480)), Err(QueueClosed));
        assert!(queue.pop_next().is_none());
    }
}
