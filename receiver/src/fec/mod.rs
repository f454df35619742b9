//! FEC reader: repairs loss across bounded block windows.
//!
//! Sits between the per-session queues and the depacketizer, yielding
//! source packets in order. With a repair scheme configured it gathers the
//! block's shards (received source packets plus repair payloads), rebuilds
//! missing packets when enough shards are present, and abandons holes once
//! the stream has moved past the block. Unrecovered gaps are handed
//! upstream as timestamp holes; nothing here blocks.

mod gf256;
mod rs8;

pub use rs8::ReedSolomon8;

use crate::config::{FecConfig, FecScheme};
use crate::packet::{Packet, PacketPtr};
use crate::queue::SortedQueue;
use rtp_mix_common::{media_ts_add, seq_add, seq_diff, FecBlockHeader, SampleSpec};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Ordered source-packet reader with block repair.
pub struct FecReader {
    // ---
    cfg: FecConfig,
    channels: u16,
    source_queue: Arc<SortedQueue>,
    repair_queue: Arc<SortedQueue>,

    /// In-order source packets not yet emitted.
    pending: VecDeque<PacketPtr>,

    /// Recently emitted source packets, kept as recovery reference.
    recent: VecDeque<PacketPtr>,

    /// Parsed repair payloads awaiting their blocks.
    repairs: Vec<(FecBlockHeader, Vec<u8>)>,

    next_seq: Option<u16>,
    recovered: u64,
    abandoned: u64,
}

impl FecReader {
    // ---
    pub fn new(
        cfg: FecConfig,
        spec: SampleSpec,
        source_queue: Arc<SortedQueue>,
        repair_queue: Arc<SortedQueue>,
    ) -> Self {
        // ---
        Self {
            cfg,
            channels: spec.num_channels(),
            source_queue,
            repair_queue,
            pending: VecDeque::new(),
            recent: VecDeque::new(),
            repairs: Vec::new(),
            next_seq: None,
            recovered: 0,
            abandoned: 0,
        }
    }

    /// Source packets reconstructed so far.
    pub fn recovered(&self) -> u64 {
        self.recovered
    }

    /// Sequence positions given up as unrecoverable.
    pub fn abandoned(&self) -> u64 {
        self.abandoned
    }

    /// Returns the next source packet in sequence order, or `None` when the
    /// stream has no packet to offer yet.
    pub fn read(&mut self) -> Option<PacketPtr> {
        // ---
        if self.cfg.scheme == FecScheme::None {
            return self.source_queue.pop_next();
        }

        self.drain();

        loop {
            let seq = match self.next_seq {
                None => {
                    let p = self.pending.pop_front()?;
                    self.next_seq = Some(seq_add(p.sequence(), 1));
                    self.remember(p.clone());
                    return Some(p);
                }
                Some(s) => s,
            };

            // Anything the cursor already passed is late.
            while let Some(front) = self.pending.front() {
                if seq_diff(front.sequence(), seq) < 0 {
                    self.pending.pop_front();
                } else {
                    break;
                }
            }

            match self.pending.front() {
                Some(front) if front.sequence() == seq => {
                    let p = self.pending.pop_front().unwrap();
                    self.next_seq = Some(seq_add(seq, 1));
                    self.remember(p.clone());
                    return Some(p);
                }
                Some(_) => {
                    // Hole at `seq` with newer data queued behind it.
                    if self.try_recover(seq) {
                        continue;
                    }
                    if self.should_wait(seq) {
                        return None;
                    }
                    self.abandoned += 1;
                    debug!(seq, "abandoning unrecoverable source packet");
                    self.next_seq = Some(seq_add(seq, 1));
                }
                None => {
                    // Nothing newer arrived; repair alone may still close
                    // out the tail of a block.
                    if self.try_recover(seq) {
                        continue;
                    }
                    return None;
                }
            }
        }
    }

    /// Moves queued packets into the window and parses repair headers.
    fn drain(&mut self) {
        // ---
        while let Some(p) = self.source_queue.pop_next() {
            self.insert_pending(p);
        }
        while let Some(p) = self.repair_queue.pop_next() {
            match FecBlockHeader::decode(p.payload()) {
                Ok((header, data)) => {
                    let dup = self.repairs.iter().any(|(h, _)| {
                        h.base_seq == header.base_seq && h.repair_index == header.repair_index
                    });
                    if !dup {
                        self.repairs.push((header, data.to_vec()));
                    }
                }
                Err(e) => debug!("discarding malformed repair packet: {e}"),
            }
        }

        // Repair state for blocks fully behind the cursor is dead weight.
        if let Some(seq) = self.next_seq {
            self.repairs
                .retain(|(h, _)| seq_diff(seq_add(h.base_seq, h.source_count as i16), seq) > 0);
        }
        let cap = self.cfg.max_blocks * self.cfg.block_repair_packets.max(1);
        while self.repairs.len() > cap {
            self.repairs.remove(0);
        }
    }

    /// Attempts to rebuild the block containing `seq`. Recovered packets
    /// land in `pending`; returns whether any did.
    fn try_recover(&mut self, seq: u16) -> bool {
        // ---
        let header = match self.find_block(seq) {
            Some(h) => h,
            None => return false,
        };
        let k = header.source_count as usize;
        let m = header.repair_count as usize;
        let codec = match ReedSolomon8::new(k, m) {
            Some(c) => c,
            None => return false,
        };

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; k + m];
        let mut template: Option<PacketPtr> = None;
        for p in self.recent.iter().chain(self.pending.iter()) {
            let off = seq_diff(p.sequence(), header.base_seq);
            if off >= 0 && (off as usize) < k {
                shards[off as usize] = Some(p.payload().to_vec());
                template = Some(p.clone());
            }
        }
        for (h, data) in &self.repairs {
            if h.base_seq == header.base_seq {
                shards[k + h.repair_index as usize] = Some(data.clone());
            }
        }

        let template = match template {
            Some(t) => t,
            None => return false,
        };
        let missing: Vec<usize> = (0..k).filter(|&j| shards[j].is_none()).collect();
        if missing.is_empty() {
            return false;
        }
        if shards.iter().filter(|s| s.is_some()).count() < k {
            return false;
        }
        if !codec.reconstruct(&mut shards) {
            return false;
        }

        let dur = template.duration();
        let mut recovered_any = false;
        for j in missing {
            let pkt_seq = seq_add(header.base_seq, j as i16);
            // Only resurrect positions the cursor has not passed.
            if seq_diff(pkt_seq, seq) < 0 {
                continue;
            }
            let payload = shards[j].take().unwrap();
            let begin = media_ts_add(header.base_ts, j as i32 * dur);
            let pkt = Packet::recovered(&template, pkt_seq, begin, payload, self.channels);
            self.insert_pending(pkt);
            self.recovered += 1;
            recovered_any = true;
        }
        if recovered_any {
            debug!(base_seq = header.base_seq, "recovered block loss");
        }
        recovered_any
    }

    /// Whether to keep holding a hole open for late repair traffic.
    fn should_wait(&self, seq: u16) -> bool {
        // ---
        let (expect, span) = match self.find_block(seq) {
            Some(h) => (h.repair_count as usize, h.source_count as usize),
            None => (
                self.cfg.block_repair_packets,
                self.cfg.block_source_packets,
            ),
        };

        let have = match self.find_block(seq) {
            Some(h) => self
                .repairs
                .iter()
                .filter(|(eh, _)| eh.base_seq == h.base_seq)
                .count(),
            None => 0,
        };
        if have >= expect {
            // Every repair packet arrived and the block is still short.
            return false;
        }

        // Repair packets trail their block; once the stream is a whole
        // block past the hole they are not coming.
        match self.pending.back() {
            Some(back) => {
                (seq_diff(back.sequence(), seq) as i32) <= (span + expect) as i32
            }
            None => true,
        }
    }

    fn find_block(&self, seq: u16) -> Option<FecBlockHeader> {
        // ---
        self.repairs
            .iter()
            .map(|(h, _)| *h)
            .find(|h| {
                let off = seq_diff(seq, h.base_seq);
                off >= 0 && (off as u16) < h.source_count as u16
            })
    }

    fn insert_pending(&mut self, packet: PacketPtr) {
        // ---
        let mut pos = self.pending.len();
        for existing in self.pending.iter().rev() {
            let cmp = seq_diff(packet.sequence(), existing.sequence());
            if cmp == 0 {
                return; // duplicate
            }
            if cmp > 0 {
                break;
            }
            pos -= 1;
        }
        self.pending.insert(pos, packet);
    }

    fn remember(&mut self, packet: PacketPtr) {
        // ---
        self.recent.push_back(packet);
        let bound = 2 * (self.cfg.block_source_packets + self.cfg.block_repair_packets).max(8);
        while self.recent.len() > bound {
            self.recent.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use rtp_mix_common::RtpPacket;
    use std::net::SocketAddr;

    const K: usize = 4;
    const M: usize = 2;

    fn addr() -> SocketAddr {
        "127.0.0.1:5004".parse().unwrap()
    }

    fn spec() -> SampleSpec {
        SampleSpec::new(48000, 1)
    }

    fn cfg(scheme: FecScheme) -> FecConfig {
        // ---
        FecConfig {
            scheme,
            block_source_packets: K,
            block_repair_packets: M,
            max_blocks: 8,
        }
    }

    fn source_payload(seq: u16) -> Vec<u8> {
        // ---
        (0..40).map(|b| (seq as usize * 13 + b) as u8).collect()
    }

    fn source_packet(seq: u16) -> PacketPtr {
        // ---
        let wire = RtpPacket::new(10, seq, seq as u32 * 20, 0x1, source_payload(seq));
        Packet::from_source(&wire, addr(), &spec())
    }

    fn repair_packets(base_seq: u16) -> Vec<PacketPtr> {
        // ---
        let codec = ReedSolomon8::new(K, M).unwrap();
        let source: Vec<Vec<u8>> = (0..K as u16).map(|i| source_payload(base_seq + i)).collect();
        let refs: Vec<&[u8]> = source.iter().map(|s| s.as_slice()).collect();
        let repair = codec.encode(&refs);

        repair
            .into_iter()
            .enumerate()
            .map(|(i, data)| {
                let header = FecBlockHeader {
                    base_seq,
                    base_ts: base_seq as u32 * 20,
                    source_count: K as u8,
                    repair_count: M as u8,
                    repair_index: i as u8,
                };
                let wire = RtpPacket::new(
                    109,
                    base_seq + K as u16 + i as u16,
                    base_seq as u32 * 20,
                    0x1,
                    header.encode(&data),
                );
                Packet::from_repair(&wire, addr())
            })
            .collect()
    }

    fn reader(scheme: FecScheme) -> (FecReader, Arc<SortedQueue>, Arc<SortedQueue>) {
        // ---
        let source = Arc::new(SortedQueue::new(64));
        let repair = Arc::new(SortedQueue::new(64));
        let reader = FecReader::new(cfg(scheme), spec(), source.clone(), repair.clone());
        (reader, source, repair)
    }

    #[test]
    fn passes_through_without_scheme() {
        // ---
        let (mut reader, source, _repair) = reader(FecScheme::None);
        source.insert(source_packet(0)).unwrap();
        source.insert(source_packet(1)).unwrap();

        assert_eq!(reader.read().unwrap().sequence(), 0);
        assert_eq!(reader.read().unwrap().sequence(), 1);
        assert!(reader.read().is_none());
    }

    #[test]
    fn emits_complete_block_in_order() {
        // ---
        let (mut reader, source, repair) = reader(FecScheme::ReedSolomon8);
        for seq in 0..K as u16 {
            source.insert(source_packet(seq)).unwrap();
        }
        for p in repair_packets(0) {
            repair.insert(p).unwrap();
        }

        for seq in 0..K as u16 {
            assert_eq!(reader.read().unwrap().sequence(), seq);
        }
        assert!(reader.read().is_none());
        assert_eq!(reader.recovered(), 0);
    }

    #[test]
    fn recovers_dropped_source_packet_bitwise() {
        // ---
        let (mut reader, source, repair) = reader(FecScheme::ReedSolomon8);
        for seq in 0..K as u16 {
            if seq != 2 {
                source.insert(source_packet(seq)).unwrap();
            }
        }
        for p in repair_packets(0) {
            repair.insert(p).unwrap();
        }

        let mut seen = Vec::new();
        while let Some(p) = reader.read() {
            seen.push((p.sequence(), p.payload().to_vec(), p.begin()));
        }

        assert_eq!(seen.len(), K);
        assert_eq!(seen[2].0, 2);
        assert_eq!(seen[2].1, source_payload(2));
        assert_eq!(seen[2].2, 40); // 2 packets * 20 samples
        assert_eq!(reader.recovered(), 1);
    }

    #[test]
    fn abandons_hole_once_stream_moves_past() {
        // ---
        let (mut reader, source, _repair) = reader(FecScheme::ReedSolomon8);
        // Packet 1 lost, no repair at all; feed two full blocks beyond it.
        for seq in 0..(3 * K as u16) {
            if seq != 1 {
                source.insert(source_packet(seq)).unwrap();
            }
        }

        let seqs: Vec<u16> = std::iter::from_fn(|| reader.read()).map(|p| p.sequence()).collect();
        assert!(!seqs.contains(&1));
        assert_eq!(seqs[0], 0);
        assert_eq!(seqs[1], 2);
        assert_eq!(reader.abandoned(), 1);
    }

    #[test]
    fn waits_for_repair_within_block_window() {
        // ---
        let (mut reader, source, repair) = reader(FecScheme::ReedSolomon8);
        source.insert(source_packet(0)).unwrap();
        // Packet 1 lost; rest of the block queued; repair not yet arrived.
        source.insert(source_packet(2)).unwrap();
        source.insert(source_packet(3)).unwrap();

        assert_eq!(reader.read().unwrap().sequence(), 0);
        assert!(reader.read().is_none()); // hole stays open

        for p in repair_packets(0) {
            repair.insert(p).unwrap();
        }
        assert_eq!(reader.read().unwrap().sequence(), 1);
        assert_eq!(reader.read().unwrap().sequence(), 2);
        assert_eq!(reader.read().unwrap().sequence(), 3);
        assert_eq!(reader.recovered(), 1);
    }

    #[test]
    fn repair_alone_completes_block_tail() {
        // ---
        let (mut reader, source, repair) = reader(FecScheme::ReedSolomon8);
        for seq in 0..(K as u16 - 1) {
            source.insert(source_packet(seq)).unwrap();
        }
        for p in repair_packets(0) {
            repair.insert(p).unwrap();
        }

        // Last packet of the block never arrives as source.
        let seqs: Vec<u16> = std::iter::from_fn(|| reader.read()).map(|p| p.sequence()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(reader.recovered(), 1);
    }
}
