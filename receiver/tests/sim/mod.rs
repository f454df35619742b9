#![allow(dead_code)] // each test binary uses a different slice of the simulator

//! In-process sender and network simulation for integration tests.
//!
//! Produces the wire packets a real sender would emit (L16 payloads,
//! capture timestamps, Reed-Solomon repair packets at block boundaries)
//! and optionally applies network impairments (loss, reordering) with a
//! seeded RNG for deterministic runs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use receiver::codec::encode_l16;
use receiver::fec::ReedSolomon8;
use rtp_mix_common::time::unix_now;
use rtp_mix_common::{FecBlockHeader, RtpPacket};

/// Payload type of the simulated source stream.
pub const PT_SOURCE: u8 = 10;

/// Payload type of the simulated repair stream.
pub const PT_REPAIR: u8 = 109;

/// Deterministic sample generator: a ramp whose value encodes the global
/// sample index exactly in L16 (multiples of 16 in i16 space).
pub fn ramp(index: u64) -> f32 {
    // ---
    ((index % 1000) * 16) as f32 / 32768.0
}

/// Simulated sender producing source (and optionally repair) packets.
pub struct SenderSim {
    // ---
    ssrc: u32,
    seq: u16,
    ts: u32,
    sample_index: u64,
    samples_per_packet: usize,
    channels: usize,
    with_capture: bool,
    fec: Option<FecState>,
}

struct FecState {
    // ---
    codec: ReedSolomon8,
    k: usize,
    m: usize,
    block: Vec<Vec<u8>>,
    block_base_seq: u16,
    block_base_ts: u32,
}

impl SenderSim {
    // ---
    pub fn new(samples_per_packet: usize, channels: usize) -> Self {
        // ---
        Self {
            ssrc: 0x5353_5243,
            seq: 0,
            ts: 0,
            sample_index: 0,
            samples_per_packet,
            channels,
            with_capture: false,
            fec: None,
        }
    }

    /// Attach capture wall-clock timestamps to source packets.
    pub fn with_capture(mut self) -> Self {
        // ---
        self.with_capture = true;
        self
    }

    /// Emit `m` repair packets after every `k` source packets.
    pub fn with_fec(mut self, k: usize, m: usize) -> Self {
        // ---
        self.fec = Some(FecState {
            codec: ReedSolomon8::new(k, m).expect("valid FEC geometry"),
            k,
            m,
            block: Vec::new(),
            block_base_seq: 0,
            block_base_ts: 0,
        });
        self
    }

    /// Produces the next source packet plus any repair packets that close
    /// out a block.
    pub fn next_packets(&mut self) -> Vec<RtpPacket> {
        // ---
        let samples: Vec<f32> = (0..self.samples_per_packet * self.channels)
            .map(|i| ramp(self.sample_index + (i / self.channels) as u64))
            .collect();
        let payload = encode_l16(&samples);

        let mut packet = RtpPacket::new(PT_SOURCE, self.seq, self.ts, self.ssrc, payload.clone());
        if self.with_capture {
            packet = packet.with_capture_ns(unix_now());
        }

        let mut out = Vec::with_capacity(1);

        if let Some(fec) = &mut self.fec {
            if fec.block.is_empty() {
                fec.block_base_seq = self.seq;
                fec.block_base_ts = self.ts;
            }
            fec.block.push(payload);
        }

        self.seq = self.seq.wrapping_add(1);
        self.ts = self.ts.wrapping_add(self.samples_per_packet as u32);
        self.sample_index += self.samples_per_packet as u64;
        out.push(packet);

        if let Some(fec) = &mut self.fec {
            if fec.block.len() == fec.k {
                let refs: Vec<&[u8]> = fec.block.iter().map(|p| p.as_slice()).collect();
                let repairs = fec.codec.encode(&refs);
                for (i, data) in repairs.into_iter().enumerate() {
                    let header = FecBlockHeader {
                        base_seq: fec.block_base_seq,
                        base_ts: fec.block_base_ts,
                        source_count: fec.k as u8,
                        repair_count: fec.m as u8,
                        repair_index: i as u8,
                    };
                    // Repair packets ride their own sequence space; only
                    // the block header matters to the receiver.
                    out.push(RtpPacket::new(
                        PT_REPAIR,
                        fec.block_base_seq.wrapping_add(i as u16),
                        fec.block_base_ts,
                        self.ssrc,
                        header.encode(&data),
                    ));
                }
                fec.block.clear();
            }
        }

        out
    }
}

/// Simulates lossy, reordering network conditions deterministically.
pub struct NetworkSim {
    // ---
    rng: StdRng,
    loss_rate: f64,
    reorder_rate: f64,
    held: Option<RtpPacket>,
    pub packets_dropped: u64,
    pub packets_reordered: u64,
}

impl NetworkSim {
    // ---
    pub fn new(seed: u64, loss_rate: f64, reorder_rate: f64) -> Self {
        // ---
        Self {
            rng: StdRng::seed_from_u64(seed),
            loss_rate,
            reorder_rate,
            held: None,
            packets_dropped: 0,
            packets_reordered: 0,
        }
    }

    /// Passes a packet through the simulated network, returning what comes
    /// out the far end (possibly nothing, possibly two packets swapped).
    pub fn transfer(&mut self, packet: RtpPacket) -> Vec<RtpPacket> {
        // ---
        if self.rng.gen_bool(self.loss_rate) {
            self.packets_dropped += 1;
            return self.held.take().into_iter().collect();
        }

        if let Some(held) = self.held.take() {
            // Deliver the delayed packet after its successor.
            self.packets_reordered += 1;
            return vec![packet, held];
        }

        if self.rng.gen_bool(self.reorder_rate) {
            self.held = Some(packet);
            return Vec::new();
        }

        vec![packet]
    }

    /// Flushes any packet still held back.
    pub fn flush(&mut self) -> Vec<RtpPacket> {
        // ---
        self.held.take().into_iter().collect()
    }
}
