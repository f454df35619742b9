//! Depacketizer: ordered packets in, contiguous PCM out.
//!
//! Pulls source packets from the FEC reader and produces a gap-free sample
//! stream at the sender nominal rate. Media-timestamp ranges with no
//! decoded packet become zero samples (gap fill); the output position
//! `next_ts` is strictly monotonic once started. A queue that runs further
//! ahead of the output position than the session's latency ceiling marks
//! the stream broken, which the session treats as unrecoverable desync.

use crate::codec::L16Decoder;
use crate::fec::FecReader;
use crate::packet::PacketPtr;
use rtp_mix_common::time::Nanos;
use rtp_mix_common::{media_ts_add, media_ts_diff, MediaTs, MediaTsDiff, SampleSpec};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    // ---
    Unstarted,
    Running,
    Broken,
}

struct Cursor {
    // ---
    packet: PacketPtr,
    /// Per-channel sample offset into the packet payload.
    offset: usize,
}

/// Converts the per-session packet stream into PCM.
pub struct Depacketizer {
    // ---
    reader: FecReader,
    decoder: L16Decoder,
    spec: SampleSpec,
    state: State,
    next_ts: MediaTs,
    current: Option<Cursor>,

    /// Largest tolerated jump ahead of `next_ts`, in media-ts units.
    max_lead: MediaTsDiff,

    late_packets: u64,
    silence_samples: u64,
}

impl Depacketizer {
    // ---
    /// `max_latency` bounds how far the incoming stream may run ahead of
    /// the output position before the stream counts as desynced.
    pub fn new(reader: FecReader, spec: SampleSpec, max_latency: Nanos) -> Self {
        // ---
        Self {
            reader,
            decoder: L16Decoder::new(spec),
            spec,
            state: State::Unstarted,
            next_ts: 0,
            current: None,
            max_lead: spec.ns_to_media_ts(max_latency).max(1),
            late_packets: 0,
            silence_samples: 0,
        }
    }

    /// Whether the first sample has been produced.
    pub fn is_started(&self) -> bool {
        self.state != State::Unstarted
    }

    /// Whether the stream hit unrecoverable desync.
    pub fn is_broken(&self) -> bool {
        self.state == State::Broken
    }

    /// Next media timestamp expected on output. Meaningful once started.
    pub fn next_ts(&self) -> MediaTs {
        self.next_ts
    }

    /// Packets that arrived entirely behind the output position.
    pub fn late_packets(&self) -> u64 {
        self.late_packets
    }

    /// Zero samples synthesized for gaps so far.
    pub fn silence_samples(&self) -> u64 {
        self.silence_samples
    }

    pub fn fec_recovered(&self) -> u64 {
        self.reader.recovered()
    }

    pub fn fec_abandoned(&self) -> u64 {
        self.reader.abandoned()
    }

    /// Fills `out` (interleaved, length a multiple of the channel count)
    /// and returns the capture timestamp of the first non-silence sample
    /// contributed, if any.
    pub fn read(&mut self, out: &mut [f32]) -> Option<Nanos> {
        // ---
        out.fill(0.0);
        if self.state == State::Broken {
            return None;
        }

        let ch = self.spec.num_channels() as usize;
        let ticks = out.len() / ch;
        let mut filled = 0usize;
        let mut capture = None;

        while filled < ticks {
            if self.current.is_none() && !self.fetch_packet() {
                // No data: the rest of the slot is a gap.
                let rest = ticks - filled;
                if self.state == State::Running {
                    self.next_ts = media_ts_add(self.next_ts, rest as MediaTsDiff);
                    self.silence_samples += rest as u64;
                }
                break;
            }

            let cur = self.current.as_mut().unwrap();
            let payload_samples = self.decoder.samples_in(cur.packet.payload());
            let pkt_pos = media_ts_add(cur.packet.begin(), cur.offset as MediaTsDiff);
            let dist = media_ts_diff(pkt_pos, self.next_ts);

            if dist > 0 {
                // Hole before the packet: synthesize silence, keep the packet.
                let n = (dist as usize).min(ticks - filled);
                filled += n;
                self.next_ts = media_ts_add(self.next_ts, n as MediaTsDiff);
                self.silence_samples += n as u64;
                continue;
            }

            if dist < 0 {
                // Packet data behind the output position: discard that range.
                let skip = ((-dist) as usize).min(payload_samples - cur.offset);
                cur.offset += skip;
                if cur.offset >= payload_samples {
                    self.current = None;
                }
                continue;
            }

            let n = self
                .decoder
                .decode_range(cur.packet.payload(), cur.offset, &mut out[filled * ch..ticks * ch]);
            if n == 0 {
                self.current = None;
                continue;
            }

            if capture.is_none() {
                capture = cur
                    .packet
                    .capture_ns()
                    .map(|c| c + self.spec.samples_to_ns(cur.offset as i64));
            }

            cur.offset += n;
            filled += n;
            self.next_ts = media_ts_add(self.next_ts, n as MediaTsDiff);
            if cur.offset >= payload_samples {
                self.current = None;
            }
        }

        capture
    }

    /// Pulls the next usable packet into the cursor. Returns `false` when
    /// no packet is available.
    fn fetch_packet(&mut self) -> bool {
        // ---
        loop {
            let packet = match self.reader.read() {
                Some(p) => p,
                None => return false,
            };

            match self.state {
                State::Unstarted => {
                    self.next_ts = packet.begin();
                    self.state = State::Running;
                    debug!(ts = packet.begin(), "depacketizer started");
                }
                State::Running => {
                    let lead = media_ts_diff(packet.begin(), self.next_ts);
                    if lead > self.max_lead {
                        warn!(
                            lead,
                            max_lead = self.max_lead,
                            "incoming stream ran away from output position"
                        );
                        self.state = State::Broken;
                        return false;
                    }
                    // Entirely behind the output position: late, drop.
                    if media_ts_diff(packet.end(), self.next_ts) <= 0 {
                        self.late_packets += 1;
                        continue;
                    }
                }
                State::Broken => return false,
            }

            self.current = Some(Cursor { packet, offset: 0 });
            return true;
        }
    }
}
