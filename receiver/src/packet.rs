//! Accepted-packet record shared between the network and audio contexts.
//!
//! Once the router accepts a wire packet it becomes an immutable [`Packet`]
//! behind an `Arc`: the queues hold strong handles during residency and the
//! depacketizer reads payload bytes through the same handle.

use rtp_mix_common::time::Nanos;
use rtp_mix_common::{media_ts_add, media_ts_diff, MediaTs, MediaTsDiff, RtpPacket, SampleSpec};
use std::net::SocketAddr;
use std::sync::Arc;

/// Which per-session stream a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    // ---
    /// Media payload.
    Source,

    /// FEC repair payload.
    Repair,

    /// Control-plane signalling; keeps the session alive, carries no media.
    Control,
}

/// Immutable accepted packet.
#[derive(Debug)]
pub struct Packet {
    // ---
    source: SocketAddr,
    kind: StreamKind,
    sequence: u16,
    begin_ts: MediaTs,
    end_ts: MediaTs,
    capture_ns: Option<Nanos>,
    payload: Vec<u8>,
}

/// Shared handle to an accepted packet.
pub type PacketPtr = Arc<Packet>;

impl Packet {
    // ---
    /// Builds a source packet from a parsed wire packet.
    ///
    /// The end timestamp is derived from the payload length: L16 carries
    /// two bytes per sample across `channels` interleaved channels, and the
    /// media timestamp ticks once per per-channel sample.
    pub fn from_source(wire: &RtpPacket, src: SocketAddr, spec: &SampleSpec) -> PacketPtr {
        // ---
        let frames = wire.payload.len() / (2 * spec.num_channels() as usize);
        Arc::new(Self {
            source: src,
            kind: StreamKind::Source,
            sequence: wire.sequence,
            begin_ts: wire.timestamp,
            end_ts: media_ts_add(wire.timestamp, frames as MediaTsDiff),
            capture_ns: wire.capture_ns,
            payload: wire.payload.clone(),
        })
    }

    /// Builds a repair packet; its timestamps are the block base carried in
    /// the RTP header, used only for ordering and window expiry.
    pub fn from_repair(wire: &RtpPacket, src: SocketAddr) -> PacketPtr {
        // ---
        Arc::new(Self {
            source: src,
            kind: StreamKind::Repair,
            sequence: wire.sequence,
            begin_ts: wire.timestamp,
            end_ts: wire.timestamp,
            capture_ns: wire.capture_ns,
            payload: wire.payload.clone(),
        })
    }

    /// Builds a control packet; carries no media, only liveness.
    pub fn from_control(wire: &RtpPacket, src: SocketAddr) -> PacketPtr {
        // ---
        Arc::new(Self {
            source: src,
            kind: StreamKind::Control,
            sequence: wire.sequence,
            begin_ts: wire.timestamp,
            end_ts: wire.timestamp,
            capture_ns: wire.capture_ns,
            payload: wire.payload.clone(),
        })
    }

    /// Builds a recovered source packet from reconstructed payload bytes.
    pub fn recovered(
        template: &Packet,
        sequence: u16,
        begin_ts: MediaTs,
        payload: Vec<u8>,
        channels: u16,
    ) -> PacketPtr {
        // ---
        let frames = payload.len() / (2 * channels as usize);
        Arc::new(Self {
            source: template.source,
            kind: StreamKind::Source,
            sequence,
            begin_ts,
            end_ts: media_ts_add(begin_ts, frames as MediaTsDiff),
            capture_ns: None,
            payload,
        })
    }

    pub fn source(&self) -> SocketAddr {
        self.source
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Media timestamp of the first sample.
    pub fn begin(&self) -> MediaTs {
        self.begin_ts
    }

    /// Media timestamp one past the last sample.
    pub fn end(&self) -> MediaTs {
        self.end_ts
    }

    /// Per-channel sample count carried by this packet.
    pub fn duration(&self) -> MediaTsDiff {
        // ---
        media_ts_diff(self.end_ts, self.begin_ts)
    }

    pub fn capture_ns(&self) -> Option<Nanos> {
        self.capture_ns
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
