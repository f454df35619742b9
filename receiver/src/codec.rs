//! L16 payload decoding.
//!
//! The wire carries 16-bit big-endian signed PCM, channel-interleaved
//! (RFC 3551 L16). Decoding converts to `f32` in [-1.0, 1.0). The decoder
//! is range-addressable so a packet can be consumed across several frame
//! slots.

use rtp_mix_common::SampleSpec;

/// Bytes per sample per channel on the wire.
pub const BYTES_PER_SAMPLE: usize = 2;

/// L16 PCM payload decoder.
///
/// Stateless apart from the stream spec; the decode cursor lives in the
/// depacketizer, which addresses payload ranges by per-channel sample
/// offset.
#[derive(Debug, Clone, Copy)]
pub struct L16Decoder {
    // ---
    spec: SampleSpec,
}

impl L16Decoder {
    // ---
    pub fn new(spec: SampleSpec) -> Self {
        // ---
        Self { spec }
    }

    /// Per-channel sample count carried by `payload`.
    pub fn samples_in(&self, payload: &[u8]) -> usize {
        // ---
        payload.len() / (BYTES_PER_SAMPLE * self.spec.num_channels() as usize)
    }

    /// Decodes `out.len() / channels` per-channel samples starting at
    /// per-channel offset `offset` into interleaved `f32`.
    ///
    /// Returns the number of per-channel samples decoded, which is short
    /// only when the payload ends first.
    pub fn decode_range(&self, payload: &[u8], offset: usize, out: &mut [f32]) -> usize {
        // ---
        let ch = self.spec.num_channels() as usize;
        let avail = self.samples_in(payload).saturating_sub(offset);
        let want = out.len() / ch;
        let n = want.min(avail);

        let start = offset * ch * BYTES_PER_SAMPLE;
        for (i, v) in out[..n * ch].iter_mut().enumerate() {
            let b = start + i * BYTES_PER_SAMPLE;
            let raw = i16::from_be_bytes([payload[b], payload[b + 1]]);
            *v = raw as f32 / 32768.0;
        }
        n
    }
}

/// Encodes interleaved `f32` samples to L16 bytes (test and tool support).
pub fn encode_l16(samples: &[f32]) -> Vec<u8> {
    // ---
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &s in samples {
        let clamped = (s * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32);
        out.extend_from_slice(&(clamped as i16).to_be_bytes());
    }
    out
}
