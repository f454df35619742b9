//! Resampler reader: rate conversion with a runtime-retunable ratio.
//!
//! Linear-interpolation kernel sitting atop the depacketizer. The effective
//! input-per-output step is `base_ratio * scaling`, where the base ratio is
//! fixed by the sender/receiver rates and the scaling coefficient is
//! retuned by the latency monitor to absorb clock drift. A new coefficient
//! takes effect on the next read call, so the transient is bounded by one
//! frame.

use crate::depacketizer::Depacketizer;
use rtp_mix_common::time::Nanos;
use rtp_mix_common::SampleSpec;

/// Smallest scaling factor the kernel tolerates.
pub const MIN_SCALING: f32 = 0.5;

/// Largest scaling factor the kernel tolerates.
pub const MAX_SCALING: f32 = 2.0;

/// Input ticks fetched from the depacketizer per refill. Kept small so the
/// prefetch does not distort the niq latency reading.
const FETCH_TICKS: usize = 32;

/// PCM reader that converts the session stream to the output rate.
pub struct ResamplerReader {
    // ---
    depacketizer: Depacketizer,
    channels: usize,

    base_ratio: f64,
    scaling: f64,

    /// Fractional position between `hist` and `ahead`, in [0, 1).
    pos: f64,
    hist: Vec<f32>,
    ahead: Vec<f32>,
    primed: bool,

    chunk: Vec<f32>,
    chunk_ticks: usize,
    chunk_pos: usize,
    chunk_capture: Option<Nanos>,
}

impl ResamplerReader {
    // ---
    pub fn new(depacketizer: Depacketizer, input: SampleSpec, output: SampleSpec) -> Self {
        // ---
        let channels = output.num_channels() as usize;
        Self {
            depacketizer,
            channels,
            base_ratio: input.sample_rate() as f64 / output.sample_rate() as f64,
            scaling: 1.0,
            pos: 0.0,
            hist: vec![0.0; channels],
            ahead: vec![0.0; channels],
            primed: false,
            chunk: vec![0.0; FETCH_TICKS * channels],
            chunk_ticks: 0,
            chunk_pos: 0,
            chunk_capture: None,
        }
    }

    pub fn depacketizer(&self) -> &Depacketizer {
        &self.depacketizer
    }

    /// Retunes the drift coefficient. Rejects values the kernel cannot
    /// honor; on success the next read uses the new ratio.
    pub fn set_scaling(&mut self, scaling: f32) -> bool {
        // ---
        if !scaling.is_finite() || !(MIN_SCALING..=MAX_SCALING).contains(&scaling) {
            return false;
        }
        self.scaling = scaling as f64;
        true
    }

    pub fn scaling(&self) -> f32 {
        self.scaling as f32
    }

    /// Fills `out` at the output rate, pulling input as the ratio demands.
    /// Returns the capture timestamp of input consumed during this call.
    pub fn read(&mut self, out: &mut [f32]) -> Option<Nanos> {
        // ---
        self.chunk_capture = None;
        let step = self.base_ratio * self.scaling;
        let ticks = out.len() / self.channels;

        if !self.primed {
            self.advance_tick();
            self.advance_tick();
            self.primed = true;
        }

        for t in 0..ticks {
            while self.pos >= 1.0 {
                self.pos -= 1.0;
                self.advance_tick();
            }

            let frac = self.pos as f32;
            for c in 0..self.channels {
                out[t * self.channels + c] =
                    self.hist[c] + (self.ahead[c] - self.hist[c]) * frac;
            }
            self.pos += step;
        }

        self.chunk_capture
    }

    /// Shifts the lookahead tick into history and pulls the next input
    /// tick, refilling the chunk from the depacketizer as needed.
    fn advance_tick(&mut self) {
        // ---
        std::mem::swap(&mut self.hist, &mut self.ahead);

        if self.chunk_pos >= self.chunk_ticks {
            let capture = self.depacketizer.read(&mut self.chunk);
            if self.chunk_capture.is_none() {
                self.chunk_capture = capture;
            }
            self.chunk_ticks = self.chunk.len() / self.channels;
            self.chunk_pos = 0;
        }

        let start = self.chunk_pos * self.channels;
        self.ahead
            .copy_from_slice(&self.chunk[start..start + self.channels]);
        self.chunk_pos += 1;
    }
}
