//! PCM frame exchanged between pipeline stages and the caller.

use rtp_mix_common::time::Nanos;

/// A frame of interleaved `f32` PCM samples.
///
/// `num_samples` counts individual values, so a stereo frame of N ticks
/// holds `2 * N` samples. The capture timestamp, when present, is the
/// sender wall clock of the first non-silence sample in the frame and
/// drives end-to-end latency measurement.
#[derive(Debug, Clone)]
pub struct Frame {
    // ---
    samples: Vec<f32>,
    capture_ns: Option<Nanos>,
}

impl Frame {
    // ---
    /// Creates a zeroed frame of `num_samples` values.
    pub fn new(num_samples: usize) -> Self {
        // ---
        Self {
            samples: vec![0.0; num_samples],
            capture_ns: None,
        }
    }

    /// Wraps an existing buffer (used with pooled allocations).
    pub fn from_buffer(samples: Vec<f32>) -> Self {
        // ---
        Self {
            samples,
            capture_ns: None,
        }
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn capture_ns(&self) -> Option<Nanos> {
        self.capture_ns
    }

    pub fn set_capture_ns(&mut self, capture_ns: Option<Nanos>) {
        self.capture_ns = capture_ns;
    }

    /// Zeroes the frame and clears the capture timestamp.
    pub fn fill_silence(&mut self) {
        // ---
        self.samples.fill(0.0);
        self.capture_ns = None;
    }

    /// Consumes the frame, returning its buffer (for pool release).
    pub fn into_buffer(self) -> Vec<f32> {
        self.samples
    }
}
