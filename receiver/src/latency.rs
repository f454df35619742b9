//! Latency monitor: niq/e2e observation, bounds, and rate control.
//!
//! Runs once per output frame for each session. Network-in-queue latency
//! is the distance from the latest queued packet to the depacketizer
//! output position; end-to-end latency is wall clock from sender capture
//! to consumption. Out-of-bounds niq is fatal to the session. When rate
//! adaptation is on, the niq reading feeds the frequency estimator on a
//! fixed stream-position cadence and the resulting coefficient, clamped to
//! the configured delta around 1.0, is pushed to the resampler.

use crate::config::SessionConfig;
use crate::fe::FreqEstimator;
use rtp_mix_common::time::{nanos_to_duration, Nanos, SECOND};
use rtp_mix_common::{media_ts_diff, MediaTsDiff, RateLimiter, SampleSpec};
use tracing::{debug, warn};

/// Cap on latency report emission.
const LOG_INTERVAL: Nanos = 5 * SECOND;

/// The niq latency left the configured bounds; the session must go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfBounds;

/// Per-session latency monitor.
pub struct LatencyMonitor {
    // ---
    rate_limiter: RateLimiter,

    update_interval: u32,
    update_pos: u32,
    has_update_pos: bool,

    fe: Option<FreqEstimator>,
    freq_coeff: f32,

    niq_latency: MediaTsDiff,
    e2e_latency: Nanos,
    has_niq: bool,
    has_e2e: bool,

    target: MediaTsDiff,
    min: MediaTsDiff,
    max: MediaTsDiff,
    enforce_bounds: bool,
    max_delta: f32,

    input_spec: SampleSpec,
}

impl LatencyMonitor {
    // ---
    /// Config is validated before sessions exist; this constructor trusts it.
    pub fn new(cfg: &SessionConfig, output_spec: SampleSpec) -> Self {
        // ---
        let input_spec = cfg.input_sample_spec;
        let target = input_spec.ns_to_media_ts(cfg.target_latency);

        debug!(
            target_ticks = target,
            in_rate = input_spec.sample_rate(),
            out_rate = output_spec.sample_rate(),
            fe_enable = cfg.fe_enable,
            "latency monitor initialized"
        );

        Self {
            rate_limiter: RateLimiter::new(nanos_to_duration(LOG_INTERVAL)),
            update_interval: (output_spec.ns_to_media_ts(cfg.fe_update_interval).max(1)) as u32,
            update_pos: 0,
            has_update_pos: false,
            fe: cfg
                .fe_enable
                .then(|| FreqEstimator::new(cfg.fe_profile, target.max(0) as u32)),
            freq_coeff: 1.0,
            niq_latency: 0,
            e2e_latency: 0,
            has_niq: false,
            has_e2e: false,
            target,
            min: input_spec.ns_to_media_ts(cfg.min_latency),
            max: input_spec.ns_to_media_ts(cfg.max_latency),
            enforce_bounds: cfg.enforce_latency_bounds,
            max_delta: cfg.max_scaling_delta,
            input_spec,
        }
    }

    /// Records end-to-end latency from the capture timestamp of the frame
    /// just read, when the frame carries one.
    pub fn observe_capture(&mut self, capture_ns: Option<Nanos>, now_ns: Nanos) {
        // ---
        if let Some(capture) = capture_ns {
            if capture != 0 {
                self.e2e_latency = now_ns - capture;
                self.has_e2e = true;
            }
        }
    }

    /// Feeds the niq reading for the frame just consumed.
    ///
    /// `stream_pos` is the session's output position in output sample
    /// units. Returns the clamped coefficient to push to the resampler
    /// when rate adaptation produced a new one.
    pub fn update(
        &mut self,
        niq: Option<MediaTsDiff>,
        stream_pos: u32,
    ) -> Result<Option<f32>, OutOfBounds> {
        // ---
        let niq = match niq {
            Some(n) => n,
            None => return Ok(None),
        };
        self.niq_latency = niq;
        self.has_niq = true;

        if self.enforce_bounds && (niq < self.min || niq > self.max) {
            warn!(
                niq,
                min = self.min,
                max = self.max,
                "niq latency out of bounds"
            );
            return Err(OutOfBounds);
        }

        let mut push = None;
        if let Some(fe) = &mut self.fe {
            if !self.has_update_pos {
                self.has_update_pos = true;
                self.update_pos = stream_pos;
            }
            while media_ts_diff(stream_pos, self.update_pos) >= 0 {
                fe.update(niq.max(0) as u32);
                self.update_pos = self.update_pos.wrapping_add(self.update_interval);
            }

            let clamped = fe
                .freq_coeff()
                .clamp(1.0 - self.max_delta, 1.0 + self.max_delta);
            self.freq_coeff = clamped;
            push = Some(clamped);
        }

        self.report();
        Ok(push)
    }

    /// Latest niq latency in nanoseconds, if one was measured.
    pub fn niq_latency_ns(&self) -> Option<Nanos> {
        // ---
        self.has_niq
            .then(|| self.input_spec.media_ts_to_ns(self.niq_latency))
    }

    /// Latest e2e latency in nanoseconds, if one was measured.
    pub fn e2e_latency_ns(&self) -> Option<Nanos> {
        // ---
        self.has_e2e.then_some(self.e2e_latency)
    }

    /// Last coefficient pushed to the resampler.
    pub fn freq_coeff(&self) -> f32 {
        self.freq_coeff
    }

    fn report(&mut self) {
        // ---
        if !self.rate_limiter.allow() {
            return;
        }
        debug!(
            niq_ms = self.input_spec.media_ts_to_ns(self.niq_latency) as f64 / 1e6,
            e2e_ms = self.e2e_latency as f64 / 1e6,
            target_ms = self.input_spec.media_ts_to_ns(self.target) as f64 / 1e6,
            fe = self.freq_coeff,
            "latency report"
        );
    }
}
