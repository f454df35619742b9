//! Receiver and per-session configuration.
//!
//! All latency knobs are signed nanoseconds; media-timestamp equivalents
//! are derived per session from the sender sample spec. Construction-time
//! validation happens once in [`ReceiverConfig::validate`]; a receiver
//! built from an invalid config reports the failure and stays unusable.

use crate::error::{Error, Result};
use rtp_mix_common::time::{Nanos, MILLISECOND, SECOND};
use rtp_mix_common::SampleSpec;

/// Default output and sender sample rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default channel count.
pub const DEFAULT_CHANNELS: u16 = 2;

/// Default latency control setpoint.
pub const DEFAULT_TARGET_LATENCY: Nanos = 200 * MILLISECOND;

/// Min latency bound as a multiple of target when not set explicitly.
const DEFAULT_MIN_LATENCY_FACTOR: Nanos = -1;

/// Max latency bound as a multiple of target when not set explicitly.
const DEFAULT_MAX_LATENCY_FACTOR: Nanos = 2;

/// Static RTP payload type for L16 stereo (RFC 3551).
pub const PAYLOAD_TYPE_L16_STEREO: u8 = 10;

/// Dynamic payload type carrying repair packets.
pub const PAYLOAD_TYPE_REPAIR: u8 = 109;

/// Whether `read` paces itself on the CPU clock or the caller paces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSource {
    // ---
    /// CPU pacer: `read` sleeps until the next output deadline.
    #[default]
    Internal,

    /// Pass-through: the caller provides the clock (e.g. a sound card).
    External,
}

/// Forward-error-correction scheme; must match the sender's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FecScheme {
    // ---
    /// No repair stream; losses become silence.
    #[default]
    None,

    /// Reed-Solomon erasure code over GF(2^8).
    ReedSolomon8,
}

/// Frequency-estimator controller gains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeProfile {
    // ---
    /// Fast convergence, more coefficient movement.
    Responsive,

    /// Middle ground.
    #[default]
    Balanced,

    /// Slow convergence, steadiest coefficient.
    Smooth,
}

/// FEC block geometry and scheme.
#[derive(Debug, Clone, Copy)]
pub struct FecConfig {
    // ---
    /// Scheme; `None` disables the repair path entirely.
    pub scheme: FecScheme,

    /// Source packets per block.
    pub block_source_packets: usize,

    /// Repair packets per block.
    pub block_repair_packets: usize,

    /// Concurrent blocks held in the repair window before the oldest is
    /// abandoned.
    pub max_blocks: usize,
}

impl Default for FecConfig {
    fn default() -> Self {
        // ---
        Self {
            scheme: FecScheme::None,
            block_source_packets: 8,
            block_repair_packets: 2,
            max_blocks: 32,
        }
    }
}

/// Per-session parameters, applied to every session the router creates.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    // ---
    /// Setpoint for the latency control loop.
    pub target_latency: Nanos,

    /// Hard lower latency bound; violation tears down the session.
    pub min_latency: Nanos,

    /// Hard upper latency bound; violation tears down the session.
    pub max_latency: Nanos,

    /// Whether the min/max bounds are enforced at all.
    pub enforce_latency_bounds: bool,

    /// Whether rate adaptation (freq estimator -> resampler) runs.
    pub fe_enable: bool,

    /// Controller gain profile.
    pub fe_profile: FeProfile,

    /// Cadence of freq-estimator input, in nanoseconds of stream position.
    pub fe_update_interval: Nanos,

    /// Clamp half-width around 1.0 for the scaling coefficient.
    pub max_scaling_delta: f32,

    /// Sender-side sample spec (rate the media timestamps tick at).
    pub input_sample_spec: SampleSpec,

    /// RTP payload type of the source stream.
    pub payload_type: u8,

    /// RTP payload type of the repair stream.
    pub repair_payload_type: u8,

    /// FEC geometry.
    pub fec: FecConfig,

    /// Per-kind queue capacity in packets.
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        // ---
        Self {
            target_latency: DEFAULT_TARGET_LATENCY,
            min_latency: DEFAULT_TARGET_LATENCY * DEFAULT_MIN_LATENCY_FACTOR,
            max_latency: DEFAULT_TARGET_LATENCY * DEFAULT_MAX_LATENCY_FACTOR,
            enforce_latency_bounds: true,
            fe_enable: true,
            fe_profile: FeProfile::default(),
            fe_update_interval: 100 * MILLISECOND,
            max_scaling_delta: 0.005,
            input_sample_spec: SampleSpec::new(DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS),
            payload_type: PAYLOAD_TYPE_L16_STEREO,
            repair_payload_type: PAYLOAD_TYPE_REPAIR,
            fec: FecConfig::default(),
            queue_capacity: 256,
        }
    }
}

/// Receiver-wide parameters.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    // ---
    /// Output stream spec (`sample_rate`, `channels` knobs).
    pub output_sample_spec: SampleSpec,

    /// Output pacing mode.
    pub clock_source: ClockSource,

    /// Session eviction threshold: no packet for this long destroys it.
    pub idle_timeout: Nanos,

    /// Hard cap on live sessions; excess senders are dropped.
    pub max_sessions: usize,

    /// Largest accepted UDP payload, drives packet buffer sizing.
    pub max_packet_size: usize,

    /// Largest frame (in samples overall) the pool hands out.
    pub max_frame_size: usize,

    /// Fill released pooled buffers with a sentinel for debugging.
    pub poisoning: bool,

    /// Template for sessions the router creates.
    pub session: SessionConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        // ---
        Self {
            output_sample_spec: SampleSpec::new(DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS),
            clock_source: ClockSource::default(),
            idle_timeout: 5 * SECOND,
            max_sessions: 16,
            max_packet_size: 2048,
            max_frame_size: 8192,
            poisoning: false,
            session: SessionConfig::default(),
        }
    }
}

impl ReceiverConfig {
    // ---
    /// Checks bounds and consistency. Called once at construction.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.output_sample_spec.sample_rate() == 0 {
            return Err(Error::InvalidConfig("sample_rate must be nonzero".into()));
        }
        if self.output_sample_spec.num_channels() == 0 {
            return Err(Error::InvalidConfig("channels must be nonzero".into()));
        }
        if self.max_sessions == 0 {
            return Err(Error::InvalidConfig("max_sessions must be nonzero".into()));
        }
        if self.max_packet_size == 0 || self.max_frame_size == 0 {
            return Err(Error::InvalidConfig("pool sizes must be nonzero".into()));
        }
        if self.idle_timeout <= 0 {
            return Err(Error::InvalidConfig("idle_timeout must be positive".into()));
        }

        let s = &self.session;
        if s.input_sample_spec.sample_rate() == 0 || s.input_sample_spec.num_channels() == 0 {
            return Err(Error::InvalidConfig("input sample spec must be nonzero".into()));
        }
        if s.target_latency <= 0 {
            return Err(Error::InvalidConfig("target_latency must be positive".into()));
        }
        if s.enforce_latency_bounds
            && (s.target_latency < s.min_latency || s.target_latency > s.max_latency)
        {
            return Err(Error::InvalidConfig(format!(
                "target_latency {}ns outside [{}ns, {}ns]",
                s.target_latency, s.min_latency, s.max_latency
            )));
        }
        if s.fe_enable {
            if s.fe_update_interval <= 0 {
                return Err(Error::InvalidConfig(
                    "fe_update_interval must be positive".into(),
                ));
            }
            if !(s.max_scaling_delta > 0.0 && s.max_scaling_delta < 0.5) {
                return Err(Error::InvalidConfig(
                    "max_scaling_delta must be in (0, 0.5)".into(),
                ));
            }
        }
        if s.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue_capacity must be nonzero".into()));
        }

        let f = &s.fec;
        if f.scheme != FecScheme::None {
            if f.block_source_packets == 0 || f.block_repair_packets == 0 {
                return Err(Error::InvalidConfig("FEC block geometry must be nonzero".into()));
            }
            if f.block_source_packets + f.block_repair_packets > 255 {
                return Err(Error::InvalidConfig(
                    "FEC block exceeds GF(2^8) field size".into(),
                ));
            }
            if f.max_blocks == 0 {
                return Err(Error::InvalidConfig("FEC max_blocks must be nonzero".into()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn default_config_is_valid() {
        // ---
        assert!(ReceiverConfig::default().validate().is_ok());
    }

    #[test]
    fn default_latency_bounds_bracket_target() {
        // ---
        let s = SessionConfig::default();
        assert_eq!(s.min_latency, -s.target_latency);
        assert_eq!(s.max_latency, 2 * s.target_latency);
    }

    #[test]
    fn zero_sample_rate_is_rejected() {
        // ---
        let mut cfg = ReceiverConfig::default();
        cfg.output_sample_spec = SampleSpec::new(0, 2);
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn negative_target_latency_is_rejected() {
        // ---
        let mut cfg = ReceiverConfig::default();
        cfg.session.target_latency = -MILLISECOND;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn target_outside_bounds_is_rejected() {
        // ---
        let mut cfg = ReceiverConfig::default();
        cfg.session.max_latency = cfg.session.target_latency / 2;
        assert!(cfg.validate().is_err());

        cfg.session.enforce_latency_bounds = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn fe_interval_must_be_positive_when_enabled() {
        // ---
        let mut cfg = ReceiverConfig::default();
        cfg.session.fe_update_interval = 0;
        assert!(cfg.validate().is_err());

        cfg.session.fe_enable = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn oversized_fec_block_is_rejected() {
        // ---
        let mut cfg = ReceiverConfig::default();
        cfg.session.fec.scheme = FecScheme::ReedSolomon8;
        cfg.session.fec.block_source_packets = 250;
        cfg.session.fec.block_repair_packets = 10;
        assert!(cfg.validate().is_err());
    }
}
