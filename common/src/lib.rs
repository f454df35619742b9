//! Shared library for the receive pipeline.
//!
//! This crate is the **public gateway** for all shared functionality:
//! wire formats, sample-rate and timestamp arithmetic, and observability.
//! Downstream crates should import through `rtp_mix_common::*` exports and
//! should not drill into internal module structure.

mod observability;
mod rtp;
mod sample_spec;
pub mod time;

pub use observability::{init_tracing, ColorWhen, MetricsContext, MetricsServerConfig};
pub use rtp::{FecBlockHeader, RtpPacket};
pub use sample_spec::{
    media_ts_add, media_ts_diff, seq_add, seq_diff, MediaTs, MediaTsDiff, SampleSpec,
};
pub use time::{Nanos, RateLimiter};
