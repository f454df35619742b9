//! Mixer: sums all live sessions into one output frame.
//!
//! Addition happens in PCM space with clamping; summing is commutative, so
//! session order is unobservable. A session that fails to read contributes
//! silence and is left for the router to prune. The mixer always delivers
//! a full frame, sessions or not.

use crate::frame::Frame;
use crate::session::Session;
use rtp_mix_common::time::Nanos;
use std::sync::Arc;

/// Drives all sessions for one output frame.
#[derive(Debug, Default)]
pub struct Mixer;

impl Mixer {
    // ---
    pub fn new() -> Self {
        // ---
        Self
    }

    /// Fills `frame` with the sum of all session streams, then lets every
    /// session's latency monitor observe the consumed position.
    pub fn mix(
        &mut self,
        sessions: &[Arc<Session>],
        frame: &mut Frame,
        stream_pos_end: u32,
        now_ns: Nanos,
    ) {
        // ---
        frame.fill_silence();

        for session in sessions {
            // A false return means the session went broken mid-read; its
            // contribution is already silence.
            let _ = session.read_into(frame);
        }

        for session in sessions {
            session.update(stream_pos_end, now_ns);
        }
    }
}
