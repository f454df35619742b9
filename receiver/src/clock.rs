//! Output clock gate.
//!
//! Internal mode paces `read` on the CPU clock with absolute deadlines, so
//! sleep jitter does not accumulate across frames. External mode is a
//! pass-through for callers that bring their own clock (sound card,
//! simulated time in tests).

use crate::config::ClockSource;
use std::time::{Duration, Instant};

/// Paces frame production according to the configured clock source.
#[derive(Debug)]
pub struct OutputClock {
    // ---
    source: ClockSource,
    next_deadline: Option<Instant>,
}

impl OutputClock {
    // ---
    pub fn new(source: ClockSource) -> Self {
        // ---
        Self {
            source,
            next_deadline: None,
        }
    }

    /// Blocks until the next output deadline, then advances it by
    /// `frame_duration`. External clock: returns immediately.
    pub fn wait(&mut self, frame_duration: Duration) {
        // ---
        if self.source == ClockSource::External {
            return;
        }

        let now = Instant::now();
        let deadline = *self.next_deadline.get_or_insert(now);

        if deadline > now {
            std::thread::sleep(deadline - now);
        } else if now.duration_since(deadline) > 10 * frame_duration {
            // Hopelessly behind (debugger pause, suspend): resync instead
            // of producing a burst of frames.
            self.next_deadline = Some(now);
        }

        *self.next_deadline.as_mut().unwrap() += frame_duration;
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn external_clock_never_blocks() {
        // ---
        let mut clock = OutputClock::new(ClockSource::External);
        let start = Instant::now();
        for _ in 0..100 {
            clock.wait(Duration::from_millis(10));
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn internal_clock_paces_frames() {
        // ---
        let mut clock = OutputClock::new(ClockSource::Internal);
        let start = Instant::now();
        for _ in 0..5 {
            clock.wait(Duration::from_millis(10));
        }
        let elapsed = start.elapsed();
        // First call is free; four paced intervals follow.
        assert!(elapsed >= Duration::from_millis(35), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(120), "elapsed {elapsed:?}");
    }

    #[test]
    fn deadlines_are_absolute_not_relative() {
        // ---
        let mut clock = OutputClock::new(ClockSource::Internal);
        clock.wait(Duration::from_millis(5));
        // Burn more than one frame of time; the pacer should not add a
        // full extra frame on top of the overrun.
        std::thread::sleep(Duration::from_millis(12));
        let start = Instant::now();
        clock.wait(Duration::from_millis(5));
        clock.wait(Duration::from_millis(5));
        assert!(start.elapsed() < Duration::from_millis(10));
    }
}
