//! Time units and clock helpers shared across the pipeline.
//!
//! Latency configuration and measurement are carried as signed nanosecond
//! counts (latency bounds may legitimately be negative), so this module
//! exposes an `i64`-based unit system rather than `std::time::Duration`.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Signed nanosecond count.
pub type Nanos = i64;

/// One microsecond in [`Nanos`].
pub const MICROSECOND: Nanos = 1_000;

/// One millisecond in [`Nanos`].
pub const MILLISECOND: Nanos = 1_000_000;

/// One second in [`Nanos`].
pub const SECOND: Nanos = 1_000_000_000;

/// Reads the wall clock as nanoseconds since the Unix epoch.
///
/// Used for capture timestamps and end-to-end latency. Never panics;
/// a clock set before the epoch reads as zero.
pub fn unix_now() -> Nanos {
    // ---
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as Nanos)
        .unwrap_or(0)
}

/// Converts a non-negative [`Nanos`] to a `Duration`, clamping negatives to zero.
pub fn nanos_to_duration(ns: Nanos) -> Duration {
    // ---
    Duration::from_nanos(ns.max(0) as u64)
}

/// Token-bucket limiter with one token per interval.
///
/// Guards diagnostic emission on hot paths so a persistent anomaly produces
/// one log line per interval instead of one per frame.
#[derive(Debug)]
pub struct RateLimiter {
    // ---
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    // ---
    /// Creates a limiter that allows one event per `interval`.
    pub fn new(interval: Duration) -> Self {
        // ---
        Self {
            interval,
            last: None,
        }
    }

    /// Returns `true` if an event is allowed now, consuming the token.
    ///
    /// The first call always succeeds.
    pub fn allow(&mut self) -> bool {
        // ---
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
