//! Pipeline counters and periodic reporting.
//!
//! Shared between the network context (router) and the audio context
//! (receiver), so everything is atomic. When a `MetricsContext` is
//! attached, events are mirrored into Prometheus at record time; the
//! periodic log line is rate-limited independently.

use rtp_mix_common::{MetricsContext, RateLimiter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// Counters for the whole receiver.
pub struct PipelineStats {
    // ---
    packets_received: AtomicU64,
    packets_invalid: AtomicU64,
    queue_overflows: AtomicU64,
    sessions_created: AtomicU64,
    sessions_destroyed: AtomicU64,
    sessions_rejected: AtomicU64,

    log_limiter: Mutex<RateLimiter>,
    metrics: Option<MetricsContext>,
}

impl PipelineStats {
    // ---
    /// `metrics` mirrors events into Prometheus when present.
    pub fn new(log_interval: Duration, metrics: Option<MetricsContext>) -> Self {
        // ---
        Self {
            packets_received: AtomicU64::new(0),
            packets_invalid: AtomicU64::new(0),
            queue_overflows: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            sessions_destroyed: AtomicU64::new(0),
            sessions_rejected: AtomicU64::new(0),
            log_limiter: Mutex::new(RateLimiter::new(log_interval)),
            metrics,
        }
    }

    pub fn record_packet(&self) {
        // ---
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.packets_received_total.inc();
        }
    }

    pub fn record_invalid_packet(&self) {
        // ---
        self.packets_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_overflow(&self) {
        // ---
        self.queue_overflows.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.queue_overflows_total.inc();
            m.packets_lost_total.inc();
        }
    }

    pub fn record_session_created(&self, live: usize) {
        // ---
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.sessions_created_total.inc();
            m.sessions_live.set(live as i64);
        }
    }

    pub fn record_session_destroyed(&self, live: usize) {
        // ---
        self.sessions_destroyed.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.sessions_destroyed_total.inc();
            m.sessions_live.set(live as i64);
        }
    }

    pub fn record_session_rejected(&self) {
        // ---
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn queue_overflows(&self) -> u64 {
        self.queue_overflows.load(Ordering::Relaxed)
    }

    pub fn sessions_created(&self) -> u64 {
        self.sessions_created.load(Ordering::Relaxed)
    }

    pub fn sessions_destroyed(&self) -> u64 {
        self.sessions_destroyed.load(Ordering::Relaxed)
    }

    pub fn sessions_rejected(&self) -> u64 {
        self.sessions_rejected.load(Ordering::Relaxed)
    }

    /// Mirrors per-frame latency observations into Prometheus.
    pub fn observe_latency(&self, niq_ns: Option<i64>, e2e_ns: Option<i64>) {
        // ---
        if let Some(m) = &self.metrics {
            if let Some(niq) = niq_ns {
                m.niq_latency_seconds.observe(niq as f64 / 1e9);
            }
            if let Some(e2e) = e2e_ns {
                m.e2e_latency_seconds.observe(e2e as f64 / 1e9);
            }
        }
    }

    /// Mirrors the wall time spent inside one read call.
    pub fn observe_read_duration(&self, seconds: f64) {
        // ---
        if let Some(m) = &self.metrics {
            m.read_duration_seconds.observe(seconds);
        }
    }

    /// Emits the periodic stats line when the interval elapsed.
    pub fn maybe_log(&self, live_sessions: usize) {
        // ---
        if !self.log_limiter.lock().unwrap().allow() {
            return;
        }
        info!(
            "RX stats: {} pkts, {} invalid, {} overflows, sessions {} live / {} created / {} destroyed / {} rejected",
            self.packets_received.load(Ordering::Relaxed),
            self.packets_invalid.load(Ordering::Relaxed),
            self.queue_overflows.load(Ordering::Relaxed),
            live_sessions,
            self.sessions_created.load(Ordering::Relaxed),
            self.sessions_destroyed.load(Ordering::Relaxed),
            self.sessions_rejected.load(Ordering::Relaxed),
        );
    }
}
