//! Receiver top: configuration, the read loop, and shutdown.
//!
//! One `Receiver` owns the session router, the buffer pool, the mixer, and
//! the output clock. The audio thread calls [`Receiver::read`] for each
//! output frame; the network context feeds packets through the router
//! handle. `read` never fails for transient network or per-session
//! conditions; only programmer errors and closure reach the caller.

use crate::clock::OutputClock;
use crate::config::ReceiverConfig;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::mixer::Mixer;
use crate::pool::BufferPool;
use crate::router::SessionRouter;
use crate::stats::PipelineStats;
use rtp_mix_common::time::{nanos_to_duration, unix_now};
use rtp_mix_common::MetricsContext;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Interval of the periodic stats log line.
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// The realtime audio receive pipeline.
pub struct Receiver {
    // ---
    cfg: ReceiverConfig,
    router: Arc<SessionRouter>,
    stats: Arc<PipelineStats>,
    mixer: Mixer,
    clock: OutputClock,
    stream_pos: u32,
    closed: bool,
}

impl Receiver {
    // ---
    /// Validates the configuration and builds the pipeline.
    pub fn new(cfg: ReceiverConfig) -> Result<Self> {
        // ---
        Self::with_metrics(cfg, None)
    }

    /// Like [`Receiver::new`], mirroring events into Prometheus.
    pub fn with_metrics(cfg: ReceiverConfig, metrics: Option<MetricsContext>) -> Result<Self> {
        // ---
        cfg.validate()?;

        // One pooled frame buffer per possible session, plus headroom for
        // the caller-facing frame path.
        let pool = BufferPool::new(cfg.max_sessions + 2, cfg.max_frame_size, cfg.poisoning);
        let stats = Arc::new(PipelineStats::new(STATS_LOG_INTERVAL, metrics));
        let router = Arc::new(SessionRouter::new(cfg.clone(), pool, stats.clone()));

        info!(
            rate = cfg.output_sample_spec.sample_rate(),
            channels = cfg.output_sample_spec.num_channels(),
            clock = ?cfg.clock_source,
            "receiver ready"
        );

        Ok(Self {
            clock: OutputClock::new(cfg.clock_source),
            cfg,
            router,
            stats,
            mixer: Mixer::new(),
            stream_pos: 0,
            closed: false,
        })
    }

    /// Handle for the network context to feed packets through.
    pub fn router(&self) -> Arc<SessionRouter> {
        // ---
        self.router.clone()
    }

    /// Shared pipeline counters.
    pub fn stats(&self) -> Arc<PipelineStats> {
        // ---
        self.stats.clone()
    }

    /// Produces the next output frame.
    ///
    /// Always fills exactly `frame.num_samples()` samples, zero sessions
    /// included. With the internal clock this call paces itself; with the
    /// external clock it returns as soon as the frame is mixed.
    pub fn read(&mut self, frame: &mut Frame) -> Result<()> {
        // ---
        if self.closed {
            return Err(Error::Closed);
        }

        let channels = self.cfg.output_sample_spec.num_channels() as usize;
        let n = frame.num_samples();
        if n == 0 || n % channels != 0 {
            return Err(Error::InvalidArgument(format!(
                "frame size {n} is not a multiple of {channels} channels"
            )));
        }
        if n > self.cfg.max_frame_size {
            return Err(Error::InvalidArgument(format!(
                "frame size {n} exceeds max_frame_size {}",
                self.cfg.max_frame_size
            )));
        }

        let ticks = n / channels;
        let frame_duration =
            nanos_to_duration(self.cfg.output_sample_spec.frame_duration(ticks));
        self.clock.wait(frame_duration);

        let started = Instant::now();
        let now_ns = unix_now();

        self.router.prune(now_ns);
        let sessions = self.router.snapshot();

        let end_pos = self.stream_pos.wrapping_add(ticks as u32);
        self.mixer.mix(&sessions, frame, end_pos, now_ns);
        self.stream_pos = end_pos;

        for session in &sessions {
            self.stats
                .observe_latency(session.niq_latency_ns(), session.e2e_latency_ns());
        }
        self.stats.observe_read_duration(started.elapsed().as_secs_f64());
        self.stats.maybe_log(sessions.len());

        Ok(())
    }

    /// Stops the router intake and destroys every session. Further calls
    /// on this receiver fail with `Closed`.
    pub fn close(&mut self) {
        // ---
        if self.closed {
            return;
        }
        self.closed = true;
        self.router.shutdown();
        info!("receiver closed");
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        // ---
        self.close();
    }
}
