//! Per-sender session: queues, FEC, depacketizer, resampler, monitor.
//!
//! The network context only touches the queues and the liveness stamp; all
//! pipeline state sits behind a mutex owned by the audio context. A broken
//! session keeps accepting the mixer's calls but contributes silence until
//! the router destroys it; the next packet from the same sender builds a
//! fresh one.

use crate::config::SessionConfig;
use crate::depacketizer::Depacketizer;
use crate::error::{Error, Result};
use crate::fec::FecReader;
use crate::frame::Frame;
use crate::latency::{LatencyMonitor, OutOfBounds};
use crate::packet::{PacketPtr, StreamKind};
use crate::pool::{BufferPool, PooledBuffer};
use crate::queue::{InsertOutcome, QueueClosed, SortedQueue};
use crate::resampler::ResamplerReader;
use rtp_mix_common::time::Nanos;
use rtp_mix_common::{media_ts_diff, MediaTsDiff, SampleSpec};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// PCM source for one session: the depacketizer directly when no rate
/// conversion is needed, otherwise the resampler on top of it.
enum FrameSource {
    // ---
    Plain(Depacketizer),
    Resampled(ResamplerReader),
}

impl FrameSource {
    // ---
    fn read(&mut self, out: &mut [f32]) -> Option<Nanos> {
        // ---
        match self {
            FrameSource::Plain(d) => d.read(out),
            FrameSource::Resampled(r) => r.read(out),
        }
    }

    fn depacketizer(&self) -> &Depacketizer {
        // ---
        match self {
            FrameSource::Plain(d) => d,
            FrameSource::Resampled(r) => r.depacketizer(),
        }
    }

    fn set_scaling(&mut self, scaling: f32) -> bool {
        // ---
        match self {
            // Without a resampler only the neutral coefficient is honorable.
            FrameSource::Plain(_) => scaling == 1.0,
            FrameSource::Resampled(r) => r.set_scaling(scaling),
        }
    }
}

struct Pipeline {
    // ---
    reader: FrameSource,
    monitor: LatencyMonitor,
    scratch: PooledBuffer,
    /// Capture timestamp from the last read, consumed by the next update.
    pending_capture: Option<Nanos>,
}

/// One sender's receive state.
pub struct Session {
    // ---
    key: SocketAddr,
    source_queue: Arc<SortedQueue>,
    repair_queue: Arc<SortedQueue>,
    last_packet: AtomicI64,
    broken: AtomicBool,
    pipeline: Mutex<Pipeline>,
}

impl Session {
    // ---
    /// Builds the pipeline for `key`. Fails only on pool exhaustion.
    pub fn new(
        key: SocketAddr,
        cfg: &SessionConfig,
        output_spec: SampleSpec,
        pool: &Arc<BufferPool>,
        now_ns: Nanos,
    ) -> Result<Arc<Self>> {
        // ---
        let scratch = pool.acquire().ok_or_else(|| {
            Error::AllocationFailed(format!("no pooled frame buffer for session {key}"))
        })?;

        let source_queue = Arc::new(SortedQueue::new(cfg.queue_capacity));
        let repair_queue = Arc::new(SortedQueue::new(cfg.queue_capacity));

        let fec = FecReader::new(
            cfg.fec,
            cfg.input_sample_spec,
            source_queue.clone(),
            repair_queue.clone(),
        );
        let desync_bound = cfg.max_latency.max(2 * cfg.target_latency);
        let depacketizer = Depacketizer::new(fec, cfg.input_sample_spec, desync_bound);

        let resampling = cfg.fe_enable
            || cfg.input_sample_spec.sample_rate() != output_spec.sample_rate();
        let reader = if resampling {
            FrameSource::Resampled(ResamplerReader::new(
                depacketizer,
                cfg.input_sample_spec,
                output_spec,
            ))
        } else {
            FrameSource::Plain(depacketizer)
        };

        Ok(Arc::new(Self {
            key,
            source_queue,
            repair_queue,
            last_packet: AtomicI64::new(now_ns),
            broken: AtomicBool::new(false),
            pipeline: Mutex::new(Pipeline {
                reader,
                monitor: LatencyMonitor::new(cfg, output_spec),
                scratch,
                pending_capture: None,
            }),
        }))
    }

    pub fn key(&self) -> SocketAddr {
        self.key
    }

    /// Network context: deliver a packet to the proper queue and stamp
    /// liveness. Control packets only stamp.
    pub fn route(&self, packet: PacketPtr, now_ns: Nanos) -> std::result::Result<InsertOutcome, QueueClosed> {
        // ---
        self.last_packet.store(now_ns, Ordering::Relaxed);
        match packet.kind() {
            StreamKind::Source => self.source_queue.insert(packet),
            StreamKind::Repair => self.repair_queue.insert(packet),
            StreamKind::Control => Ok(InsertOutcome::Queued),
        }
    }

    /// Audio context: read one frame's worth of PCM and mix it into `out`.
    ///
    /// Returns `false` when the session is broken and contributed silence.
    pub fn read_into(&self, out: &mut Frame) -> bool {
        // ---
        if self.broken.load(Ordering::Relaxed) {
            return false;
        }

        let mut guard = self.pipeline.lock().unwrap();
        let pipeline = &mut *guard;
        let n = out.num_samples();
        let scratch = &mut pipeline.scratch.as_mut_slice()[..n];

        let capture = pipeline.reader.read(scratch);
        if pipeline.reader.depacketizer().is_broken() {
            warn!(key = %self.key, "depacketizer desync, marking session for teardown");
            self.broken.store(true, Ordering::Relaxed);
            return false;
        }

        for (dst, &src) in out.samples_mut().iter_mut().zip(scratch.iter()) {
            *dst = (*dst + src).clamp(-1.0, 1.0);
        }
        if out.capture_ns().is_none() {
            out.set_capture_ns(capture);
        }

        pipeline.pending_capture = capture;
        true
    }

    /// Audio context: run the latency monitor against the just-consumed
    /// stream position.
    pub fn update(&self, stream_pos: u32, now_ns: Nanos) {
        // ---
        if self.broken.load(Ordering::Relaxed) {
            return;
        }

        let mut pipeline = self.pipeline.lock().unwrap();
        let capture = pipeline.pending_capture.take();
        pipeline.monitor.observe_capture(capture, now_ns);

        let niq = self.niq_reading(&pipeline);
        match pipeline.monitor.update(niq, stream_pos) {
            Ok(None) => {}
            Ok(Some(coeff)) => {
                if !pipeline.reader.set_scaling(coeff) {
                    warn!(key = %self.key, coeff, "resampler rejected scaling coefficient");
                    self.broken.store(true, Ordering::Relaxed);
                }
            }
            Err(OutOfBounds) => {
                self.broken.store(true, Ordering::Relaxed);
            }
        }
    }

    fn niq_reading(&self, pipeline: &Pipeline) -> Option<MediaTsDiff> {
        // ---
        let depacketizer = pipeline.reader.depacketizer();
        if !depacketizer.is_started() {
            return None;
        }
        self.source_queue
            .latest_end()
            .map(|tail| media_ts_diff(tail, depacketizer.next_ts()))
    }

    /// Whether the session reported an unrecoverable condition.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Relaxed)
    }

    /// Whether no packet arrived for `idle_timeout`.
    pub fn is_idle(&self, now_ns: Nanos, idle_timeout: Nanos) -> bool {
        // ---
        now_ns - self.last_packet.load(Ordering::Relaxed) > idle_timeout
    }

    /// Closes the queues; producers holding this session see `QueueClosed`.
    pub fn close(&self) {
        // ---
        debug!(key = %self.key, "closing session queues");
        self.source_queue.close();
        self.repair_queue.close();
    }

    /// Evictions recorded by this session's queues.
    pub fn queue_overflows(&self) -> u64 {
        // ---
        self.source_queue.overflows() + self.repair_queue.overflows()
    }

    /// Latest niq latency in nanoseconds, for stats and tests.
    pub fn niq_latency_ns(&self) -> Option<Nanos> {
        // ---
        self.pipeline.lock().unwrap().monitor.niq_latency_ns()
    }

    /// Latest e2e latency in nanoseconds, for stats and tests.
    pub fn e2e_latency_ns(&self) -> Option<Nanos> {
        // ---
        self.pipeline.lock().unwrap().monitor.e2e_latency_ns()
    }

    /// Last coefficient handed to the resampler.
    pub fn freq_coeff(&self) -> f32 {
        // ---
        self.pipeline.lock().unwrap().monitor.freq_coeff()
    }

    /// Source packets reconstructed by FEC.
    pub fn fec_recovered(&self) -> u64 {
        // ---
        self.pipeline
            .lock()
            .unwrap()
            .reader
            .depacketizer()
            .fec_recovered()
    }
}
