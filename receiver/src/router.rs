//! Session router: demultiplexes packets into per-sender sessions.
//!
//! `dispatch` is the thread-safe entry point for the network context; it
//! holds the session map mutex only for lookup/insert. Session destruction
//! happens exclusively in the audio context via `prune`, so queues are
//! never freed under a producer; the producer side at worst hits a closed
//! queue through its own `Arc`.

use crate::config::ReceiverConfig;
use crate::error::{Error, Result};
use crate::packet::{Packet, StreamKind};
use crate::pool::BufferPool;
use crate::queue::{InsertOutcome, QueueClosed};
use crate::session::Session;
use crate::stats::PipelineStats;
use rtp_mix_common::time::Nanos;
use rtp_mix_common::RtpPacket;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Owns the `sender address -> session` map and its lifecycle.
pub struct SessionRouter {
    // ---
    sessions: Mutex<HashMap<SocketAddr, Arc<Session>>>,
    cfg: ReceiverConfig,
    pool: Arc<BufferPool>,
    stats: Arc<PipelineStats>,
    accepting: AtomicBool,
}

impl SessionRouter {
    // ---
    pub fn new(cfg: ReceiverConfig, pool: Arc<BufferPool>, stats: Arc<PipelineStats>) -> Self {
        // ---
        Self {
            sessions: Mutex::new(HashMap::new()),
            cfg,
            pool,
            stats,
            accepting: AtomicBool::new(true),
        }
    }

    /// Network context: accept one wire packet from `src`.
    ///
    /// Transient conditions (session limit, closed queue, duplicate) are
    /// absorbed here; only `Closed` after shutdown and pool exhaustion at
    /// session create reach the caller.
    pub fn dispatch(&self, wire: &RtpPacket, src: SocketAddr, now_ns: Nanos) -> Result<()> {
        // ---
        if !self.accepting.load(Ordering::Relaxed) {
            return Err(Error::Closed);
        }

        let session = match self.lookup_or_create(src, now_ns)? {
            Some(s) => s,
            None => return Ok(()), // session limit; packet dropped
        };

        let s = &self.cfg.session;
        let packet = if wire.payload_type == s.payload_type {
            Packet::from_source(wire, src, &s.input_sample_spec)
        } else if wire.payload_type == s.repair_payload_type {
            Packet::from_repair(wire, src)
        } else {
            // Anything else is control-plane traffic: liveness only.
            Packet::from_control(wire, src)
        };

        self.stats.record_packet();
        match session.route(packet, now_ns) {
            Ok(InsertOutcome::Evicted) => self.stats.record_queue_overflow(),
            Ok(_) => {}
            Err(QueueClosed) => {
                // Session is mid-teardown; the next packet recreates it.
                debug!(%src, "packet hit closed queue");
            }
        }
        Ok(())
    }

    fn lookup_or_create(&self, src: SocketAddr, now_ns: Nanos) -> Result<Option<Arc<Session>>> {
        // ---
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(existing) = sessions.get(&src) {
            return Ok(Some(existing.clone()));
        }

        if sessions.len() >= self.cfg.max_sessions {
            warn!(%src, max = self.cfg.max_sessions, "session limit reached, dropping sender");
            self.stats.record_session_rejected();
            return Ok(None);
        }

        let session = Session::new(
            src,
            &self.cfg.session,
            self.cfg.output_sample_spec,
            &self.pool,
            now_ns,
        )?;
        sessions.insert(src, session.clone());
        info!(%src, live = sessions.len(), "session created");
        self.stats.record_session_created(sessions.len());
        Ok(Some(session))
    }

    /// Audio context: destroy idle and broken sessions.
    pub fn prune(&self, now_ns: Nanos) {
        // ---
        let mut sessions = self.sessions.lock().unwrap();
        let doomed: Vec<SocketAddr> = sessions
            .iter()
            .filter(|(_, s)| s.is_broken() || s.is_idle(now_ns, self.cfg.idle_timeout))
            .map(|(k, _)| *k)
            .collect();

        for key in doomed {
            if let Some(session) = sessions.remove(&key) {
                session.close();
                info!(%key, live = sessions.len(), "session destroyed");
                self.stats.record_session_destroyed(sessions.len());
            }
        }
    }

    /// Audio context: live sessions for this mixing pass.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        // ---
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        // ---
        self.sessions.lock().unwrap().len()
    }

    /// Stops accepting packets and destroys every session.
    pub fn shutdown(&self) {
        // ---
        self.accepting.store(false, Ordering::Relaxed);
        let mut sessions = self.sessions.lock().unwrap();
        for (key, session) in sessions.drain() {
            session.close();
            debug!(%key, "session destroyed at shutdown");
            self.stats.record_session_destroyed(0);
        }
    }
}
