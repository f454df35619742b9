//! Realtime RTP audio receive pipeline.
//!
//! Accepts media packets from remote senders over UDP, reconstructs
//! per-sender streams under loss, reorder, and clock skew, and mixes all
//! sessions into one continuous PCM output pulled by the caller in
//! fixed-size frames.
//!
//! The pipeline is synchronous pull: the mixer drives each session's
//! resampler, which drives the depacketizer, which drains the sorted
//! packet queues through the FEC reader. The only async component is the
//! network receive loop, which feeds the session router from a tokio task.

pub mod audio;
pub mod clock;
pub mod codec;
pub mod config;
pub mod depacketizer;
pub mod error;
pub mod fec;
pub mod frame;
pub mod latency;
pub mod mixer;
pub mod network;
pub mod packet;
pub mod pool;
pub mod queue;
pub mod receiver;
pub mod resampler;
pub mod router;
pub mod session;
pub mod stats;

mod fe;

pub use config::{ClockSource, FecConfig, FeProfile, FecScheme, ReceiverConfig, SessionConfig};
pub use error::{Error, Result};
pub use frame::Frame;
pub use network::{NetworkConfig, PacketReceiver};
pub use receiver::Receiver;
pub use router::SessionRouter;

use rtp_mix_common::time::unix_now;
use std::sync::Arc;
use tracing::warn;

/// Runs the network receive loop, feeding the router until the receiver
/// closes or the socket fails.
///
/// Transient conditions (invalid packets, session limit, pool exhaustion)
/// are logged and survived; the loop returns `Ok` once the router reports
/// closure and `Err` only on socket failure.
pub async fn receive_loop(
    receiver: &mut PacketReceiver,
    router: Arc<SessionRouter>,
) -> anyhow::Result<()> {
    // ---
    loop {
        let (wire, src) = match receiver.recv().await? {
            Some(parsed) => parsed,
            None => continue, // invalid packet, already logged
        };

        match router.dispatch(&wire, src, unix_now()) {
            Ok(()) => {}
            Err(Error::Closed) => return Ok(()),
            Err(e) => {
                // Pool exhaustion at session create: the next packet from
                // this sender retries.
                warn!(%src, "dispatch failed: {e}");
            }
        }
    }
}
