//! Error types surfaced by the receive pipeline.
//!
//! Transient network and per-session conditions never reach the caller;
//! they are absorbed at the session boundary (silence fill, session
//! rebuild) and show up only in logs and counters. The public error kinds
//! cover programmer errors and hard resource exhaustion.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors returned across the public receiver surface.
#[derive(Debug, Error)]
pub enum Error {
    // ---
    /// Configuration rejected at construction. The receiver stays unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A caller-supplied argument is malformed (e.g. frame size not a
    /// multiple of the channel count).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Pooled buffer exhaustion at session create. The caller may retry.
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    /// The requested endpoint is already bound.
    #[error("address in use: {0}")]
    AddressInUse(SocketAddr),

    /// The receiver has been closed; all further operations fail.
    #[error("receiver is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn errors_render_messages() {
        // ---
        let e = Error::InvalidConfig("target_latency must be positive".into());
        assert!(e.to_string().contains("invalid configuration"));

        let e = Error::Closed;
        assert_eq!(e.to_string(), "receiver is closed");
    }
}
