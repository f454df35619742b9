//! UDP network reception.
//!
//! Async socket handling for the network context: bind (optionally joining
//! a multicast group), receive datagrams, parse and validate RTP, and hand
//! packets to the session router. Socket plumbing beyond bind and
//! multicast join belongs to the surrounding network loop, not here.

use crate::error::{Error, Result};
use anyhow::Context;
use rtp_mix_common::RtpPacket;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Endpoint configuration for one receive socket.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    // ---
    /// Local address to bind, e.g. `0.0.0.0:5004`.
    pub bind: SocketAddr,

    /// Multicast group to join on `bind`'s interface, if any.
    pub multicast_group: Option<Ipv4Addr>,

    /// Interface for the multicast join.
    pub multicast_interface: Ipv4Addr,

    /// Receive buffer size; datagrams larger than this are truncated by
    /// the OS and will fail validation.
    pub max_packet_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        // ---
        Self {
            bind: "0.0.0.0:5004".parse().unwrap(),
            multicast_group: None,
            multicast_interface: Ipv4Addr::UNSPECIFIED,
            max_packet_size: 2048,
        }
    }
}

/// UDP receiver for wire packets.
pub struct PacketReceiver {
    // ---
    socket: UdpSocket,
    buf: Vec<u8>,
    packets_received: u64,
    bytes_received: u64,
    packets_dropped: u64,
}

impl PacketReceiver {
    // ---
    /// Binds the socket and joins the multicast group when configured.
    pub async fn bind(cfg: &NetworkConfig) -> Result<Self> {
        // ---
        let socket = UdpSocket::bind(cfg.bind).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                Error::AddressInUse(cfg.bind)
            } else {
                Error::InvalidArgument(format!("failed to bind {}: {e}", cfg.bind))
            }
        })?;

        if let Some(group) = cfg.multicast_group {
            socket
                .join_multicast_v4(group, cfg.multicast_interface)
                .map_err(|e| {
                    Error::InvalidArgument(format!("failed to join multicast {group}: {e}"))
                })?;
            info!(%group, interface = %cfg.multicast_interface, "joined multicast group");
        }

        info!("UDP socket bound to {}", socket.local_addr().map_err(|e| {
            Error::InvalidArgument(format!("local_addr failed: {e}"))
        })?);

        Ok(Self {
            socket,
            buf: vec![0u8; cfg.max_packet_size],
            packets_received: 0,
            bytes_received: 0,
            packets_dropped: 0,
        })
    }

    /// Receives the next datagram and parses it.
    ///
    /// Invalid packets are logged, counted, and reported as `None`; the
    /// caller keeps receiving.
    pub async fn recv(&mut self) -> anyhow::Result<Option<(RtpPacket, SocketAddr)>> {
        // ---
        let (len, src) = self
            .socket
            .recv_from(&mut self.buf)
            .await
            .context("failed to receive UDP packet")?;

        self.bytes_received += len as u64;

        match RtpPacket::deserialize(&self.buf[..len]) {
            Ok(packet) => {
                self.packets_received += 1;

                if self.packets_received % 500 == 0 {
                    debug!(
                        "received {} packets ({} bytes, {} dropped), last from {} seq={}",
                        self.packets_received,
                        self.bytes_received,
                        self.packets_dropped,
                        src,
                        packet.sequence
                    );
                }

                Ok(Some((packet, src)))
            }
            Err(e) => {
                self.packets_dropped += 1;
                warn!("dropped invalid packet from {}: {}", src, e);
                Ok(None)
            }
        }
    }

    /// Returns (packets_received, bytes_received, packets_dropped).
    pub fn stats(&self) -> (u64, u64, u64) {
        // ---
        (
            self.packets_received,
            self.bytes_received,
            self.packets_dropped,
        )
    }
}
