//! Packet-oriented UDP socket.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Packet`] instead of raw bytes.  The sender's link
//! emulation (see [`crate::link`]) lives on the transmit path here; all
//! protocol logic lives elsewhere.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::link::LinkConfig;
use crate::packet::{Packet, PacketError, MAX_DATAGRAM};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The received datagram could not be decoded as a valid packet.
    #[error("packet decode error: {0}")]
    Packet(#[from] PacketError),
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// A packet-oriented UDP socket with an optional emulated link on the
/// transmit path.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    link: LinkConfig,
}

impl Socket {
    /// Bind a new socket to `local_addr` with a pass-through link.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            link: LinkConfig::default(),
        })
    }

    /// Install a link-emulation configuration on the transmit path.
    pub fn set_link(&mut self, link: LinkConfig) {
        self.link = link;
    }

    /// The active link configuration.
    pub fn link(&self) -> &LinkConfig {
        &self.link
    }

    /// Encode `packet` and send it as a single UDP datagram to `dest`.
    ///
    /// Forward-path packets (DATA, SYN, FIN) pass through the emulated link
    /// first: a loss draw may swallow the packet (still reported as `Ok` so
    /// retransmission recovers it), and the configured one-way delay is slept
    /// before the real send.  Pure ACKs skip both.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> Result<(), SocketError> {
        if !packet.header.is_pure_ack() && self.link.is_enabled() {
            if self.link.should_drop() {
                log::debug!(
                    "[link] drop seq={} flags={:#04x}",
                    packet.header.seq,
                    packet.header.flags
                );
                return Ok(());
            }
            let delay = self.link.delay();
            if delay > std::time::Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
        }

        let bytes = packet.encode();
        self.inner.send_to(&bytes, dest).await?;
        Ok(())
    }

    /// Receive the next datagram and decode it into a [`Packet`].
    ///
    /// Returns `(packet, sender_address)`.  Datagrams that fail to decode
    /// (short or corrupted) are returned as `Err`; callers in the data path
    /// treat that exactly like a lost packet.
    pub async fn recv_from(&self) -> Result<(Packet, SocketAddr), SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        let packet = Packet::decode(&buf[..n])?;
        Ok((packet, addr))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
