//! Connection establishment and termination.
//!
//! A [`Connection`] owns the socket and the peer address for one logical
//! flow.  It is created either by an active open ([`Connection::connect`],
//! the sender) or by accepting a peer's SYN ([`Connection::accept`], the
//! receiver), and torn down by the sender-initiated four-phase close
//! ([`Connection::close_initiate`] / [`Connection::close_respond`]).
//!
//! Both establishment and termination are retry-with-timeout state machines:
//! each wait uses the handshake timeout (stretched by twice the emulated
//! one-way delay) and replays the last outbound packet up to
//! [`MAX_RETRIES`] times.  Receive-side failures inside the loops (timeout,
//! checksum mismatch, short packet) are never fatal; send-side socket errors
//! always are.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;

use crate::packet::{flags, Header, Packet, DEFAULT_RECV_WINDOW};
use crate::socket::{Socket, SocketError};
use crate::state::ConnectionState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Base receive timeout for handshake and termination waits.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Maximum attempts per handshake or termination step.
pub const MAX_RETRIES: u32 = 5;

/// The sender's initial sequence number, carried by its SYN.
const SENDER_ISN: u32 = 0;

/// The receiver's fixed initial sequence number, carried by its SYN-ACK.
/// Arbitrary but distinct from the sender's; the handshake only relies on
/// `syn.seq + 1` echoing back.
const RECEIVER_ISN: u32 = 100;

/// Sequence number of the sender's FIN.  The termination exchange is
/// sequenced separately from the data phase.
pub const SENDER_FIN_SEQ: u32 = 1;

/// Sequence number of the receiver's FIN.
pub const RECEIVER_FIN_SEQ: u32 = 2;

/// Handshake/termination receive timeout, stretched to cover one emulated
/// round trip.
fn handshake_wait(socket: &Socket) -> Duration {
    HANDSHAKE_TIMEOUT + 2 * socket.link().delay()
}

fn control_packet(header: Header) -> Packet {
    Packet {
        header,
        payload: vec![],
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise while establishing or tearing down a connection.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The three-phase handshake did not complete within [`MAX_RETRIES`].
    #[error("handshake failed after {MAX_RETRIES} attempts")]
    HandshakeFailed,
    /// The four-phase termination did not complete within [`MAX_RETRIES`].
    #[error("connection close failed after {MAX_RETRIES} attempts")]
    CloseFailed,
    /// A send-side socket failure; always fatal.
    #[error(transparent)]
    Socket(#[from] SocketError),
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// An established flow: socket, peer address, and FSM state.
#[derive(Debug)]
pub struct Connection {
    /// Current FSM state.
    pub state: ConnectionState,
    socket: Socket,
    peer: SocketAddr,
    /// Peer's receive window as advertised during the handshake, in packets.
    peer_wnd: u16,
}

impl Connection {
    /// The underlying socket.
    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// The remote endpoint this flow is bound to.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Peer receive window learned from the handshake, in packets (>= 1).
    pub fn peer_window(&self) -> u16 {
        self.peer_wnd
    }

    // -----------------------------------------------------------------------
    // Three-phase handshake
    // -----------------------------------------------------------------------

    /// Active open (sender side): SYN, await SYN-ACK, reply ACK.
    ///
    /// The SYN is replayed on each receive timeout, up to [`MAX_RETRIES`]
    /// attempts.
    pub async fn connect(socket: Socket, peer: SocketAddr) -> Result<Self, ConnError> {
        let wait = handshake_wait(&socket);
        let syn = control_packet(Header {
            seq: SENDER_ISN,
            flags: flags::SYN,
            wnd: DEFAULT_RECV_WINDOW,
            ..Header::default()
        });

        for attempt in 1..=MAX_RETRIES {
            log::info!("[sender] send SYN");
            socket.send_to(&syn, peer).await?;

            let received = timeout(wait, socket.recv_from()).await;
            match received {
                Ok(Ok((pkt, from))) if from == peer => {
                    let h = pkt.header;
                    let is_syn_ack =
                        h.flags & (flags::SYN | flags::ACK) == (flags::SYN | flags::ACK);
                    if is_syn_ack && h.ack == SENDER_ISN.wrapping_add(1) {
                        log::info!("[sender] recv SYN-ACK");

                        let ack = control_packet(Header {
                            seq: SENDER_ISN.wrapping_add(1),
                            ack: h.seq.wrapping_add(1),
                            flags: flags::ACK,
                            wnd: DEFAULT_RECV_WINDOW,
                            ..Header::default()
                        });
                        socket.send_to(&ack, peer).await?;
                        log::info!("[sender] handshake success");

                        return Ok(Self {
                            state: ConnectionState::Established,
                            socket,
                            peer,
                            peer_wnd: h.wnd.max(1),
                        });
                    }
                }
                // Stranger, decode failure, or timeout: all count as a lost
                // round and the SYN is replayed.
                Ok(_) | Err(_) => {}
            }
            log::info!("[sender] handshake retry {attempt}");
        }

        log::error!("[sender] handshake failed");
        Err(ConnError::HandshakeFailed)
    }

    /// Passive open (receiver side): await SYN, reply SYN-ACK, await the
    /// final ACK.
    ///
    /// Blocks indefinitely for the first SYN.  While waiting for the final
    /// ACK, a duplicate SYN means the SYN-ACK was lost and triggers its
    /// retransmission; an early DATA packet means the final ACK arrived at
    /// no one but the sender has plainly moved on, so the connection is
    /// treated as established (the segment itself is recovered by
    /// retransmission).
    pub async fn accept(socket: Socket, recv_window: u16) -> Result<Self, ConnError> {
        log::info!("[receiver] wait for SYN...");
        let (syn, peer) = loop {
            match socket.recv_from().await {
                Ok((pkt, from)) if pkt.header.flags & flags::SYN != 0 => {
                    break (pkt.header, from)
                }
                _ => continue,
            }
        };
        log::info!("[receiver] recv SYN");

        let syn_ack = control_packet(Header {
            seq: RECEIVER_ISN,
            ack: syn.seq.wrapping_add(1),
            flags: flags::SYN | flags::ACK,
            wnd: recv_window,
            ..Header::default()
        });
        log::info!("[receiver] send SYN-ACK");
        socket.send_to(&syn_ack, peer).await?;

        let wait = handshake_wait(&socket);
        let established = |socket| Self {
            state: ConnectionState::Established,
            socket,
            peer,
            peer_wnd: DEFAULT_RECV_WINDOW,
        };

        for _ in 1..=MAX_RETRIES {
            let received = timeout(wait, socket.recv_from()).await;
            match received {
                Ok(Ok((pkt, from))) if from == peer => {
                    let h = pkt.header;
                    if h.flags & flags::SYN != 0 {
                        log::debug!("[receiver] duplicate SYN, resend SYN-ACK");
                        socket.send_to(&syn_ack, peer).await?;
                        continue;
                    }
                    if h.flags & flags::DATA != 0 {
                        log::info!("[receiver] handshake success (data implies ACK)");
                        return Ok(established(socket));
                    }
                    if h.flags & flags::ACK != 0 && h.ack == RECEIVER_ISN.wrapping_add(1) {
                        log::info!("[receiver] handshake success");
                        return Ok(established(socket));
                    }
                }
                Ok(_) => {}
                Err(_elapsed) => {
                    log::info!("[receiver] wait ACK timeout, resend SYN-ACK");
                    socket.send_to(&syn_ack, peer).await?;
                }
            }
        }

        log::error!("[receiver] handshake failed");
        Err(ConnError::HandshakeFailed)
    }

    // -----------------------------------------------------------------------
    // Four-phase termination
    // -----------------------------------------------------------------------

    /// Active close (sender side): FIN, await its ACK, await the peer's FIN,
    /// reply the final ACK.
    ///
    /// Any timeout restarts the sequence by replaying the FIN.
    pub async fn close_initiate(&mut self) -> Result<(), ConnError> {
        let wait = handshake_wait(&self.socket);
        let fin = control_packet(Header {
            seq: SENDER_FIN_SEQ,
            flags: flags::FIN,
            ..Header::default()
        });

        for _ in 1..=MAX_RETRIES {
            log::info!("[sender] send FIN");
            self.socket.send_to(&fin, self.peer).await?;
            self.state = ConnectionState::FinWait;

            // (2) the peer acknowledges our FIN.
            let resp = match timeout(wait, self.socket.recv_from()).await {
                Ok(Ok((pkt, from))) if from == self.peer => pkt.header,
                _ => {
                    log::info!("[sender] FIN wait ACK timeout, retry");
                    continue;
                }
            };
            if resp.flags & flags::ACK == 0 || resp.ack != SENDER_FIN_SEQ.wrapping_add(1) {
                continue;
            }
            log::info!("[sender] recv ACK of FIN");

            // (3) the peer sends its own FIN.
            let peer_fin = match timeout(wait, self.socket.recv_from()).await {
                Ok(Ok((pkt, from))) if from == self.peer => pkt.header,
                _ => {
                    log::info!("[sender] wait peer FIN timeout, retry");
                    continue;
                }
            };
            if peer_fin.flags & flags::FIN == 0 {
                continue;
            }
            log::info!("[sender] recv peer FIN");

            // (4) final ACK; loss is tolerated by the peer's FIN retry.
            let last_ack = control_packet(Header {
                ack: peer_fin.seq.wrapping_add(1),
                flags: flags::ACK,
                wnd: DEFAULT_RECV_WINDOW,
                ..Header::default()
            });
            self.state = ConnectionState::TimeWait;
            self.socket.send_to(&last_ack, self.peer).await?;
            log::info!("[sender] four-way close done");
            self.state = ConnectionState::Closed;
            return Ok(());
        }

        log::error!("[sender] four-way close failed");
        Err(ConnError::CloseFailed)
    }

    /// Passive close (receiver side), entered after a FIN with sequence
    /// `fin_seq` ended the data phase: acknowledge it, send our own FIN, and
    /// wait for the last ACK.
    ///
    /// A replayed peer FIN during the wait means our ACK was lost and
    /// triggers its retransmission.  If the last ACK never arrives the
    /// connection is closed anyway; the peer has no further obligations.
    pub async fn close_respond(&mut self, fin_seq: u32, recv_window: u16) -> Result<(), ConnError> {
        self.state = ConnectionState::CloseWait;

        let ack_of_fin = control_packet(Header {
            ack: fin_seq.wrapping_add(1),
            flags: flags::ACK,
            wnd: recv_window,
            ..Header::default()
        });
        self.socket.send_to(&ack_of_fin, self.peer).await?;
        log::info!("[receiver] send ACK of FIN");

        let fin = control_packet(Header {
            seq: RECEIVER_FIN_SEQ,
            flags: flags::FIN,
            ..Header::default()
        });
        let wait = handshake_wait(&self.socket);

        for _ in 1..=MAX_RETRIES {
            log::info!("[receiver] send FIN");
            self.socket.send_to(&fin, self.peer).await?;
            self.state = ConnectionState::LastAck;

            match timeout(wait, self.socket.recv_from()).await {
                Ok(Ok((pkt, from))) if from == self.peer => {
                    let h = pkt.header;
                    if h.flags & flags::FIN != 0 {
                        log::debug!("[receiver] peer FIN replayed, resend ACK");
                        self.socket.send_to(&ack_of_fin, self.peer).await?;
                        continue;
                    }
                    if h.flags & flags::ACK != 0 && h.ack == RECEIVER_FIN_SEQ.wrapping_add(1) {
                        log::info!("[receiver] four-way close done");
                        self.state = ConnectionState::Closed;
                        return Ok(());
                    }
                }
                Ok(_) => {}
                Err(_elapsed) => log::info!("[receiver] wait last ACK timeout"),
            }
        }

        log::warn!("[receiver] last ACK never arrived; closing anyway");
        self.state = ConnectionState::Closed;
        Ok(())
    }
}
