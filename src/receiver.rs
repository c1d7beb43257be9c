//! Receive-side engine: reassembly, acknowledgement, flow control.
//!
//! [`Reassembly`] keeps the out-of-order segment store and produces the
//! values every outbound ACK needs: the cumulative ack (next expected
//! sequence), the advertised window, and the selective-ack runs.  It manages
//! state only; socket and sink I/O live in [`run_receiver`].
//!
//! Segments are numbered per segment (1, 2, 3, ...), so the store maps a
//! sequence number to one payload.  The entry at `expected_seq` is drained
//! to the sink as soon as it exists; later runs wait for their predecessors.

use std::collections::BTreeMap;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::connection::{ConnError, Connection};
use crate::packet::{encode_sack, flags, Header, Packet, SackBlock, MAX_SACK_BLOCKS};
use crate::socket::{Socket, SocketError};

/// First sequence number of the data phase.
pub const FIRST_DATA_SEQ: u32 = 1;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can end a receive flow.
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error(transparent)]
    Conn(#[from] ConnError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    /// The output sink rejected a write.
    #[error("output sink error: {0}")]
    Sink(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Reassembly
// ---------------------------------------------------------------------------

/// Receive-side state for one flow.
#[derive(Debug)]
pub struct Reassembly {
    /// Next sequence expected in order; `expected_seq - 1` is the highest
    /// contiguous segment already handed to the sink.
    expected_seq: u32,
    /// Out-of-order segments keyed by sequence, all above `expected_seq`.
    buffer: BTreeMap<u32, Vec<u8>>,
    /// Configured receive window, in packets.
    recv_window: u16,
}

impl Reassembly {
    pub fn new(recv_window: u16) -> Self {
        Self {
            expected_seq: FIRST_DATA_SEQ,
            buffer: BTreeMap::new(),
            recv_window,
        }
    }

    /// Process an inbound data segment.
    ///
    /// Stores the payload unless it is stale (`seq < expected_seq`) or a
    /// duplicate of a buffered segment, then returns the in-order run now
    /// ready for the sink (possibly empty).
    pub fn on_segment(&mut self, seq: u32, payload: &[u8]) -> Vec<Vec<u8>> {
        if seq >= self.expected_seq {
            self.buffer
                .entry(seq)
                .or_insert_with(|| payload.to_vec());
        }

        let mut ready = Vec::new();
        while let Some(chunk) = self.buffer.remove(&self.expected_seq) {
            ready.push(chunk);
            self.expected_seq += 1;
        }
        ready
    }

    /// Cumulative ack to advertise: the next expected sequence number.
    pub fn ack_number(&self) -> u32 {
        self.expected_seq
    }

    /// Number of out-of-order segments currently held.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Window to advertise, in packets.  One slot is always kept available
    /// so the sender cannot stall on a zero window.
    pub fn advertised_window(&self) -> u16 {
        self.recv_window
            .saturating_sub(self.buffer.len() as u16)
            .max(1)
    }

    /// Contiguous runs of buffered segments above the cumulative ack, at
    /// most [`MAX_SACK_BLOCKS`], in ascending order.
    pub fn sack_blocks(&self) -> Vec<SackBlock> {
        let mut blocks = Vec::new();
        let mut run: Option<(u32, u32)> = None;

        for &seq in self.buffer.keys() {
            run = match run {
                Some((start, end)) if seq == end + 1 => Some((start, seq)),
                Some((start, end)) => {
                    blocks.push(SackBlock { start, end });
                    if blocks.len() == MAX_SACK_BLOCKS {
                        return blocks;
                    }
                    Some((seq, seq))
                }
                None => Some((seq, seq)),
            };
        }
        if let Some((start, end)) = run {
            blocks.push(SackBlock { start, end });
        }
        blocks
    }
}

// ---------------------------------------------------------------------------
// Receiver loop
// ---------------------------------------------------------------------------

/// Accept one flow on `socket` and write its byte stream to `output`.
///
/// Runs the passive open, then the data loop: every DATA arrival is answered
/// with a cumulative + selective ack and a window advertisement, whether or
/// not the segment was new.  A FIN ends the data phase and hands over to the
/// four-phase close.  Returns the number of bytes written to the sink.
pub async fn run_receiver<W>(
    socket: Socket,
    output: &mut W,
    recv_window: u16,
) -> Result<u64, ReceiverError>
where
    W: AsyncWrite + Unpin,
{
    let mut conn = Connection::accept(socket, recv_window).await?;
    let mut reassembly = Reassembly::new(recv_window);
    let mut bytes_written = 0u64;

    let fin_seq = loop {
        let (pkt, from) = match conn.socket().recv_from().await {
            Ok(received) => received,
            // Checksum mismatch or short packet: exactly as if it was lost.
            Err(_) => continue,
        };
        if from != conn.peer() {
            continue;
        }

        let h = pkt.header;
        if h.flags & flags::DATA != 0 {
            for chunk in reassembly.on_segment(h.seq, &pkt.payload) {
                output.write_all(&chunk).await?;
                bytes_written += chunk.len() as u64;
            }

            let ack = build_ack(&reassembly);
            log::debug!(
                "[receiver] <- DATA seq={} len={}; -> ACK ack={} wnd={} sack={}",
                h.seq,
                pkt.payload.len(),
                ack.header.ack,
                ack.header.wnd,
                reassembly.buffered()
            );
            conn.socket().send_to(&ack, conn.peer()).await?;
        } else if h.flags & flags::FIN != 0 {
            log::info!("[receiver] recv FIN");
            break h.seq;
        }
    };

    output.flush().await?;
    conn.close_respond(fin_seq, recv_window).await?;
    Ok(bytes_written)
}

/// Build the cumulative + selective ack reflecting the current reassembly
/// state.
fn build_ack(reassembly: &Reassembly) -> Packet {
    Packet {
        header: Header {
            ack: reassembly.ack_number(),
            wnd: reassembly.advertised_window(),
            flags: flags::ACK,
            ..Header::default()
        },
        payload: encode_sack(&reassembly.sack_blocks()),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
