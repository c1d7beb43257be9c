//! Send-side engine: segmentation, sliding window, retransmission.
//!
//! [`SendWindow`] owns one slot per segment and every piece of send-side
//! state: the `base`/`next` window pointers, the peer's advertised window,
//! the Reno congestion state, and the duplicate-ack bookkeeping.  It manages
//! state only; all socket I/O lives in [`run_sender`].
//!
//! # Window layout
//!
//! ```text
//!      base               next
//!       │                  │
//!  ─────┼──────────────────┼──────────────────▶ slot index
//!  acked│ <── in flight ──▶│ <── unsent ─────▶
//! ```
//!
//! Invariants: slots below `base` are all acked; `base <= next <= total`;
//! before any new transmission `next - base` stays below
//! `min(cwnd, peer_wnd, total - base)`.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::congestion::Reno;
use crate::connection::{ConnError, Connection};
use crate::packet::{decode_sack, flags, Header, Packet, MAX_PAYLOAD};
use crate::receiver::FIRST_DATA_SEQ;
use crate::socket::{Socket, SocketError};
use crate::stats::TransferStats;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Retransmission timeout for the data phase.
pub const DATA_TIMEOUT: Duration = Duration::from_millis(100);

/// Data-phase retransmission timeout while link emulation is enabled; wide
/// enough to cover the receive poll plus the emulated delay.
pub const EMULATED_DATA_TIMEOUT: Duration = Duration::from_millis(300);

/// Receive poll during the data phase, kept short so the retransmit timers
/// are revisited frequently.
pub const ACK_POLL_TIMEOUT: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can end a send flow.
#[derive(Debug, Error)]
pub enum SenderError {
    #[error(transparent)]
    Conn(#[from] ConnError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    /// The input source failed mid-read.
    #[error("input source error: {0}")]
    Source(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// SendSlot
// ---------------------------------------------------------------------------

/// One segment and its transmission state.
#[derive(Debug)]
struct SendSlot {
    header: Header,
    payload: Vec<u8>,
    /// Ever left the sender.
    sent: bool,
    /// Confirmed by cumulative or selective ack.
    acked: bool,
    /// Wall-clock of the first transmission; frozen thereafter, the basis
    /// for RTT sampling.
    first_sent: Option<Instant>,
    /// Wall-clock of the most recent transmission; the retransmit timer.
    last_sent: Option<Instant>,
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

/// Send-side state for one flow.
#[derive(Debug)]
pub struct SendWindow {
    /// All segments, indexed by `seq - 1`.
    slots: Vec<SendSlot>,
    /// Smallest index not yet acked.
    base: usize,
    /// Next index to transmit for the first time.
    next: usize,
    /// Peer's advertised window, in packets; never below 1.
    peer_wnd: u16,
    reno: Reno,
    /// Cumulative ack value of the latest progressing ack.
    last_ack_seq: u32,
    /// Consecutive duplicates of `last_ack_seq`.
    dup_ack_count: u32,
    pub stats: TransferStats,
}

impl SendWindow {
    /// Build the window from pre-segmented payloads.  Sequence numbers are
    /// assigned 1, 2, 3, ... in order.
    pub fn new(segments: Vec<Vec<u8>>, peer_wnd: u16) -> Self {
        let slots = segments
            .into_iter()
            .enumerate()
            .map(|(i, payload)| SendSlot {
                header: Header {
                    seq: FIRST_DATA_SEQ + i as u32,
                    len: payload.len() as u16,
                    flags: flags::DATA,
                    ..Header::default()
                },
                payload,
                sent: false,
                acked: false,
                first_sent: None,
                last_sent: None,
            })
            .collect();

        Self {
            slots,
            base: 0,
            next: 0,
            peer_wnd: peer_wnd.max(1),
            reno: Reno::new(),
            last_ack_seq: FIRST_DATA_SEQ,
            dup_ack_count: 0,
            stats: TransferStats::default(),
        }
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    /// `true` once every segment is acknowledged.
    pub fn is_complete(&self) -> bool {
        self.base == self.slots.len()
    }

    /// Segments sent but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.next - self.base
    }

    pub fn peer_window(&self) -> u16 {
        self.peer_wnd
    }

    pub fn congestion(&self) -> &Reno {
        &self.reno
    }

    /// Transmittable window: `floor(min(cwnd, peer_wnd, total - base))`.
    pub fn window_limit(&self) -> usize {
        let remaining = (self.slots.len() - self.base) as f64;
        self.reno
            .window()
            .min(f64::from(self.peer_wnd))
            .min(remaining)
            .floor() as usize
    }

    /// Claim the next new segment to transmit, if the window allows one.
    pub fn pop_sendable(&mut self) -> Option<usize> {
        if self.next < self.slots.len() && self.next - self.base < self.window_limit() {
            let idx = self.next;
            self.next += 1;
            Some(idx)
        } else {
            None
        }
    }

    /// The wire packet for slot `idx`.
    pub fn packet(&self, idx: usize) -> Packet {
        let slot = &self.slots[idx];
        Packet {
            header: slot.header,
            payload: slot.payload.clone(),
        }
    }

    /// Record a completed transmission of slot `idx`.
    pub fn mark_transmitted(&mut self, idx: usize, now: Instant, retransmit: bool) {
        let slot = &mut self.slots[idx];
        if slot.first_sent.is_none() {
            slot.first_sent = Some(now);
        }
        slot.last_sent = Some(now);
        slot.sent = true;

        self.stats.packets_sent += 1;
        if retransmit {
            self.stats.retransmissions += 1;
        }
    }

    /// Process one inbound ACK: window update, duplicate classification,
    /// cumulative then selective marking, base advance, window growth.
    ///
    /// Returns the index to fast-retransmit when this ack was the third
    /// duplicate, so the caller can put it on the wire within the same
    /// iteration.
    pub fn on_ack(&mut self, header: &Header, payload: &[u8], now: Instant) -> Option<usize> {
        if header.flags & flags::ACK == 0 {
            return None;
        }

        self.peer_wnd = header.wnd.max(1);

        let ack = header.ack;
        let mut fast_retransmit = None;

        if ack > self.last_ack_seq {
            self.last_ack_seq = ack;
            self.dup_ack_count = 0;
            if self.reno.on_progress(ack) {
                log::debug!("[sender] fast recovery over, cwnd={:.1}", self.reno.window());
            }
        } else if ack == self.last_ack_seq {
            self.dup_ack_count += 1;

            let head_unacked = self.base < self.slots.len()
                && self.slots[self.base].sent
                && !self.slots[self.base].acked;
            if self.dup_ack_count >= 3 && !self.reno.in_fast_recovery() && head_unacked {
                // Fast retransmit: the highest sequence ever sent marks the
                // recovery point.
                let recover_seq = self.slots[self.next - 1].header.seq;
                self.reno.enter_fast_recovery(recover_seq);
                fast_retransmit = Some(self.base);
                log::debug!(
                    "[sender] 3 dup acks at {}, fast retransmit seq={}",
                    ack,
                    self.slots[self.base].header.seq
                );
            } else if self.reno.in_fast_recovery() {
                self.reno.inflate();
            }
        } else {
            // A reordered old ack carries no new information.
            self.dup_ack_count = 0;
        }

        // Cumulative range [1, ack - 1], then the selective ranges.
        let mut any_new = false;
        if ack > FIRST_DATA_SEQ {
            let high = (ack - 1).min(self.slots.len() as u32);
            for seq in FIRST_DATA_SEQ..=high {
                any_new |= self.mark_acked(seq, now);
            }
        }
        for blk in decode_sack(payload) {
            let start = blk.start.max(FIRST_DATA_SEQ);
            let end = blk.end.min(self.slots.len() as u32);
            for seq in start..=end {
                any_new |= self.mark_acked(seq, now);
            }
        }

        if any_new {
            while self.base < self.slots.len() && self.slots[self.base].acked {
                self.base += 1;
            }
            // A forged ack can cover slots that never flew; keep base <= next
            // so the in-flight arithmetic stays sound.
            self.next = self.next.max(self.base);
            self.reno.on_new_ack();
        }

        fast_retransmit
    }

    /// Mark one sequence acked; returns `true` when it was newly acked.
    fn mark_acked(&mut self, seq: u32, now: Instant) -> bool {
        let idx = (seq - FIRST_DATA_SEQ) as usize;
        if idx >= self.slots.len() || self.slots[idx].acked {
            return false;
        }
        let slot = &mut self.slots[idx];
        slot.acked = true;
        self.stats.bytes_delivered += slot.payload.len() as u64;
        if let Some(first) = slot.first_sent {
            let rtt = now.duration_since(first);
            self.stats.record_rtt(rtt);
        }
        true
    }

    /// Scan `[base, next)` for expired retransmit timers.  Each overdue slot
    /// gets the Reno timeout reaction exactly once per scan and is returned
    /// for retransmission.
    pub fn take_timed_out(&mut self, now: Instant, rto: Duration) -> Vec<usize> {
        let mut expired = Vec::new();
        for idx in self.base..self.next {
            let slot = &self.slots[idx];
            let overdue = slot.sent
                && !slot.acked
                && slot
                    .last_sent
                    .is_some_and(|last| now.duration_since(last) > rto);
            if overdue {
                self.reno.on_timeout();
                expired.push(idx);
            }
        }
        expired
    }

    #[cfg(test)]
    fn is_acked(&self, idx: usize) -> bool {
        self.slots[idx].acked
    }
}

// ---------------------------------------------------------------------------
// Segmentation
// ---------------------------------------------------------------------------

/// Slice the input stream into MAX_PAYLOAD-sized segments.
///
/// Short reads are coalesced so every segment except the last is exactly
/// [`MAX_PAYLOAD`] bytes; an empty input yields no segments.
async fn segment_stream<R>(input: &mut R) -> Result<Vec<Vec<u8>>, std::io::Error>
where
    R: AsyncRead + Unpin,
{
    let mut segments = Vec::new();
    let mut chunk = vec![0u8; MAX_PAYLOAD];
    loop {
        let mut filled = 0;
        while filled < MAX_PAYLOAD {
            let n = input.read(&mut chunk[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        segments.push(chunk[..filled].to_vec());
        if filled < MAX_PAYLOAD {
            break;
        }
    }
    Ok(segments)
}

// ---------------------------------------------------------------------------
// Sender loop
// ---------------------------------------------------------------------------

/// Deliver the whole of `input` to `peer` over `socket`.
///
/// Runs the active open, the data loop (fill the window, poll for acks,
/// service the retransmit timers), and the active close.  Returns the
/// transfer statistics of the completed flow.
pub async fn run_sender<R>(
    socket: Socket,
    peer: SocketAddr,
    input: &mut R,
) -> Result<TransferStats, SenderError>
where
    R: AsyncRead + Unpin,
{
    let data_timeout = if socket.link().is_enabled() {
        EMULATED_DATA_TIMEOUT
    } else {
        DATA_TIMEOUT
    };

    let mut conn = Connection::connect(socket, peer).await?;

    let segments = segment_stream(input).await?;
    if segments.is_empty() {
        log::info!("[sender] input empty, nothing to send");
    } else {
        log::info!("[sender] {} segment(s) to send", segments.len());
    }

    let mut win = SendWindow::new(segments, conn.peer_window());
    let mut started_at: Option<Instant> = None;

    while !win.is_complete() {
        // Fill the window with new segments.  Timestamps are taken before
        // the send so RTT samples cover the emulated link delay.
        while let Some(idx) = win.pop_sendable() {
            let now = Instant::now();
            started_at.get_or_insert(now);
            win.mark_transmitted(idx, now, false);
            let pkt = win.packet(idx);
            conn.socket().send_to(&pkt, conn.peer()).await?;
        }

        // Poll briefly for feedback, then revisit the timers.
        match timeout(ACK_POLL_TIMEOUT, conn.socket().recv_from()).await {
            Ok(Ok((pkt, from))) if from == conn.peer() => {
                if let Some(idx) = win.on_ack(&pkt.header, &pkt.payload, Instant::now()) {
                    win.mark_transmitted(idx, Instant::now(), true);
                    let pkt = win.packet(idx);
                    conn.socket().send_to(&pkt, conn.peer()).await?;
                }
            }
            // Strangers, decode failures, and receive timeouts all fall
            // through to the timer scan.
            Ok(_) | Err(_) => {}
        }

        for idx in win.take_timed_out(Instant::now(), data_timeout) {
            win.mark_transmitted(idx, Instant::now(), true);
            let pkt = win.packet(idx);
            log::debug!("[sender] timeout, retransmit seq={}", pkt.header.seq);
            conn.socket().send_to(&pkt, conn.peer()).await?;
        }
    }

    if let Some(start) = started_at {
        win.stats.elapsed = start.elapsed();
    }
    win.stats.recv_window = conn.peer_window();

    conn.close_initiate().await?;
    Ok(win.stats)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{encode_sack, SackBlock};

    fn ack_header(ack: u32, wnd: u16) -> Header {
        Header {
            ack,
            wnd,
            flags: flags::ACK,
            ..Header::default()
        }
    }

    /// A window over `n` one-byte segments with everything sendable sent.
    fn flown_window(n: usize, peer_wnd: u16) -> SendWindow {
        let mut win = SendWindow::new(vec![vec![0u8]; n], peer_wnd);
        let now = Instant::now();
        while let Some(idx) = win.pop_sendable() {
            win.mark_transmitted(idx, now, false);
        }
        win
    }

    #[test]
    fn initial_state() {
        let win = SendWindow::new(vec![vec![1, 2, 3]], 64);
        assert_eq!(win.total(), 1);
        assert_eq!(win.in_flight(), 0);
        assert!(!win.is_complete());
        assert_eq!(win.peer_window(), 64);
    }

    #[test]
    fn empty_input_is_immediately_complete() {
        let win = SendWindow::new(Vec::new(), 64);
        assert!(win.is_complete());
        assert_eq!(win.window_limit(), 0);
    }

    #[test]
    fn initial_window_admits_one_segment() {
        // cwnd starts at 1, so only one segment may fly.
        let mut win = flown_window(10, 64);
        assert_eq!(win.in_flight(), 1);
        assert_eq!(win.pop_sendable(), None);
    }

    #[test]
    fn window_is_never_exceeded() {
        let mut win = SendWindow::new(vec![vec![0u8]; 200], 5);
        let now = Instant::now();
        let mut ack = 2u32;

        for _ in 0..40 {
            loop {
                let bound = win
                    .congestion()
                    .window()
                    .min(f64::from(win.peer_window()));
                assert!((win.in_flight() as f64) <= bound);
                match win.pop_sendable() {
                    Some(idx) => win.mark_transmitted(idx, now, false),
                    None => break,
                }
            }
            // Acknowledge one more segment to open the window.
            win.on_ack(&ack_header(ack, 5), &[], now);
            ack += 1;
        }
    }

    #[test]
    fn cumulative_ack_advances_base_and_grows_cwnd() {
        let mut win = flown_window(10, 64);
        let now = Instant::now();

        // cwnd 1 -> 2 after the first progressing ack.
        assert_eq!(win.on_ack(&ack_header(2, 64), &[], now), None);
        assert_eq!(win.in_flight(), 0);
        assert_eq!(win.congestion().window(), 2.0);
        assert_eq!(win.stats.bytes_delivered, 1);

        // Two more flights now fit.
        let mut sent = 0;
        while let Some(idx) = win.pop_sendable() {
            win.mark_transmitted(idx, now, false);
            sent += 1;
        }
        assert_eq!(sent, 2);
    }

    #[test]
    fn ack_beyond_total_is_clamped() {
        let mut win = flown_window(3, 64);
        win.on_ack(&ack_header(100, 64), &[], Instant::now());
        assert!(win.is_complete());
        assert_eq!(win.stats.bytes_delivered, 3);
    }

    #[test]
    fn sack_marks_slots_without_moving_base() {
        let mut win = flown_window(5, 64);
        let now = Instant::now();

        // Receiver holds 3..=4 but still waits for 1.
        let sack = encode_sack(&[SackBlock { start: 3, end: 4 }]);
        win.on_ack(&ack_header(1, 64), &sack, now);

        assert_eq!(win.in_flight(), 1, "base must not cross the gap");
        assert!(win.is_acked(2) && win.is_acked(3));
        assert!(!win.is_acked(0));
        assert_eq!(win.stats.bytes_delivered, 2);
    }

    #[test]
    fn sack_is_idempotent() {
        let mut win = flown_window(5, 64);
        let now = Instant::now();
        let sack = encode_sack(&[SackBlock { start: 2, end: 2 }]);
        win.on_ack(&ack_header(1, 64), &sack, now);
        win.on_ack(&ack_header(1, 64), &sack, now);
        assert_eq!(win.stats.bytes_delivered, 1, "re-acked slot counted once");
    }

    #[test]
    fn third_duplicate_ack_triggers_fast_retransmit() {
        let mut win = flown_window(8, 64);
        let now = Instant::now();

        // Dup acks carry a SACK for the segments above the hole.
        let sack = encode_sack(&[SackBlock { start: 2, end: 2 }]);
        assert_eq!(win.on_ack(&ack_header(1, 64), &sack, now), None);
        assert_eq!(win.on_ack(&ack_header(1, 64), &sack, now), None);
        let cwnd_before = win.congestion().window();

        let retransmit = win.on_ack(&ack_header(1, 64), &sack, now);
        assert_eq!(retransmit, Some(0), "head of the window is resent");
        assert!(win.congestion().in_fast_recovery());
        assert_eq!(win.congestion().ssthresh(), (cwnd_before / 2.0).max(2.0));
        assert_eq!(
            win.congestion().window(),
            win.congestion().ssthresh() + 3.0
        );
    }

    #[test]
    fn further_duplicates_inflate_the_window() {
        let mut win = flown_window(8, 64);
        let now = Instant::now();
        for _ in 0..3 {
            win.on_ack(&ack_header(1, 64), &[], now);
        }
        let inflated = win.congestion().window();
        win.on_ack(&ack_header(1, 64), &[], now);
        assert_eq!(win.congestion().window(), inflated + 1.0);
    }

    #[test]
    fn progressing_ack_ends_fast_recovery() {
        let mut win = flown_window(8, 64);
        let now = Instant::now();
        for _ in 0..3 {
            win.on_ack(&ack_header(1, 64), &[], now);
        }
        assert!(win.congestion().in_fast_recovery());

        // recover_seq is 1 (only seq 1 ever flew), so any progress exits.
        win.on_ack(&ack_header(2, 64), &[], now);
        assert!(!win.congestion().in_fast_recovery());
    }

    #[test]
    fn stale_ack_resets_duplicate_count() {
        let mut win = flown_window(8, 64);
        let now = Instant::now();

        win.on_ack(&ack_header(3, 64), &[], now);
        win.on_ack(&ack_header(3, 64), &[], now);
        win.on_ack(&ack_header(3, 64), &[], now);
        assert_eq!(win.dup_ack_count, 2);

        // A reordered old ack must clear the streak, not extend it.
        win.on_ack(&ack_header(2, 64), &[], now);
        assert_eq!(win.dup_ack_count, 0);
        assert!(!win.congestion().in_fast_recovery());
    }

    #[test]
    fn zero_advertised_window_is_clamped_to_one() {
        let mut win = flown_window(4, 64);
        win.on_ack(&ack_header(2, 0), &[], Instant::now());
        assert_eq!(win.peer_window(), 1);
        assert!(win.window_limit() >= 1);
    }

    #[test]
    fn timer_scan_returns_overdue_slots_and_cuts_window() {
        let mut win = SendWindow::new(vec![vec![0u8]; 4], 64);
        let long_ago = Instant::now() - Duration::from_secs(5);
        let idx = win.pop_sendable().unwrap();
        win.mark_transmitted(idx, long_ago, false);
        let cwnd_before = win.congestion().window();

        let expired = win.take_timed_out(Instant::now(), DATA_TIMEOUT);
        assert_eq!(expired, vec![0]);
        assert_eq!(win.congestion().ssthresh(), (cwnd_before / 2.0).max(2.0));
        assert_eq!(win.congestion().window(), win.congestion().ssthresh());
    }

    #[test]
    fn fresh_and_acked_slots_never_time_out() {
        let mut win = flown_window(3, 64);
        let now = Instant::now();
        // Slot 0 is acked; slots 1 and 2 fly just now.
        win.on_ack(&ack_header(2, 64), &[], now);
        while let Some(idx) = win.pop_sendable() {
            win.mark_transmitted(idx, now, false);
        }

        assert!(win.take_timed_out(now, DATA_TIMEOUT).is_empty());
    }

    #[tokio::test]
    async fn segmentation_chunks_and_numbers() {
        let data = vec![7u8; MAX_PAYLOAD * 2 + 96];
        let segments = segment_stream(&mut data.as_slice()).await.unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].len(), MAX_PAYLOAD);
        assert_eq!(segments[2].len(), 96);

        let win = SendWindow::new(segments, 64);
        assert_eq!(win.packet(0).header.seq, 1);
        assert_eq!(win.packet(2).header.seq, 3);
        assert_eq!(win.packet(2).header.len, 96);
    }

    #[tokio::test]
    async fn segmentation_of_empty_input() {
        let segments = segment_stream(&mut (&[] as &[u8])).await.unwrap();
        assert!(segments.is_empty());
    }
}
