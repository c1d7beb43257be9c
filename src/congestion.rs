//! Reno-style congestion control.
//!
//! [`Reno`] tracks the congestion window in fractional packets and moves
//! through the classic phases:
//!
//! - **Slow start**: `cwnd` grows by 1 per progressing ack while below
//!   `ssthresh`.
//! - **Congestion avoidance**: `cwnd` grows by `1/cwnd` per progressing ack
//!   at or above `ssthresh`.
//! - **Fast recovery**: entered on the third duplicate ack; `ssthresh` drops
//!   to half the window (floored at 2), `cwnd` is inflated to
//!   `ssthresh + 3` and by one more per further duplicate, and deflates back
//!   to `ssthresh` once the cumulative ack passes the recovery point.
//! - **Timeout**: `ssthresh` drops to half the window (floored at 2) and
//!   `cwnd` collapses onto it; growth then resumes as slow start because
//!   `cwnd <= ssthresh` holds after the cut.
//!
//! The window never exceeds [`MAX_CWND`], matching the default receive
//! window.  This module only manages the window arithmetic; duplicate-ack
//! counting and retransmission live in [`crate::sender`].

/// Upper bound on the congestion window, in packets.
pub const MAX_CWND: f64 = 64.0;

/// Congestion window at flow start, in packets.
pub const INITIAL_CWND: f64 = 1.0;

/// Slow-start threshold at flow start, in packets.
pub const INITIAL_SSTHRESH: f64 = 16.0;

/// Reno congestion state for one flow.
#[derive(Debug)]
pub struct Reno {
    cwnd: f64,
    ssthresh: f64,
    in_fast_recovery: bool,
    /// Highest sequence ever sent when fast recovery was entered; the phase
    /// ends once the cumulative ack moves strictly past it.
    recover_seq: u32,
}

impl Default for Reno {
    fn default() -> Self {
        Self::new()
    }
}

impl Reno {
    pub fn new() -> Self {
        Self {
            cwnd: INITIAL_CWND,
            ssthresh: INITIAL_SSTHRESH,
            in_fast_recovery: false,
            recover_seq: 0,
        }
    }

    /// Current congestion window, in fractional packets.
    pub fn window(&self) -> f64 {
        self.cwnd
    }

    /// Current slow-start threshold.
    pub fn ssthresh(&self) -> f64 {
        self.ssthresh
    }

    /// `true` while the flow is in fast recovery.
    pub fn in_fast_recovery(&self) -> bool {
        self.in_fast_recovery
    }

    /// The cumulative ack advanced to `ack`.  Leaves fast recovery (and
    /// deflates `cwnd` back to `ssthresh`) once the ack passes the recovery
    /// point; returns `true` when that happened.
    pub fn on_progress(&mut self, ack: u32) -> bool {
        if self.in_fast_recovery && ack > self.recover_seq {
            self.in_fast_recovery = false;
            self.cwnd = self.ssthresh.min(MAX_CWND);
            return true;
        }
        false
    }

    /// Third duplicate ack: halve the window (floored at 2), inflate by the
    /// three duplicates already seen, and remember the recovery point.
    pub fn enter_fast_recovery(&mut self, recover_seq: u32) {
        self.ssthresh = (self.cwnd / 2.0).max(2.0);
        self.cwnd = (self.ssthresh + 3.0).min(MAX_CWND);
        self.in_fast_recovery = true;
        self.recover_seq = recover_seq;
    }

    /// A further duplicate ack while recovering inflates the window by one
    /// packet: each duplicate means one segment left the network.
    pub fn inflate(&mut self) {
        self.cwnd = (self.cwnd + 1.0).min(MAX_CWND);
    }

    /// New data was acknowledged: grow the window per the active phase.
    pub fn on_new_ack(&mut self) {
        if self.cwnd < self.ssthresh {
            self.cwnd += 1.0;
        } else {
            self.cwnd += 1.0 / self.cwnd;
        }
        self.cwnd = self.cwnd.min(MAX_CWND);
    }

    /// Retransmission timeout: halve the threshold (floored at 2) and
    /// collapse the window onto it.  Duplicate-ack bookkeeping and the
    /// fast-recovery flag are deliberately left untouched.
    pub fn on_timeout(&mut self) {
        self.ssthresh = (self.cwnd / 2.0).max(2.0);
        self.cwnd = self.ssthresh;
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state() {
        let reno = Reno::new();
        assert_eq!(reno.window(), INITIAL_CWND);
        assert_eq!(reno.ssthresh(), INITIAL_SSTHRESH);
        assert!(!reno.in_fast_recovery());
    }

    #[test]
    fn slow_start_grows_by_one_per_ack() {
        let mut reno = Reno::new();
        for _ in 0..5 {
            reno.on_new_ack();
        }
        assert_eq!(reno.window(), 6.0);
    }

    #[test]
    fn congestion_avoidance_grows_by_reciprocal() {
        let mut reno = Reno::new();
        while reno.window() < reno.ssthresh() {
            reno.on_new_ack();
        }
        let at_threshold = reno.window();
        reno.on_new_ack();
        assert_eq!(reno.window(), at_threshold + 1.0 / at_threshold);
    }

    #[test]
    fn window_caps_at_max() {
        // Inflation during fast recovery is the fastest growth path; the cap
        // still holds.
        let mut reno = Reno::new();
        reno.enter_fast_recovery(1);
        for _ in 0..200 {
            reno.inflate();
        }
        assert_eq!(reno.window(), MAX_CWND);
    }

    #[test]
    fn fast_recovery_halves_and_inflates() {
        let mut reno = Reno::new();
        for _ in 0..19 {
            reno.on_new_ack();
        }
        let cwnd = reno.window();
        reno.enter_fast_recovery(40);

        assert!(reno.in_fast_recovery());
        assert_eq!(reno.ssthresh(), (cwnd / 2.0).max(2.0));
        assert_eq!(reno.window(), reno.ssthresh() + 3.0);

        let inflated = reno.window();
        reno.inflate();
        assert_eq!(reno.window(), inflated + 1.0);
    }

    #[test]
    fn fast_recovery_floor_is_two() {
        let mut reno = Reno::new(); // cwnd = 1
        reno.enter_fast_recovery(3);
        assert_eq!(reno.ssthresh(), 2.0);
        assert_eq!(reno.window(), 5.0);
    }

    #[test]
    fn progress_past_recovery_point_deflates() {
        let mut reno = Reno::new();
        for _ in 0..19 {
            reno.on_new_ack();
        }
        reno.enter_fast_recovery(40);
        reno.inflate();
        reno.inflate();

        // An ack at or below the recovery point keeps the phase alive.
        assert!(!reno.on_progress(40));
        assert!(reno.in_fast_recovery());

        assert!(reno.on_progress(41));
        assert!(!reno.in_fast_recovery());
        assert_eq!(reno.window(), reno.ssthresh());
    }

    #[test]
    fn timeout_collapses_onto_half() {
        let mut reno = Reno::new();
        for _ in 0..11 {
            reno.on_new_ack(); // cwnd = 12
        }
        reno.on_timeout();
        assert_eq!(reno.ssthresh(), 6.0);
        assert_eq!(reno.window(), 6.0);

        // Repeated timeouts floor at 2.
        for _ in 0..8 {
            reno.on_timeout();
        }
        assert_eq!(reno.ssthresh(), 2.0);
        assert_eq!(reno.window(), 2.0);
    }

    #[test]
    fn timeout_leaves_fast_recovery_flag_alone() {
        let mut reno = Reno::new();
        for _ in 0..9 {
            reno.on_new_ack();
        }
        reno.enter_fast_recovery(20);
        reno.on_timeout();
        assert!(reno.in_fast_recovery());
    }
}
