//! Link emulation: artificial loss and one-way delay on the forward path.
//!
//! Real links drop and delay packets.  To exercise the retransmission and
//! congestion machinery without depending on actual network conditions, the
//! sender's socket applies this fault model to every outbound packet that
//! carries DATA, SYN, or FIN:
//!
//! | Fault       | Description                                        |
//! |-------------|----------------------------------------------------|
//! | Packet loss | Drop the packet with probability `loss_rate`.      |
//! | Delay       | Sleep `delay` before the packet reaches the wire.  |
//!
//! Pure ACK packets bypass both faults so the feedback channel stays clean;
//! the emulator impairs only the forward path.  A dropped packet is reported
//! as a successful send so the retransmission logic upstream is exercised
//! naturally.
//!
//! The loss draw uses the thread-local generator, so two endpoints in the
//! same process never contend on RNG state.

use std::time::Duration;

use rand::Rng;

/// Configuration for the emulated link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// One-way delay applied to each forward-path packet.
    delay: Duration,
    /// Probability in `[0, 1]` that a forward-path packet is dropped.
    loss_rate: f64,
    /// Whether emulation was configured at all.  Configuring it (even with
    /// zero delay and loss) raises the sender's data-phase timeout.
    enabled: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        // No faults by default; the shim is a transparent pass-through.
        Self {
            delay: Duration::ZERO,
            loss_rate: 0.0,
            enabled: false,
        }
    }
}

impl LinkConfig {
    /// Build a link configuration from operator-supplied values.
    ///
    /// `delay_ms` is clamped to be non-negative by its type; `loss_percent`
    /// is clamped to `[0, 100]` and converted to a rate.
    pub fn new(delay_ms: u64, loss_percent: f64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            loss_rate: (loss_percent / 100.0).clamp(0.0, 1.0),
            enabled: true,
        }
    }

    /// `true` when emulation was configured.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// One-way delay to insert before each forward-path send.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Loss probability in `[0, 1]`.
    pub fn loss_rate(&self) -> f64 {
        self.loss_rate
    }

    /// Draw once from the thread-local RNG: `true` means drop this packet.
    pub fn should_drop(&self) -> bool {
        self.loss_rate > 0.0 && rand::rng().random::<f64>() < self.loss_rate
    }
}
