//! Connection finite-state machine types.
//!
//! This module defines every state an endpoint can occupy.  Transitions are
//! driven by [`crate::connection`]; keeping the types separate makes it easy
//! to add guard logic or tracing without touching connection plumbing.
//!
//! ```text
//!  sender:    Closed ──SYN──▶ SynSent ──SYN-ACK──▶ Established
//!                                                       │ FIN
//!             Closed ◀── TimeWait ◀── peer FIN ◀── FinWait
//!
//!  receiver:  Listen ──SYN──▶ SynReceived ──ACK──▶ Established
//!                                                       │ peer FIN
//!             Closed ◀── last ACK ◀── LastAck ◀── CloseWait
//! ```

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection exists; initial and final state.
    Closed,
    /// Passive side waiting for a SYN.
    Listen,
    /// SYN has been sent; waiting for SYN-ACK.
    SynSent,
    /// SYN received, SYN-ACK sent; waiting for the final ACK.
    SynReceived,
    /// Three-phase handshake complete; data transfer in progress.
    Established,
    /// Local FIN sent; waiting for its ACK and the peer's FIN.
    FinWait,
    /// Peer's FIN acknowledged; final ACK sent.
    TimeWait,
    /// Peer's FIN received; local FIN pending.
    CloseWait,
    /// Local FIN sent from the passive side; waiting for the last ACK.
    LastAck,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Closed
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
