//! `rudp` — reliable file transfer over an unreliable datagram service.
//!
//! A single flow carries one file from a sender endpoint to a receiver
//! endpoint with ordered, complete, and uncorrupted delivery despite packet
//! loss, reordering, duplication, and corruption on the link.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   DATA segments    ┌──────────┐
//!  │  Sender  │───────────────────▶│ Receiver │
//!  └────┬─────┘                    └─────┬────┘
//!       │       ACK + SACK + wnd         │
//!       │◀────────────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │           Connection              │
//!  │ (handshake / teardown, owns the   │
//!  │  socket and the peer address)     │
//!  └────┬──────────────────────────────┘
//!       │ packets
//!  ┌────▼──────┐     ┌───────────────┐
//!  │  Socket   │────▶│  Link shim    │  (loss + delay, sender only)
//!  └───────────┘     └───────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     — wire format (header, checksum, SACK payload)
//! - [`link`]       — emulated loss and delay on the forward path
//! - [`socket`]     — packet-oriented UDP socket
//! - [`state`]      — finite-state-machine types
//! - [`connection`] — three-phase handshake, four-phase termination
//! - [`receiver`]   — reassembly buffer and the receive loop
//! - [`congestion`] — Reno congestion control
//! - [`sender`]     — sliding send window and the transmit loop
//! - [`stats`]      — transfer statistics and the final report

pub mod congestion;
pub mod connection;
pub mod link;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod socket;
pub mod state;
pub mod stats;
