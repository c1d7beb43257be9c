//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is a [`Packet`]: a fixed 16-byte
//! header followed by up to [`MAX_PAYLOAD`] payload bytes.  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission,
//!   including the ones'-complement checksum over the whole datagram.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for truncated, inconsistent, or corrupted input.
//! - Encoding and decoding the selective-ack block list carried as the
//!   payload of ACK packets.
//!
//! No I/O happens here; this is pure data transformation.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Wire constants
// ---------------------------------------------------------------------------

/// Size of the fixed packet header in bytes.
///
/// seq (4) + ack (4) + len (2) + wnd (2) + checksum (2) + flags (1)
/// + reserved (1).
pub const HEADER_LEN: usize = 16;

/// Maximum payload bytes per data packet (one segment).
pub const MAX_PAYLOAD: usize = 1000;

/// Default receive window advertised by the receiver, in packets.
pub const DEFAULT_RECV_WINDOW: u16 = 64;

/// Maximum number of selective-ack ranges carried by a single ACK.
pub const MAX_SACK_BLOCKS: usize = 4;

/// Receive buffer size: one full datagram.
pub const MAX_DATAGRAM: usize = HEADER_LEN + MAX_PAYLOAD;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u8 = 0x01;
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 0x02;
    /// Finish; sender has no more data to send.
    pub const FIN: u8 = 0x04;
    /// Packet carries a data segment.
    pub const DATA: u8 = 0x08;
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Fixed-size protocol header.  Multi-byte fields travel in network byte
/// order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    /// Sequence number of this packet (meaningful for DATA, SYN, FIN).
    /// Data segments are numbered 1, 2, 3, ... per segment, not per byte.
    pub seq: u32,
    /// Cumulative acknowledgement: every sequence strictly below this value
    /// has been received.
    pub ack: u32,
    /// Payload length in bytes, 0..=MAX_PAYLOAD.
    pub len: u16,
    /// Receiver's advertised available window, in packets.
    pub wnd: u16,
    /// Ones'-complement checksum over the whole datagram, computed with this
    /// field set to zero.
    pub checksum: u16,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    /// Must be zero on send; ignored on receive.
    pub reserved: u8,
}

impl Header {
    /// `true` when this is a pure acknowledgement: ACK set and none of
    /// SYN / FIN / DATA.  Pure ACKs bypass the link-emulation shim.
    pub fn is_pure_ack(&self) -> bool {
        self.flags & flags::ACK != 0
            && self.flags & (flags::SYN | flags::FIN | flags::DATA) == 0
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// Fills in the `len` field from the payload and computes the checksum
    /// over the serialised buffer with the checksum field zeroed.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header.seq.to_be_bytes());
        buf.extend_from_slice(&self.header.ack.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.header.wnd.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes()); // checksum placeholder
        buf.push(self.header.flags);
        buf.push(0); // reserved is always zero on the wire
        buf.extend_from_slice(&self.payload);

        let sum = checksum16(&buf);
        buf[12..14].copy_from_slice(&sum.to_be_bytes());
        buf
    }

    /// Parse a [`Packet`] from a raw datagram.
    ///
    /// Returns `Err` if the buffer is shorter than the header, the checksum
    /// does not verify, or the `len` field disagrees with the actual payload.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }

        let stored = u16::from_be_bytes([buf[12], buf[13]]);
        let mut scratch = buf.to_vec();
        scratch[12] = 0;
        scratch[13] = 0;
        if checksum16(&scratch) != stored {
            return Err(PacketError::ChecksumFailed);
        }

        let header = Header {
            seq: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            ack: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            len: u16::from_be_bytes([buf[8], buf[9]]),
            wnd: u16::from_be_bytes([buf[10], buf[11]]),
            checksum: stored,
            flags: buf[14],
            reserved: buf[15],
        };

        let payload = buf[HEADER_LEN..].to_vec();
        if header.len as usize != payload.len() {
            return Err(PacketError::LengthMismatch);
        }

        Ok(Self { header, payload })
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("datagram shorter than the {HEADER_LEN}-byte header")]
    BufferTooShort,
    /// `len` field does not match the actual remaining bytes.
    #[error("len field does not match payload length")]
    LengthMismatch,
    /// Checksum did not match the recomputed value.
    #[error("checksum mismatch")]
    ChecksumFailed,
}

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

/// 16-bit Internet-style checksum.
///
/// Sums big-endian 16-bit words with end-around carry; an odd trailing byte
/// is the high byte of a zero-padded word.  Returns the ones' complement of
/// the final sum.
pub fn checksum16(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
        if sum & 0x1_0000 != 0 {
            sum = (sum & 0xFFFF) + 1;
        }
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
        if sum & 0x1_0000 != 0 {
            sum = (sum & 0xFFFF) + 1;
        }
    }
    !(sum as u16)
}

// ---------------------------------------------------------------------------
// Selective-ack payload
// ---------------------------------------------------------------------------

/// One contiguous run of out-of-order segments held by the receiver,
/// inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SackBlock {
    pub start: u32,
    pub end: u32,
}

/// Encode a SACK block list as an ACK payload: a 16-bit count followed by
/// `(start, end)` pairs, all in network byte order.
pub fn encode_sack(blocks: &[SackBlock]) -> Vec<u8> {
    debug_assert!(blocks.len() <= MAX_SACK_BLOCKS);
    let mut buf = Vec::with_capacity(2 + blocks.len() * 8);
    buf.extend_from_slice(&(blocks.len() as u16).to_be_bytes());
    for blk in blocks {
        buf.extend_from_slice(&blk.start.to_be_bytes());
        buf.extend_from_slice(&blk.end.to_be_bytes());
    }
    buf
}

/// Decode the SACK block list from an ACK payload.
///
/// Absent or malformed payloads decode to an empty list: selective acks are
/// advisory and the sender must cope without them.  The count is capped at
/// [`MAX_SACK_BLOCKS`] and a truncated block list is read up to the
/// truncation point.
pub fn decode_sack(payload: &[u8]) -> Vec<SackBlock> {
    if payload.len() < 2 {
        return Vec::new();
    }
    let count = usize::from(u16::from_be_bytes([payload[0], payload[1]])).min(MAX_SACK_BLOCKS);

    let mut blocks = Vec::with_capacity(count);
    let mut offset = 2;
    for _ in 0..count {
        if offset + 8 > payload.len() {
            break;
        }
        let start = u32::from_be_bytes(payload[offset..offset + 4].try_into().unwrap());
        let end = u32::from_be_bytes(payload[offset + 4..offset + 8].try_into().unwrap());
        blocks.push(SackBlock { start, end });
        offset += 8;
    }
    blocks
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
