//! Conduit wire format — the one-time-auth chunk framing.
//!
//! An authenticated stream is a sequence of independently verified chunks:
//!
//!   [length: 2B big-endian][tag: 10B][payload: length B]
//!
//! The layout is shared with every peer speaking the same scheme and must be
//! reproduced bit-exact. The header type is `#[repr(C)]` over unaligned
//! big-endian fields, so zerocopy can read and write it without any unsafe
//! code or manual byte shuffling.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Size of the payload length prefix.
pub const LEN_SIZE: usize = 2;

/// Size of the truncated HMAC-SHA1 tag carried by every chunk.
pub const TAG_SIZE: usize = 10;

/// Offset of the first payload byte within a chunk.
pub const HEADER_SIZE: usize = LEN_SIZE + TAG_SIZE;

/// Largest payload a single chunk can declare.
pub const MAX_CHUNK_PAYLOAD: usize = u16::MAX as usize;

// ── Chunk Header ──────────────────────────────────────────────────────────────

/// Header preceding every authenticated chunk.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct ChunkHeader {
    /// Payload length in bytes, not including this header.
    pub length: U16<BigEndian>,

    /// First 10 bytes of HMAC-SHA1 over the payload, keyed with the
    /// connection IV followed by the big-endian chunk counter.
    pub tag: [u8; TAG_SIZE],
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(ChunkHeader, [u8; HEADER_SIZE]);

impl ChunkHeader {
    /// Build a header for a payload of `payload_len` bytes.
    pub fn new(payload_len: usize, tag: [u8; TAG_SIZE]) -> Result<Self, WireError> {
        let length =
            u16::try_from(payload_len).map_err(|_| WireError::PayloadTooLarge(payload_len))?;
        Ok(Self {
            length: U16::new(length),
            tag,
        })
    }

    /// Parse a header from the first `HEADER_SIZE` bytes of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        Self::read_from_prefix(bytes).ok_or(WireError::Truncated(bytes.len()))
    }

    /// Declared payload length.
    pub fn payload_len(&self) -> usize {
        usize::from(self.length.get())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("chunk header needs {} bytes, got {0}", HEADER_SIZE)]
    Truncated(usize),

    #[error("payload length {0} exceeds maximum {}", MAX_CHUNK_PAYLOAD)]
    PayloadTooLarge(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
