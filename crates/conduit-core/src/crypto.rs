//! One-time-auth primitives for Conduit.
//!
//! Every chunk on an authenticated stream carries a truncated HMAC-SHA1 tag:
//!
//!   key = iv || be32(chunk_id)
//!   tag = HMAC-SHA1(key, payload)[..10]
//!
//! The chunk counter starts at zero for each connection and advances once per
//! chunk, so the key differs for every record and a chunk cannot be replayed
//! at another position in the stream.
//!
//! There is no unsafe code in this module.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use zerocopy::AsBytes;

use crate::wire::{ChunkHeader, WireError, HEADER_SIZE, TAG_SIZE};

type HmacSha1 = Hmac<Sha1>;

// ── Tags ──────────────────────────────────────────────────────────────────────

/// Build the per-chunk HMAC key: the connection IV followed by the
/// big-endian chunk counter.
pub fn chunk_key(iv: &[u8], chunk_id: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(iv.len() + 4);
    key.extend_from_slice(iv);
    key.extend_from_slice(&chunk_id.to_be_bytes());
    key
}

/// Compute the 10-byte tag for one chunk payload.
pub fn chunk_tag(iv: &[u8], chunk_id: u32, payload: &[u8]) -> [u8; TAG_SIZE] {
    let key = chunk_key(iv, chunk_id);
    // HMAC pads or hashes the key, so every key length is valid.
    let mut mac = HmacSha1::new_from_slice(&key).expect("HMAC accepts keys of any length");
    mac.update(payload);
    let digest = mac.finalize().into_bytes();

    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&digest[..TAG_SIZE]);
    tag
}

/// Constant-time tag comparison.
pub fn tags_match(expected: &[u8; TAG_SIZE], received: &[u8; TAG_SIZE]) -> bool {
    expected[..].ct_eq(&received[..]).into()
}

// ── Sealing ───────────────────────────────────────────────────────────────────

/// Append one complete wire chunk (header + payload) for `payload` to `out`.
pub fn seal_chunk(
    iv: &[u8],
    chunk_id: u32,
    payload: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), WireError> {
    let header = ChunkHeader::new(payload.len(), chunk_tag(iv, chunk_id, payload))?;
    out.reserve(HEADER_SIZE + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Sender side of an authenticated stream.
///
/// Assigns chunk counters in the same order the receiving relay consumes
/// them, starting from zero.
pub struct ChunkSealer {
    iv: Vec<u8>,
    next_id: u32,
}

impl ChunkSealer {
    pub fn new(iv: impl Into<Vec<u8>>) -> Self {
        Self {
            iv: iv.into(),
            next_id: 0,
        }
    }

    /// Counter value the next sealed chunk will use.
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Seal `payload` as the next chunk and append it to `out`.
    pub fn seal(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<(), WireError> {
        seal_chunk(&self.iv, self.next_id, payload, out)?;
        self.next_id = self.next_id.wrapping_add(1);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
