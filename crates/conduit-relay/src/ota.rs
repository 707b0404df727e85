//! One-time-auth chunk relay.
//!
//! The source stream is a sequence of `[len:2][tag:10][payload:len]` chunks.
//! Each payload is forwarded only after its tag verifies against the
//! connection IV and the chunk counter. The first framing or authentication
//! failure ends the relay: once one tag is wrong the chunk boundaries that
//! follow cannot be trusted, so there is no skipping and no resync.

use std::time::Duration;

use conduit_core::crypto::{chunk_tag, tags_match};
use conduit_core::{ChunkHeader, HEADER_SIZE};
use tokio::task::JoinHandle;

use crate::conn::{peer_label, CloseOnDrop, Connection, OtaConn};
use crate::deadline::apply_read_deadline;
use crate::error::{RelayError, RelayStats, Stage};
use crate::pool::BufferPool;

/// Relay authenticated chunks from `src` to `dst`, forwarding verified
/// payloads only, then close `dst`. Failures are logged here; nothing is
/// reported to the caller.
pub async fn pipe_then_close_ota<C, D>(
    src: std::sync::Arc<OtaConn<C>>,
    dst: D,
    timeout: Duration,
    pool: BufferPool,
) where
    C: Connection,
    D: Connection,
{
    let (end, stats) = run(&src, &dst, timeout, &pool).await;
    log_end(&*src, &dst, &end, stats);
}

/// Spawn [`pipe_then_close_ota`] as its own task.
pub fn spawn_pipe_ota<C, D>(
    src: std::sync::Arc<OtaConn<C>>,
    dst: D,
    timeout: Duration,
    pool: BufferPool,
) -> JoinHandle<()>
where
    C: Connection,
    D: Connection,
{
    tokio::spawn(pipe_then_close_ota(src, dst, timeout, pool))
}

pub(crate) async fn run<C, D>(
    src: &OtaConn<C>,
    dst: &D,
    timeout: Duration,
    pool: &BufferPool,
) -> (RelayError, RelayStats)
where
    C: Connection,
    D: Connection,
{
    let _close = CloseOnDrop(dst);
    let mut buf = pool.acquire();
    debug_assert!(buf.len() >= HEADER_SIZE, "pool buffers must hold a chunk header");
    let mut stats = RelayStats::default();

    loop {
        match relay_chunk(src, dst, timeout, &mut buf).await {
            Ok(n) => {
                stats.bytes += n as u64;
                stats.chunks += 1;
            }
            Err(end) => return (end, stats),
        }
    }
}

/// Read, verify and forward one chunk. Returns the payload length.
async fn relay_chunk<C, D>(
    src: &OtaConn<C>,
    dst: &D,
    timeout: Duration,
    buf: &mut [u8],
) -> Result<usize, RelayError>
where
    C: Connection,
    D: Connection,
{
    apply_read_deadline(src, timeout);

    let (head, tail) = buf.split_at_mut(HEADER_SIZE);
    read_full(src, head, Stage::Header).await?;
    let header = ChunkHeader::parse(head)?;
    let len = header.payload_len();

    // Pool buffers are never grown; a chunk too large for the tail gets its
    // own allocation, dropped with this call.
    let mut dedicated: Vec<u8>;
    let payload: &mut [u8] = if tail.len() >= len {
        &mut tail[..len]
    } else {
        dedicated = vec![0u8; len];
        &mut dedicated[..]
    };
    read_full(src, payload, Stage::Payload).await?;

    // Advanced before the tag check: a rejected chunk still consumes its value.
    let chunk_id = src.next_chunk_id();
    let expected = chunk_tag(src.iv(), chunk_id, payload);
    if !tags_match(&expected, &header.tag) {
        return Err(RelayError::AuthMismatch {
            chunk_id,
            len,
            expected,
            received: header.tag,
        });
    }

    dst.write_all(payload)
        .await
        .map_err(RelayError::from_write)?;
    Ok(len)
}

/// Fill `buf` completely.
///
/// End of stream before the first byte is `EndOfStream`; end of stream after
/// a partial fill is `ShortRead`.
async fn read_full<C: Connection>(
    src: &C,
    buf: &mut [u8],
    stage: Stage,
) -> Result<(), RelayError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = src
            .read(&mut buf[filled..])
            .await
            .map_err(RelayError::from_read)?;
        if n == 0 {
            return Err(if filled == 0 {
                RelayError::EndOfStream
            } else {
                RelayError::ShortRead {
                    stage,
                    expected: buf.len(),
                    got: filled,
                }
            });
        }
        filled += n;
    }
    Ok(())
}

fn log_end<C: Connection, D: Connection>(
    src: &OtaConn<C>,
    dst: &D,
    end: &RelayError,
    stats: RelayStats,
) {
    match end {
        RelayError::EndOfStream => tracing::debug!(
            src = %peer_label(src),
            chunks = stats.chunks,
            bytes = stats.bytes,
            "source closed, authenticated relay finished"
        ),
        RelayError::Timeout => tracing::debug!(
            src = %peer_label(src),
            chunks = stats.chunks,
            "source idle past deadline, authenticated relay finished"
        ),
        RelayError::AuthMismatch {
            chunk_id,
            len,
            expected,
            received,
        } => tracing::warn!(
            src = %peer_label(src),
            dst = %peer_label(dst),
            iv = hex::encode(src.iv()),
            chunk_id,
            len,
            expected = hex::encode(expected),
            received = hex::encode(received),
            "chunk authentication failed, dropping relay"
        ),
        e => tracing::warn!(
            src = %peer_label(src),
            dst = %peer_label(dst),
            chunk_id = src.chunk_id(),
            error = %e,
            "authenticated relay failed"
        ),
    }
}
