//! Plain byte relay.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::conn::{peer_label, CloseOnDrop, Connection};
use crate::deadline::apply_read_deadline;
use crate::error::{RelayError, RelayStats};
use crate::pool::BufferPool;

/// Copy `src` into `dst` until `src` ends or either side fails, then close
/// `dst`. Failures are logged here; nothing is reported to the caller.
pub async fn pipe_then_close<S, D>(src: S, dst: D, timeout: Duration, pool: BufferPool)
where
    S: Connection,
    D: Connection,
{
    let (end, stats) = run(&src, &dst, timeout, &pool).await;
    log_end(&src, &dst, &end, stats);
}

/// Spawn [`pipe_then_close`] as its own task.
///
/// The handle yields nothing; a finished relay is visible only through its
/// closed destination.
pub fn spawn_pipe<S, D>(src: S, dst: D, timeout: Duration, pool: BufferPool) -> JoinHandle<()>
where
    S: Connection,
    D: Connection,
{
    tokio::spawn(pipe_then_close(src, dst, timeout, pool))
}

/// Relay loop. Returns why it stopped once `dst` has been closed and the
/// buffer handed back.
pub(crate) async fn run<S, D>(
    src: &S,
    dst: &D,
    timeout: Duration,
    pool: &BufferPool,
) -> (RelayError, RelayStats)
where
    S: Connection,
    D: Connection,
{
    let _close = CloseOnDrop(dst);
    let mut buf = pool.acquire();
    let mut stats = RelayStats::default();

    loop {
        match copy_once(src, dst, timeout, &mut buf).await {
            Ok(n) => {
                stats.bytes += n as u64;
                stats.chunks += 1;
            }
            Err(end) => return (end, stats),
        }
    }
}

/// One read and, if it produced anything, one write of exactly those bytes.
async fn copy_once<S, D>(
    src: &S,
    dst: &D,
    timeout: Duration,
    buf: &mut [u8],
) -> Result<usize, RelayError>
where
    S: Connection,
    D: Connection,
{
    apply_read_deadline(src, timeout);
    let n = src.read(buf).await.map_err(RelayError::from_read)?;
    if n == 0 {
        return Err(RelayError::EndOfStream);
    }
    dst.write_all(&buf[..n])
        .await
        .map_err(RelayError::from_write)?;
    Ok(n)
}

fn log_end<S: Connection, D: Connection>(src: &S, dst: &D, end: &RelayError, stats: RelayStats) {
    match end {
        RelayError::EndOfStream => tracing::debug!(
            src = %peer_label(src),
            dst = %peer_label(dst),
            bytes = stats.bytes,
            "source closed, relay finished"
        ),
        RelayError::Timeout => tracing::debug!(
            src = %peer_label(src),
            bytes = stats.bytes,
            "source idle past deadline, relay finished"
        ),
        e => tracing::warn!(
            src = %peer_label(src),
            dst = %peer_label(dst),
            bytes = stats.bytes,
            error = %e,
            "relay failed"
        ),
    }
}
