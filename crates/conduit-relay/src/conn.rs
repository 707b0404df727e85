//! Connection abstraction shared by both relay loops.
//!
//! A session holds each socket behind an `Arc` and hands clones to its two
//! relay tasks: one task reads the socket, the other writes to it. All methods
//! therefore take `&self`.

use std::future::Future;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::time::Instant;

/// A duplex byte stream a relay can read from or write to.
pub trait Connection: Send + Sync + 'static {
    /// Read up to `buf.len()` bytes. `Ok(0)` means end of stream.
    /// Fails with `io::ErrorKind::TimedOut` once the read deadline passes.
    fn read(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Write all of `buf`.
    fn write_all(&self, buf: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Shut the connection down in both directions. Idempotent.
    fn close(&self);

    /// Deadline applied to every subsequent read. `None` clears it.
    fn set_read_deadline(&self, deadline: Option<Instant>);

    fn remote_addr(&self) -> io::Result<SocketAddr>;
}

impl<C: Connection> Connection for Arc<C> {
    fn read(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        (**self).read(buf)
    }

    fn write_all(&self, buf: &[u8]) -> impl Future<Output = io::Result<()>> + Send {
        (**self).write_all(buf)
    }

    fn close(&self) {
        (**self).close()
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) {
        (**self).set_read_deadline(deadline)
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        (**self).remote_addr()
    }
}

/// Peer address for log fields, or `"unknown"` once the socket is gone.
pub(crate) fn peer_label<C: Connection>(conn: &C) -> String {
    conn.remote_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Closes the wrapped connection when dropped, so every exit path of a relay
/// (including a panic or the task being dropped) closes its destination once.
pub(crate) struct CloseOnDrop<'a, C: Connection>(pub(crate) &'a C);

impl<C: Connection> Drop for CloseOnDrop<'_, C> {
    fn drop(&mut self) {
        self.0.close();
    }
}

// ── TCP ───────────────────────────────────────────────────────────────────────

/// A TCP socket shared between the two relay tasks of a session.
pub struct TcpConn {
    stream: TcpStream,
    read_deadline: Mutex<Option<Instant>>,
    closed: AtomicBool,
}

impl TcpConn {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_deadline: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn read_ready(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            self.stream.readable().await?;
            match self.stream.try_read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Connection for TcpConn {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = *self
            .read_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match deadline {
            Some(at) => match tokio::time::timeout_at(at, self.read_ready(buf)).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "read deadline exceeded",
                )),
            },
            None => self.read_ready(buf).await,
        }
    }

    async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < buf.len() {
            self.stream.writable().await?;
            match self.stream.try_write(&buf[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Shutting down both directions wakes a task parked on this socket:
        // a pending read sees end of stream, a pending write fails.
        if let Err(e) = socket2::SockRef::from(&self.stream).shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                tracing::debug!(error = %e, "socket shutdown failed");
            }
        }
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) {
        *self
            .read_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = deadline;
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

// ── One-time auth ─────────────────────────────────────────────────────────────

/// A connection whose inbound stream is framed as authenticated chunks.
///
/// The IV is fixed at session setup. The chunk counter starts at zero and is
/// advanced once per chunk read from this connection.
pub struct OtaConn<C> {
    inner: C,
    iv: Bytes,
    chunk_id: AtomicU32,
}

impl<C: Connection> OtaConn<C> {
    pub fn new(inner: C, iv: impl Into<Bytes>) -> Self {
        Self {
            inner,
            iv: iv.into(),
            chunk_id: AtomicU32::new(0),
        }
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Counter value the next chunk will be verified with.
    pub fn chunk_id(&self) -> u32 {
        self.chunk_id.load(Ordering::Acquire)
    }

    /// Take the counter for the chunk just read and advance it.
    pub fn next_chunk_id(&self) -> u32 {
        self.chunk_id.fetch_add(1, Ordering::AcqRel)
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: Connection> Connection for OtaConn<C> {
    fn read(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        self.inner.read(buf)
    }

    fn write_all(&self, buf: &[u8]) -> impl Future<Output = io::Result<()>> + Send {
        self.inner.write_all(buf)
    }

    fn close(&self) {
        self.inner.close()
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.inner.set_read_deadline(deadline)
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        self.inner.remote_addr()
    }
}
