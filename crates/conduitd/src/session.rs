//! Session manager: accepts clients, dials the upstream, and spawns the two
//! relay directions of every session.
//!
//! In `ota` mode the client opens the stream with a fixed-length IV. That IV
//! keys the one-time-auth check on everything the client sends afterwards;
//! upstream → client traffic is relayed plainly.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use conduit_core::config::{RelayConfig, RelayMode};
use conduit_relay::{spawn_pipe, spawn_pipe_ota, BufferPool, OtaConn, TcpConn};

/// Metadata about a live session.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub client: SocketAddr,
    pub upstream: SocketAddr,
    pub mode: RelayMode,
    pub started_at: Instant,
}

/// Session table shared across all tasks.
pub type SessionTable = Arc<DashMap<u64, SessionMeta>>;

/// Create a new empty session table.
pub fn new_session_table() -> SessionTable {
    Arc::new(DashMap::new())
}

/// Per-session settings, cloned into every session task.
#[derive(Clone)]
struct SessionContext {
    upstream: String,
    timeout: Duration,
    mode: RelayMode,
    iv_len: usize,
    pool: BufferPool,
    sessions: SessionTable,
}

pub struct SessionListener {
    listener: TcpListener,
    ctx: SessionContext,
    next_id: AtomicU64,
    shutdown: broadcast::Receiver<()>,
}

impl SessionListener {
    pub fn new(
        listener: TcpListener,
        config: &RelayConfig,
        pool: BufferPool,
        sessions: SessionTable,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            ctx: SessionContext {
                upstream: config.upstream.clone(),
                timeout: config.timeout(),
                mode: config.mode,
                iv_len: config.iv_len,
                pool,
                sessions,
            },
            next_id: AtomicU64::new(0),
            shutdown,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("listener has no local address")
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("session listener shutting down");
                    return Ok(());
                }

                result = self.listener.accept() => {
                    let (stream, client) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };

                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let ctx = self.ctx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve(id, stream, client, ctx).await {
                            tracing::warn!(
                                session = id,
                                client = %client,
                                error = %e,
                                "session setup failed"
                            );
                        }
                    });
                }
            }
        }
    }
}

/// Run one session to completion: both relay directions have finished and
/// both sockets are closed when this returns `Ok`.
async fn serve(
    id: u64,
    mut stream: TcpStream,
    client: SocketAddr,
    ctx: SessionContext,
) -> Result<()> {
    let iv = match ctx.mode {
        RelayMode::Plain => None,
        RelayMode::Ota => Some(read_iv(&mut stream, ctx.iv_len, ctx.timeout).await?),
    };

    let upstream = TcpStream::connect(&ctx.upstream)
        .await
        .with_context(|| format!("failed to connect upstream {}", ctx.upstream))?;
    let upstream_addr = upstream.peer_addr().context("upstream has no peer address")?;

    ctx.sessions.insert(
        id,
        SessionMeta {
            client,
            upstream: upstream_addr,
            mode: ctx.mode,
            started_at: Instant::now(),
        },
    );
    tracing::info!(
        session = id,
        client = %client,
        upstream = %upstream_addr,
        mode = ?ctx.mode,
        "session established"
    );

    let client_conn = Arc::new(TcpConn::new(stream));
    let upstream_conn = Arc::new(TcpConn::new(upstream));

    let outbound = match iv {
        None => spawn_pipe(
            client_conn.clone(),
            upstream_conn.clone(),
            ctx.timeout,
            ctx.pool.clone(),
        ),
        Some(iv) => spawn_pipe_ota(
            Arc::new(OtaConn::new(client_conn.clone(), iv)),
            upstream_conn.clone(),
            ctx.timeout,
            ctx.pool.clone(),
        ),
    };
    let inbound = spawn_pipe(upstream_conn, client_conn, ctx.timeout, ctx.pool.clone());

    let (out_result, in_result) = tokio::join!(outbound, inbound);
    for result in [out_result, in_result] {
        if let Err(e) = result {
            tracing::error!(session = id, error = %e, "relay task panicked");
        }
    }

    if let Some((_, meta)) = ctx.sessions.remove(&id) {
        tracing::info!(
            session = id,
            client = %meta.client,
            duration_ms = meta.started_at.elapsed().as_millis() as u64,
            "session closed"
        );
    }
    Ok(())
}

/// Read the IV the client sends ahead of its first chunk.
async fn read_iv(stream: &mut TcpStream, iv_len: usize, timeout: Duration) -> Result<Vec<u8>> {
    let mut iv = vec![0u8; iv_len];
    if timeout.is_zero() {
        stream.read_exact(&mut iv).await.context("failed to read IV")?;
    } else {
        tokio::time::timeout(timeout, stream.read_exact(&mut iv))
            .await
            .context("timed out waiting for IV")?
            .context("failed to read IV")?;
    }
    Ok(iv)
}
