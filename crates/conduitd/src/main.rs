//! conduitd — Conduit relay daemon.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use conduit_core::config::ConduitConfig;
use conduit_relay::BufferPool;
use conduitd::{new_session_table, SessionListener};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = ConduitConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ConduitConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ConduitConfig::default()
    });

    let listen = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.relay.listen.clone());
    tracing::info!(
        listen = %listen,
        upstream = %config.relay.upstream,
        mode = ?config.relay.mode,
        timeout_secs = config.relay.timeout_secs,
        "conduitd starting"
    );

    // One pool for every relay task in the process.
    let pool = BufferPool::new(config.pool.max_free, config.pool.buf_size);
    let sessions = new_session_table();

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let session_listener = SessionListener::new(
        listener,
        &config.relay,
        pool.clone(),
        sessions.clone(),
        shutdown_tx.subscribe(),
    );
    tracing::info!(addr = %session_listener.local_addr()?, "accepting sessions");
    let listener_task = tokio::spawn(session_listener.run());

    let session_printer = {
        let sessions = sessions.clone();
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                tracing::info!(
                    count = sessions.len(),
                    free_buffers = pool.free_count(),
                    "session table snapshot"
                );
                for s in sessions.iter() {
                    tracing::debug!(
                        session = *s.key(),
                        client = %s.client,
                        upstream = %s.upstream,
                        age_secs = s.started_at.elapsed().as_secs(),
                        "  session"
                    );
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()   => tracing::info!("shutting down"),
        r = listener_task        => tracing::error!("session listener exited: {:?}", r),
        r = session_printer      => tracing::error!("session printer exited: {:?}", r),
    }

    Ok(())
}
