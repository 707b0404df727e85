use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Plain sessions
// ══════════════════════════════════════════════════════════════════════════════

fn pool() -> BufferPool {
    BufferPool::new(64, 4108)
}

/// Bytes go out through one relay task and come back through the other.
#[tokio::test]
async fn test_plain_session_echoes_both_directions() -> Result<()> {
    let upstream = spawn_echo_upstream().await?;
    let daemon = start_daemon(upstream, RelayMode::Plain, 0, pool()).await?;

    let mut client = TcpStream::connect(daemon.addr).await?;
    send_all(&mut client, b"hello through the tunnel").await?;

    let mut echoed = [0u8; 24];
    tokio::time::timeout(WAIT, client.read_exact(&mut echoed)).await??;
    assert_eq!(&echoed, b"hello through the tunnel");
    assert_eq!(daemon.sessions.len(), 1);
    Ok(())
}

/// A transfer larger than one pooled buffer arrives intact and in order.
#[tokio::test]
async fn test_plain_session_relays_large_transfer() -> Result<()> {
    let (upstream, received) = spawn_capture_upstream().await?;
    let daemon = start_daemon(upstream, RelayMode::Plain, 0, pool()).await?;

    let payload: Vec<u8> = (0..256 * 1024u32).map(|i| (i % 253) as u8).collect();
    let mut client = TcpStream::connect(daemon.addr).await?;
    send_all(&mut client, &payload).await?;
    client.shutdown().await?;

    let received = tokio::time::timeout(WAIT, received).await??;
    assert_eq!(received.len(), payload.len());
    assert_eq!(received, payload);
    Ok(())
}

/// Closing the client ends the outbound relay, which closes the upstream,
/// which ends the inbound relay. The session disappears from the table and
/// both pooled buffers go back to the pool.
#[tokio::test]
async fn test_client_close_tears_down_session() -> Result<()> {
    let upstream = spawn_echo_upstream().await?;
    let daemon = start_daemon(upstream, RelayMode::Plain, 0, pool()).await?;

    let mut client = TcpStream::connect(daemon.addr).await?;
    send_all(&mut client, b"bye").await?;
    let mut echoed = [0u8; 3];
    tokio::time::timeout(WAIT, client.read_exact(&mut echoed)).await??;
    assert_eq!(&echoed, b"bye");

    client.shutdown().await?;
    let rest = read_until_closed(&mut client).await?;
    assert!(rest.is_empty());

    wait_for_no_sessions(&daemon.sessions).await?;
    assert_eq!(daemon.pool.free_count(), 2);
    Ok(())
}

/// With an inactivity timeout, an idle session is closed by the daemon.
#[tokio::test]
async fn test_idle_session_times_out() -> Result<()> {
    let upstream = spawn_echo_upstream().await?;
    let daemon = start_daemon(upstream, RelayMode::Plain, 1, pool()).await?;

    let mut client = TcpStream::connect(daemon.addr).await?;
    send_all(&mut client, b"ping").await?;
    let mut echoed = [0u8; 4];
    tokio::time::timeout(WAIT, client.read_exact(&mut echoed)).await??;

    // Go quiet; the deadline fires about a second after the last read.
    let rest = read_until_closed(&mut client).await?;
    assert!(rest.is_empty());
    wait_for_no_sessions(&daemon.sessions).await?;
    Ok(())
}

/// Unreachable upstream: the client connection is dropped, no session is
/// recorded.
#[tokio::test]
async fn test_unreachable_upstream_drops_client() -> Result<()> {
    let unused = TcpListener::bind("127.0.0.1:0").await?;
    let dead_addr = unused.local_addr()?;
    drop(unused);

    let daemon = start_daemon(dead_addr, RelayMode::Plain, 0, pool()).await?;
    let mut client = TcpStream::connect(daemon.addr).await?;

    let rest = read_until_closed(&mut client).await?;
    assert!(rest.is_empty());
    assert!(daemon.sessions.is_empty());
    Ok(())
}
