use conduit_core::crypto::{seal_chunk, ChunkSealer};
use conduit_core::HEADER_SIZE;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  One-time-auth sessions
// ══════════════════════════════════════════════════════════════════════════════

const IV: [u8; IV_LEN] = [0x5a; IV_LEN];

fn pool() -> BufferPool {
    BufferPool::new(64, 4108)
}

fn sealed_stream(parts: &[&[u8]]) -> Vec<u8> {
    let mut sealer = ChunkSealer::new(IV.to_vec());
    let mut out = IV.to_vec();
    for part in parts {
        sealer.seal(part, &mut out).unwrap();
    }
    out
}

/// Verified payloads reach the upstream with the framing stripped.
#[tokio::test]
async fn test_ota_session_forwards_verified_payloads() -> Result<()> {
    let (upstream, received) = spawn_capture_upstream().await?;
    let daemon = start_daemon(upstream, RelayMode::Ota, 0, pool()).await?;

    let mut client = TcpStream::connect(daemon.addr).await?;
    send_all(&mut client, &sealed_stream(&[b"GET / HTTP/1.1\r\n", b"Host: a\r\n", b"\r\n"])).await?;
    client.shutdown().await?;

    let received = tokio::time::timeout(WAIT, received).await??;
    assert_eq!(received, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");

    read_until_closed(&mut client).await?;
    wait_for_no_sessions(&daemon.sessions).await?;
    Ok(())
}

/// A chunk whose payload exceeds the pooled buffer is still verified and
/// forwarded.
#[tokio::test]
async fn test_ota_session_forwards_oversized_chunk() -> Result<()> {
    let (upstream, received) = spawn_capture_upstream().await?;
    let daemon = start_daemon(upstream, RelayMode::Ota, 0, pool()).await?;

    let big: Vec<u8> = (0..60_000u32).map(|i| (i % 241) as u8).collect();
    assert!(big.len() > daemon.pool.buf_size() - HEADER_SIZE);

    let mut client = TcpStream::connect(daemon.addr).await?;
    send_all(&mut client, &sealed_stream(&[b"small", &big, b"tail"])).await?;
    client.shutdown().await?;

    let received = tokio::time::timeout(WAIT, received).await??;
    let mut expected = b"small".to_vec();
    expected.extend_from_slice(&big);
    expected.extend_from_slice(b"tail");
    assert_eq!(received, expected);
    Ok(())
}

/// The first chunk that fails verification ends the session. Chunks before
/// it are delivered, nothing after it is.
#[tokio::test]
async fn test_ota_session_drops_on_tampered_chunk() -> Result<()> {
    let (upstream, received) = spawn_capture_upstream().await?;
    let daemon = start_daemon(upstream, RelayMode::Ota, 0, pool()).await?;

    let mut stream = IV.to_vec();
    seal_chunk(&IV, 0, b"trusted", &mut stream).unwrap();
    let tampered_at = stream.len();
    seal_chunk(&IV, 1, b"tampered", &mut stream).unwrap();
    seal_chunk(&IV, 2, b"after", &mut stream).unwrap();
    // Flip one payload bit of the second chunk.
    stream[tampered_at + HEADER_SIZE] ^= 0x01;

    let mut client = TcpStream::connect(daemon.addr).await?;
    send_all(&mut client, &stream).await?;

    let received = tokio::time::timeout(WAIT, received).await??;
    assert_eq!(received, b"trusted");

    // The daemon closes the client side too, without the client hanging up.
    read_until_closed(&mut client).await?;
    wait_for_no_sessions(&daemon.sessions).await?;
    Ok(())
}

/// Chunks signed under a different IV never verify.
#[tokio::test]
async fn test_ota_session_rejects_wrong_iv() -> Result<()> {
    let (upstream, received) = spawn_capture_upstream().await?;
    let daemon = start_daemon(upstream, RelayMode::Ota, 0, pool()).await?;

    let mut stream = IV.to_vec();
    seal_chunk(&[0x11; IV_LEN], 0, b"forged", &mut stream).unwrap();

    let mut client = TcpStream::connect(daemon.addr).await?;
    send_all(&mut client, &stream).await?;

    let received = tokio::time::timeout(WAIT, received).await??;
    assert!(received.is_empty());
    Ok(())
}

/// Responses from the upstream are relayed back plainly.
#[tokio::test]
async fn test_ota_session_returns_upstream_bytes_plainly() -> Result<()> {
    let upstream = spawn_echo_upstream().await?;
    let daemon = start_daemon(upstream, RelayMode::Ota, 0, pool()).await?;

    let mut client = TcpStream::connect(daemon.addr).await?;
    send_all(&mut client, &sealed_stream(&[b"echo ", b"me"])).await?;

    let mut echoed = [0u8; 7];
    tokio::time::timeout(WAIT, client.read_exact(&mut echoed)).await??;
    assert_eq!(&echoed, b"echo me");
    Ok(())
}
