//! Integration tests against a local, unencrypted TCP server standing in for
//! a broker. TLS handshake and trust-pinning behavior is covered by the unit
//! tests in `src/tls_trust.rs` and `src/cert.rs`; these exercise the
//! reconnect/backoff/dispose behavior of the running loop end to end.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use kafka_transport::{
    cert::FileCertificateStore, tls_trust::NullTrustedPeerStore, Endpoint, TransportError,
    TransportEvent, TransportHandle, TransportOptions, WritePayload,
};

/// Mirrors `integration_tests/common.rs::setup`'s subscriber init, minus the
/// file sink: each test just needs `RUST_LOG`-filtered output on failure,
/// and `try_init` tolerates the repeated calls one `#[tokio::test]` per
/// function produces within a single test binary.
fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn no_tls_deps() -> (Arc<FileCertificateStore>, Arc<NullTrustedPeerStore>) {
    (
        Arc::new(FileCertificateStore::new(std::env::temp_dir())),
        Arc::new(NullTrustedPeerStore),
    )
}

async fn local_listener() -> Result<(TcpListener, Endpoint)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    Ok((listener, Endpoint::new("127.0.0.1", port)))
}

fn request_payload(bytes: &[u8]) -> WritePayload {
    WritePayload {
        buffer: bytes.to_vec(),
        correlation_id: 1,
        api_key: 18,
        message_count: 1,
    }
}

#[tokio::test]
async fn echoes_a_single_request() -> Result<()> {
    init_tracing();
    let (listener, endpoint) = local_listener().await?;
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        socket.read_exact(&mut buf).await.unwrap();
        socket.write_all(&buf).await.unwrap();
    });

    let (cert_store, trusted_peers) = no_tls_deps();
    let transport = TransportHandle::new(
        endpoint,
        TransportOptions::default(),
        cert_store,
        trusted_peers,
    );

    transport.write_async(request_payload(b"hello"), None).await?;
    let response = transport.read_async(5, None).await?;
    assert_eq!(response, b"hello");

    transport.dispose().await;
    Ok(())
}

#[tokio::test]
async fn split_read_is_reassembled_across_socket_writes() -> Result<()> {
    init_tracing();
    let (listener, endpoint) = local_listener().await?;
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(b"ab").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        socket.write_all(b"cde").await.unwrap();
    });

    let (cert_store, trusted_peers) = no_tls_deps();
    let transport = TransportHandle::new(
        endpoint,
        TransportOptions::default(),
        cert_store,
        trusted_peers,
    );

    let response = transport.read_async(5, None).await?;
    assert_eq!(response, b"abcde");

    transport.dispose().await;
    Ok(())
}

#[tokio::test]
async fn mid_stream_disconnect_fails_the_in_flight_request_then_reconnects() -> Result<()> {
    init_tracing();
    let (listener, endpoint) = local_listener().await?;
    tokio::spawn(async move {
        // First connection closes before sending anything: the in-flight
        // read observes EOF.
        let (socket, _) = listener.accept().await.unwrap();
        drop(socket);

        // The loop reconnects automatically for the next request.
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(b"pong").await.unwrap();
    });

    let (cert_store, trusted_peers) = no_tls_deps();
    let mut options = TransportOptions::default();
    options.initial_backoff_ms = 5;
    let transport = TransportHandle::new(endpoint, options, cert_store, trusted_peers);

    let first = transport.read_async(4, None).await;
    assert!(matches!(first, Err(ref err) if err.terminates_session()));

    let second = transport.read_async(4, None).await?;
    assert_eq!(second, b"pong");

    transport.dispose().await;
    Ok(())
}

#[tokio::test]
async fn connect_failures_retry_with_increasing_attempts() -> Result<()> {
    init_tracing();
    // Reserve a port, then close the listener so it actively refuses
    // connections without a server ever having accepted one.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    let endpoint = Endpoint::new("127.0.0.1", port);

    let (cert_store, trusted_peers) = no_tls_deps();
    let mut options = TransportOptions::default();
    options.initial_backoff_ms = 5;
    options.max_reconnect_backoff = Duration::from_millis(20);
    let transport = TransportHandle::new(endpoint, options, cert_store, trusted_peers);

    let mut events = transport.subscribe();
    let mut last_attempt = 0;
    while last_attempt < 3 {
        if let TransportEvent::ReconnectionAttempt { attempt, .. } = events.recv().await? {
            last_attempt = attempt;
        }
    }
    assert!(last_attempt >= 3);

    transport.dispose().await;
    Ok(())
}

#[tokio::test]
async fn dispose_while_idle_completes_promptly() -> Result<()> {
    init_tracing();
    let (listener, endpoint) = local_listener().await?;
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3600)).await;
    });

    let (cert_store, trusted_peers) = no_tls_deps();
    let transport = TransportHandle::new(
        endpoint,
        TransportOptions::default(),
        cert_store,
        trusted_peers,
    );

    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = std::time::Instant::now();
    transport.dispose().await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(transport.is_disposed());
    Ok(())
}

#[tokio::test]
async fn dispose_during_long_read_fails_it_with_disposed() -> Result<()> {
    init_tracing();
    let (listener, endpoint) = local_listener().await?;
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        // One byte now; the remaining 10 MB never arrive.
        socket.write_all(b"a").await.unwrap();
        tokio::time::sleep(Duration::from_secs(3600)).await;
    });

    let (cert_store, trusted_peers) = no_tls_deps();
    let transport = TransportHandle::new(
        endpoint,
        TransportOptions::default(),
        cert_store,
        trusted_peers,
    );

    let reader = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move { transport.read_async(10 * 1024 * 1024, None).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    transport.dispose().await;
    assert!(started.elapsed() < Duration::from_secs(1));

    let result = reader.await?;
    assert!(matches!(result, Err(TransportError::Disposed)));
    Ok(())
}
