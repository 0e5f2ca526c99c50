//! Integration tests for the stream-socket transport against a real
//! loopback listener.

use std::time::Duration;

use shardnet_transport::{
    CancellationToken, TcpTransport, Transport, TransportError, TransportState,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("should bind");
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

#[tokio::test]
async fn test_tcp_connect_send_receive_close() {
    let (listener, addr) = listener().await;
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"from server").await.unwrap();
        let mut buf = [0u8; 11];
        sock.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"from client");
        // Dropping the socket closes the connection.
    });

    let cancel = CancellationToken::new();
    let transport = TcpTransport::new();
    assert_eq!(transport.state(), TransportState::Disconnected);
    transport.connect(&addr, &cancel).await.expect("should connect");
    assert_eq!(transport.state(), TransportState::Connected);
    assert!(transport.local_addr().is_some());

    let mut buf = [0u8; 64];
    let mut got = Vec::new();
    while got.len() < 11 {
        let n = transport.receive(&mut buf, &cancel).await.unwrap();
        assert!(n > 0);
        got.extend_from_slice(&buf[..n]);
    }
    assert_eq!(got, b"from server");

    let mut sent = 0;
    while sent < 11 {
        sent += transport.send(&b"from client"[sent..], &cancel).await.unwrap();
    }

    server.await.unwrap();
    assert_eq!(transport.receive(&mut buf, &cancel).await.unwrap(), 0);

    transport.disconnect().await.unwrap();
    transport.disconnect().await.unwrap();
    assert_eq!(transport.state(), TransportState::Disconnected);
    assert!(transport.local_addr().is_none());
}

#[tokio::test]
async fn test_tcp_accepts_scheme_prefix() {
    let (listener, addr) = listener().await;
    let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

    let transport = TcpTransport::new();
    transport
        .connect(&format!("tcp://{addr}"), &CancellationToken::new())
        .await
        .expect("should connect");
    accept.await.unwrap();
}

#[tokio::test]
async fn test_tcp_connect_refused() {
    let (listener, addr) = listener().await;
    drop(listener);

    let transport = TcpTransport::new();
    let err = transport
        .connect(&addr, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::ConnectFailed { .. }), "{err}");
    assert_eq!(transport.state(), TransportState::Disconnected);
}

#[tokio::test]
async fn test_tcp_receive_observes_cancellation() {
    let (listener, addr) = listener().await;
    let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

    let cancel = CancellationToken::new();
    let transport = TcpTransport::new();
    transport.connect(&addr, &cancel).await.unwrap();
    let _server_side = accept.await.unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let mut buf = [0u8; 16];
    let err = transport.receive(&mut buf, &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_tcp_operations_before_connect_fail() {
    let transport = TcpTransport::new();
    let cancel = CancellationToken::new();
    let mut buf = [0u8; 4];
    assert!(matches!(
        transport.receive(&mut buf, &cancel).await,
        Err(TransportError::NotConnected)
    ));
    assert!(matches!(
        transport.send(b"x", &cancel).await,
        Err(TransportError::NotConnected)
    ));
}
