use bytes::{Bytes, BytesMut};
use snapsync_network::protocol::{read_message, write_message, Message, PROTOCOL_VERSION};
use snapsync_network::{ReplicaServer, ServerConfig, TcpTransportClient, TransportConfig};
use snapsync_state::{TransportClient, TransportError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Accept one connection and complete the handshake
async fn accept_handshake(listener: &TcpListener, session_id: u64) -> (TcpStream, BytesMut) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut buf = BytesMut::new();
    let hello = read_message(&mut stream, &mut buf).await.unwrap();
    assert_eq!(
        hello,
        Some(Message::Hello {
            version: PROTOCOL_VERSION
        })
    );
    write_message(
        &mut stream,
        &Message::HelloAck {
            version: PROTOCOL_VERSION,
            session_id,
        },
    )
    .await
    .unwrap();
    (stream, buf)
}

#[tokio::test]
async fn unreachable_server_is_transport_failure() {
    snapsync_test_utils::init_test_logging();
    let client = TcpTransportClient::new(closed_port().await, TransportConfig::default());

    let result = client.full_heartbeat(Bytes::from_static(b"state")).await;
    assert!(matches!(result, Err(TransportError::Failure(_))));
}

#[tokio::test]
async fn version_mismatch_is_refused() {
    snapsync_test_utils::init_test_logging();
    let server = ReplicaServer::bind("127.0.0.1:0".parse().unwrap(), ServerConfig::default())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_message(&mut stream, &Message::Hello { version: 99 })
        .await
        .unwrap();

    let mut buf = BytesMut::new();
    let reply = read_message(&mut stream, &mut buf).await.unwrap();
    assert!(matches!(reply, Some(Message::Error(reason)) if reason.contains("version mismatch")));
}

#[tokio::test]
async fn client_reconnects_after_connection_loss() {
    snapsync_test_utils::init_test_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let fake = tokio::spawn(async move {
        // First connection dies right after the handshake
        let (stream, _) = accept_handshake(&listener, 1).await;
        drop(stream);

        let (mut stream, mut buf) = accept_handshake(&listener, 2).await;
        let msg = read_message(&mut stream, &mut buf).await.unwrap();
        assert!(matches!(msg, Some(Message::FullHeartbeat { .. })));
        write_message(&mut stream, &Message::Ack { checksum: 5 })
            .await
            .unwrap();
        // Keep the stream open until the client has read the reply
        let _ = read_message(&mut stream, &mut buf).await;
    });

    let client = TcpTransportClient::connect(addr, TransportConfig::default())
        .await
        .unwrap();
    assert_eq!(client.session_id().await, Some(1));

    let first = client.full_heartbeat(Bytes::from_static(b"one")).await;
    assert!(matches!(first, Err(TransportError::Failure(_))));
    assert_eq!(client.session_id().await, None);

    let second = client.full_heartbeat(Bytes::from_static(b"two")).await.unwrap();
    assert_eq!(second.checksum.value(), 5);
    assert_eq!(client.session_id().await, Some(2));

    drop(client);
    fake.await.unwrap();
}

#[tokio::test]
async fn silent_server_times_out() {
    snapsync_test_utils::init_test_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let fake = tokio::spawn(async move {
        let (mut stream, mut buf) = accept_handshake(&listener, 9).await;
        // Read the request, never answer
        let _ = read_message(&mut stream, &mut buf).await;
        let _ = read_message(&mut stream, &mut buf).await;
    });

    let config = TransportConfig {
        request_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let client = TcpTransportClient::connect(addr, config).await.unwrap();

    let result = client.heartbeat(vec![1, 2, 3], "0".to_string()).await;
    assert_eq!(result, Err(TransportError::Failure("Timeout".to_string())));

    drop(client);
    fake.await.unwrap();
}
