//! Client side of the heartbeat protocol
//!
//! One TCP connection per client, opened lazily and reopened after any I/O
//! failure. Requests are serialized: each heartbeat waits for its reply
//! before the next one is written.

use crate::protocol::{read_message, write_message, Message, MessageStats, PROTOCOL_VERSION};
use crate::NetworkError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use snapsync_state::{Ack, Checksum, TransportClient, TransportError};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Configuration for the TCP transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Bound on connecting plus the hello exchange
    pub connect_timeout: Duration,
    /// Bound on a single request/response exchange
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

struct Connection {
    stream: TcpStream,
    buf: BytesMut,
    session_id: u64,
}

impl Connection {
    async fn open(addr: SocketAddr) -> Result<Self, NetworkError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("Connect to {addr} failed: {e}")))?;
        stream.set_nodelay(true)?;

        let mut conn = Self {
            stream,
            buf: BytesMut::with_capacity(8 * 1024),
            session_id: 0,
        };

        write_message(
            &mut conn.stream,
            &Message::Hello {
                version: PROTOCOL_VERSION,
            },
        )
        .await?;

        match conn.receive().await? {
            Message::HelloAck {
                version,
                session_id,
            } => {
                if version != PROTOCOL_VERSION {
                    return Err(NetworkError::ProtocolError(format!(
                        "Protocol version mismatch: got {version}, expected {PROTOCOL_VERSION}"
                    )));
                }
                conn.session_id = session_id;
                Ok(conn)
            }
            Message::Error(reason) => Err(NetworkError::ConnectionFailed(reason)),
            other => Err(NetworkError::ProtocolError(format!(
                "Expected HelloAck, got {other:?}"
            ))),
        }
    }

    async fn receive(&mut self) -> Result<Message, NetworkError> {
        read_message(&mut self.stream, &mut self.buf)
            .await?
            .ok_or_else(|| NetworkError::ConnectionFailed("Server closed connection".to_string()))
    }
}

/// [`TransportClient`] over a TCP connection to a replica server
pub struct TcpTransportClient {
    addr: SocketAddr,
    config: TransportConfig,
    conn: Mutex<Option<Connection>>,
    stats: Mutex<MessageStats>,
}

impl TcpTransportClient {
    /// Create a client; the connection is opened on first use
    pub fn new(addr: SocketAddr, config: TransportConfig) -> Self {
        Self {
            addr,
            config,
            conn: Mutex::new(None),
            stats: Mutex::new(MessageStats::default()),
        }
    }

    /// Create a client and perform the handshake right away
    pub async fn connect(addr: SocketAddr, config: TransportConfig) -> Result<Self, NetworkError> {
        let client = Self::new(addr, config);
        let session_id = {
            let mut guard = client.conn.lock().await;
            let conn = client.open().await?;
            let session_id = conn.session_id;
            *guard = Some(conn);
            session_id
        };
        info!(%addr, session_id, "Connected to replica server");
        Ok(client)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Session id of the current connection, if connected
    pub async fn session_id(&self) -> Option<u64> {
        self.conn.lock().await.as_ref().map(|c| c.session_id)
    }

    /// Get connection statistics
    pub async fn stats(&self) -> MessageStats {
        self.stats.lock().await.clone()
    }

    async fn open(&self) -> Result<Connection, NetworkError> {
        timeout(self.config.connect_timeout, Connection::open(self.addr))
            .await
            .map_err(|_| NetworkError::Timeout)?
    }

    /// Send one message and, unless it is fire-and-forget, wait for the reply
    ///
    /// Any error drops the connection; the next call reconnects.
    pub async fn request(&self, msg: Message) -> Result<Option<Message>, NetworkError> {
        let mut guard = self.conn.lock().await;

        if guard.is_none() {
            let conn = self.open().await?;
            debug!(addr = %self.addr, session_id = conn.session_id, "Reconnected");
            *guard = Some(conn);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(NetworkError::ConnectionFailed("No connection".to_string()));
        };

        let started = Instant::now();
        let exchange = async {
            write_message(&mut conn.stream, &msg).await?;
            if msg.expects_reply() {
                conn.receive().await.map(Some)
            } else {
                Ok(None)
            }
        };

        let result = match timeout(self.config.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout),
        };

        match result {
            Ok(reply) => {
                let mut stats = self.stats.lock().await;
                stats.record_sent(&msg);
                if let Some(reply) = &reply {
                    stats.record_received(reply);
                    stats.update_rtt(started.elapsed());
                }
                Ok(reply)
            }
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "Request failed, dropping connection");
                *guard = None;
                Err(e)
            }
        }
    }

    async fn exchange(&self, msg: Message) -> Result<Ack, TransportError> {
        match self.request(msg).await? {
            Some(Message::Ack { checksum }) => Ok(Ack {
                checksum: Checksum(checksum),
            }),
            Some(Message::ChecksumMismatch { expected, actual }) => {
                Err(TransportError::ChecksumMismatch { expected, actual })
            }
            Some(Message::Error(reason)) => Err(TransportError::Failure(reason)),
            other => Err(TransportError::Failure(format!(
                "Unexpected reply: {other:?}"
            ))),
        }
    }
}

#[async_trait]
impl TransportClient for TcpTransportClient {
    async fn heartbeat(&self, patch: Vec<u8>, checksum: String) -> Result<Ack, TransportError> {
        self.exchange(Message::Heartbeat { patch, checksum }).await
    }

    async fn full_heartbeat(&self, snapshot: Bytes) -> Result<Ack, TransportError> {
        self.exchange(Message::FullHeartbeat {
            snapshot: snapshot.to_vec(),
        })
        .await
    }

    async fn tick(&self, tick: u64) {
        if let Err(e) = self.request(Message::Tick(tick)).await {
            debug!(tick, error = %e, "Tick not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_client_is_lazy() {
        let client = TcpTransportClient::new("127.0.0.1:9".parse().unwrap(), TransportConfig::default());
        assert_eq!(client.session_id().await, None);
        assert_eq!(client.stats().await.messages_sent, 0);
    }
}
