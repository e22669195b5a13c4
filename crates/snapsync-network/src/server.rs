//! Replica server
//!
//! Accepts client connections, keeps one [`ReplicaState`] per session and
//! answers every heartbeat with `Ack` or `ChecksumMismatch`.

use crate::protocol::{read_message, write_message, Message, PROTOCOL_VERSION};
use crate::NetworkError;
use bytes::BytesMut;
use snapsync_state::{Checksum, CompressionAlgorithm, ReplicaState, Snapshot, StateError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Server configuration
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Algorithm clients compress patches with
    pub algorithm: CompressionAlgorithm,
}

type SharedReplica = Arc<Mutex<ReplicaState>>;

fn lock_replica(replica: &SharedReplica) -> MutexGuard<'_, ReplicaState> {
    replica.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Live sessions, keyed by session id
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<u64, SharedReplica>>>,
}

impl SessionRegistry {
    fn sessions(&self) -> MutexGuard<'_, HashMap<u64, SharedReplica>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, session_id: u64, replica: SharedReplica) {
        self.sessions().insert(session_id, replica);
    }

    fn remove(&self, session_id: u64) {
        self.sessions().remove(&session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn session_ids(&self) -> Vec<u64> {
        self.sessions().keys().copied().collect()
    }

    /// Checksum of a session's current snapshot
    pub fn checksum(&self, session_id: u64) -> Option<Checksum> {
        let replica = self.sessions().get(&session_id).cloned()?;
        let checksum = lock_replica(&replica).checksum();
        Some(checksum)
    }

    /// Copy of a session's current snapshot
    pub fn snapshot(&self, session_id: u64) -> Option<Snapshot> {
        let replica = self.sessions().get(&session_id).cloned()?;
        let snapshot = lock_replica(&replica).snapshot().clone();
        Some(snapshot)
    }
}

/// TCP server holding the authoritative snapshot of every connected client
pub struct ReplicaServer {
    listener: TcpListener,
    config: ServerConfig,
    sessions: SessionRegistry,
}

impl ReplicaServer {
    pub async fn bind(addr: SocketAddr, config: ServerConfig) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            config,
            sessions: SessionRegistry::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for observing sessions while the server runs
    pub fn sessions(&self) -> SessionRegistry {
        self.sessions.clone()
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> Result<(), NetworkError> {
        info!(addr = ?self.listener.local_addr().ok(), "Replica server listening");

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let config = self.config.clone();
            let sessions = self.sessions.clone();

            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, peer, config, sessions).await {
                    error!(%peer, error = %e, "Connection ended with error");
                }
            });
        }
    }
}

/// Run the protocol on one accepted connection
pub async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    config: ServerConfig,
    sessions: SessionRegistry,
) -> Result<(), NetworkError> {
    stream.set_nodelay(true)?;
    let mut buf = BytesMut::with_capacity(8 * 1024);

    match read_message(&mut stream, &mut buf).await? {
        Some(Message::Hello { version }) if version == PROTOCOL_VERSION => {}
        Some(Message::Hello { version }) => {
            let reason =
                format!("Protocol version mismatch: got {version}, expected {PROTOCOL_VERSION}");
            write_message(&mut stream, &Message::Error(reason.clone())).await?;
            return Err(NetworkError::ProtocolError(reason));
        }
        Some(other) => {
            return Err(NetworkError::ProtocolError(format!(
                "Expected Hello, got {other:?}"
            )))
        }
        None => return Ok(()),
    }

    let session_id: u64 = rand::random();
    let replica: SharedReplica = Arc::new(Mutex::new(ReplicaState::new(config.algorithm)));
    sessions.insert(session_id, replica.clone());
    info!(%peer, session_id, "Session started");

    write_message(
        &mut stream,
        &Message::HelloAck {
            version: PROTOCOL_VERSION,
            session_id,
        },
    )
    .await?;

    let result = session_loop(&mut stream, &mut buf, session_id, &replica).await;
    sessions.remove(session_id);
    info!(%peer, session_id, "Session closed");
    result
}

async fn session_loop(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    session_id: u64,
    replica: &SharedReplica,
) -> Result<(), NetworkError> {
    while let Some(msg) = read_message(stream, buf).await? {
        if let Some(reply) = dispatch(session_id, replica.clone(), msg).await? {
            write_message(stream, &reply).await?;
        }
    }
    Ok(())
}

/// Run a message against the replica on the blocking pool
///
/// Decompressing and applying a patch is CPU-bound and holds the replica
/// lock, so it stays off the runtime threads. Ticks are answered inline.
async fn dispatch(
    session_id: u64,
    replica: SharedReplica,
    msg: Message,
) -> Result<Option<Message>, NetworkError> {
    if let Message::Tick(tick) = msg {
        debug!(session_id, tick, "Tick");
        return Ok(None);
    }

    tokio::task::spawn_blocking(move || handle_message(session_id, &replica, msg))
        .await
        .map_err(|e| NetworkError::TransportError(format!("Replica task failed: {e}")))
}

fn handle_message(session_id: u64, replica: &SharedReplica, msg: Message) -> Option<Message> {
    let mut replica = lock_replica(replica);

    match msg {
        Message::FullHeartbeat { snapshot } => {
            let checksum = replica.apply_full(Snapshot::from(snapshot));
            Some(Message::Ack {
                checksum: checksum.value(),
            })
        }
        Message::Heartbeat { patch, checksum } => match replica.apply_patch(&patch, &checksum) {
            Ok(checksum) => Some(Message::Ack {
                checksum: checksum.value(),
            }),
            Err(StateError::ChecksumMismatch { expected, actual }) => {
                Some(Message::ChecksumMismatch {
                    expected: expected.to_hex(),
                    actual: actual.to_hex(),
                })
            }
            Err(e) => {
                warn!(session_id, error = %e, "Rejected patch");
                Some(Message::Error(e.to_string()))
            }
        },
        Message::Tick(tick) => {
            debug!(session_id, tick, "Tick");
            None
        }
        other => Some(Message::Error(format!("Unexpected message: {other:?}"))),
    }
}
