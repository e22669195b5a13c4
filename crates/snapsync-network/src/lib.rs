//! Network transport layer for Snapsync
//!
//! Carries heartbeats between a synchronizing client and the replica server
//! over TCP, using length-prefixed rkyv frames.

pub mod connection;
pub mod protocol;
pub mod server;

pub use connection::{TcpTransportClient, TransportConfig};
pub use protocol::{FramedCodec, Message, MessageStats, MAX_FRAME_LEN, PROTOCOL_VERSION};
pub use server::{ReplicaServer, ServerConfig, SessionRegistry};

use snapsync_state::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Timeout")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<NetworkError> for TransportError {
    fn from(err: NetworkError) -> Self {
        TransportError::Failure(err.to_string())
    }
}
