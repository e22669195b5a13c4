//! Transport surface consumed by the synchronizer
//!
//! Implementations live outside this crate (`snapsync-network` ships a TCP
//! one); tests plug in in-memory transports.

use async_trait::async_trait;
use bytes::Bytes;
use snapsync_hash::Checksum;
use thiserror::Error;

/// Positive acknowledgment from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Checksum of the server's snapshot after applying the request
    pub checksum: Checksum,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport failure: {0}")]
    Failure(String),

    /// The server applied the patch and got a different checksum
    #[error("Checksum mismatch: sent {expected}, server computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// RPC surface towards the authoritative server
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Send a compressed patch and the hex checksum of the snapshot it produces
    async fn heartbeat(&self, patch: Vec<u8>, checksum: String) -> Result<Ack, TransportError>;

    /// Replace the server's snapshot with a full baseline
    async fn full_heartbeat(&self, snapshot: Bytes) -> Result<Ack, TransportError>;

    /// Liveness signal while synchronization is disabled; never fails
    async fn tick(&self, tick: u64);
}
