//! Snapshot synchronization for Snapsync
//!
//! Keeps a client-held snapshot consistent with the server's authoritative
//! copy: byte diffs against the last acknowledged snapshot, compressed on a
//! worker thread, verified with a wyhash checksum, and healed with a full
//! baseline whenever the two sides disagree.

pub mod channel;
pub mod compress;
pub mod diff;
pub mod replica;
pub mod snapshot;
pub mod sync;
pub mod transport;

pub use channel::{
    ChannelConfig, CompressionChannel, WorkerEndpoint, WorkerRequest, WorkerResponse,
};
pub use compress::{CompressionAlgorithm, CompressionOp, Compressor};
pub use diff::{DeltaCodec, SnapshotDiff, SpanCodec};
pub use replica::ReplicaState;
pub use snapshot::Snapshot;
pub use sync::{
    AttemptKind, SnapshotSynchronizer, SyncConfig, SyncPolicy, SyncState, SyncStats,
    UpdateStatus,
};
pub use transport::{Ack, TransportClient, TransportError};

pub use snapsync_hash::Checksum;

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("State divergence detected")]
    StateDivergence,

    #[error("Compression error: {0}")]
    CompressionError(String),

    #[error("Checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: Checksum, actual: Checksum },

    #[error("Invalid checksum: {0}")]
    InvalidChecksum(#[from] snapsync_hash::HashError),
}

/// Failures of a synchronization attempt
///
/// Every variant is handled the same way by the synchronizer: the attempt is
/// abandoned and a full baseline is pushed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Compression request {id} timed out after {timeout:?}")]
    CompressionTimeout { id: u64, timeout: Duration },

    #[error("Compression failed: {0}")]
    CompressionFailure(String),

    #[error("Compression queue full ({limit} requests pending)")]
    CompressionBackpressure { limit: usize },

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Checksum mismatch: sent {expected}, server computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Failure(reason) => SyncError::TransportFailure(reason),
            TransportError::ChecksumMismatch { expected, actual } => {
                SyncError::ChecksumMismatch { expected, actual }
            }
        }
    }
}
