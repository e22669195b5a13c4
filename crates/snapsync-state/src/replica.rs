//! Server-side authoritative copy
//!
//! Rebuilds the client's snapshot from baselines and compressed patches and
//! verifies each result against the checksum the client sent.

use crate::compress::{CompressionAlgorithm, Compressor};
use crate::diff::{DeltaCodec, SpanCodec};
use crate::snapshot::Snapshot;
use crate::StateError;
use snapsync_hash::Checksum;
use std::sync::Arc;
use tracing::{debug, warn};

/// Authoritative snapshot reconstructed from client heartbeats
pub struct ReplicaState {
    snapshot: Snapshot,
    checksum: Checksum,
    codec: Arc<dyn DeltaCodec>,
    compressor: Compressor,
    patches_applied: u64,
    baselines_applied: u64,
}

impl ReplicaState {
    /// Start from the empty snapshot
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        Self::with_codec(algorithm, Arc::new(SpanCodec))
    }

    pub fn with_codec(algorithm: CompressionAlgorithm, codec: Arc<dyn DeltaCodec>) -> Self {
        let snapshot = Snapshot::empty();
        Self {
            checksum: snapshot.checksum(),
            snapshot,
            codec,
            compressor: Compressor::new(algorithm),
            patches_applied: 0,
            baselines_applied: 0,
        }
    }

    /// Replace the snapshot with a full baseline
    pub fn apply_full(&mut self, snapshot: Snapshot) -> Checksum {
        self.checksum = snapshot.checksum();
        self.snapshot = snapshot;
        self.baselines_applied += 1;
        debug!(len = self.snapshot.len(), checksum = %self.checksum, "Applied baseline");
        self.checksum
    }

    /// Decompress and apply a patch, then verify the claimed checksum
    ///
    /// On any error the replica keeps its previous snapshot.
    pub fn apply_patch(&mut self, compressed: &[u8], checksum_hex: &str) -> Result<Checksum, StateError> {
        let expected = Checksum::from_hex(checksum_hex)?;
        let patch = self.compressor.decompress(compressed)?;
        let candidate = self.codec.apply(self.snapshot.as_bytes(), &patch)?;

        let actual = Checksum::of(&candidate);
        if actual != expected {
            warn!(%expected, %actual, "Patched snapshot does not match client checksum");
            return Err(StateError::ChecksumMismatch { expected, actual });
        }

        self.snapshot = Snapshot::from(candidate);
        self.checksum = actual;
        self.patches_applied += 1;
        Ok(actual)
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    pub fn patches_applied(&self) -> u64 {
        self.patches_applied
    }

    pub fn baselines_applied(&self) -> u64 {
        self.baselines_applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressed_patch(old: &[u8], new: &[u8]) -> Vec<u8> {
        let patch = SpanCodec.diff(old, new).unwrap();
        Compressor::new(CompressionAlgorithm::Zstd).compress(&patch).unwrap()
    }

    #[test]
    fn test_patch_from_empty() {
        let mut replica = ReplicaState::new(CompressionAlgorithm::Zstd);
        let new = b"first snapshot".to_vec();

        let patch = compressed_patch(&[], &new);
        let checksum = replica.apply_patch(&patch, &Checksum::of(&new).to_hex()).unwrap();

        assert_eq!(checksum, Checksum::of(&new));
        assert_eq!(replica.snapshot().as_bytes(), new.as_slice());
        assert_eq!(replica.patches_applied(), 1);
    }

    #[test]
    fn test_mismatch_keeps_previous_snapshot() {
        let mut replica = ReplicaState::new(CompressionAlgorithm::Zstd);
        replica.apply_full(Snapshot::from(vec![1u8, 2, 3]));

        // Patch built against a base the replica does not hold
        let patch = compressed_patch(&[9, 9, 9], &[9, 9, 4]);
        let result = replica.apply_patch(&patch, &Checksum::of(&[9, 9, 4]).to_hex());

        assert!(matches!(result, Err(StateError::ChecksumMismatch { .. })));
        assert_eq!(replica.snapshot().as_bytes(), &[1, 2, 3]);
        assert_eq!(replica.checksum(), Checksum::of(&[1, 2, 3]));
    }

    #[test]
    fn test_bad_checksum_text() {
        let mut replica = ReplicaState::new(CompressionAlgorithm::Lz4);
        let result = replica.apply_patch(&[], "not-hex");
        assert!(matches!(result, Err(StateError::InvalidChecksum(_))));
    }
}
