//! Byte-level snapshot diffing
//!
//! The synchronizer only depends on the [`DeltaCodec`] contract:
//! `apply(old, diff(old, new)) == new`. [`SpanCodec`] is the bundled codec; it
//! records runs of changed bytes and the target length.

use crate::StateError;
use rkyv::{Archive, Deserialize, Serialize};

/// Diff/patch contract shared by client and server
pub trait DeltaCodec: Send + Sync {
    /// Encode the changes that turn `old` into `new`
    fn diff(&self, old: &[u8], new: &[u8]) -> Result<Vec<u8>, StateError>;

    /// Rebuild the new snapshot from `old` and a patch produced by `diff`
    fn apply(&self, old: &[u8], patch: &[u8]) -> Result<Vec<u8>, StateError>;
}

/// Equal runs shorter than this between two changes are folded into one span
const MERGE_GAP: usize = 8;

/// A diff between two snapshots
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct SnapshotDiff {
    /// Length of the target snapshot
    pub new_len: u64,

    /// Changed spans, ascending and non-overlapping
    pub changes: Vec<SpanChange>,
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct SpanChange {
    pub offset: u64,
    pub data: Vec<u8>,
}

impl SnapshotDiff {
    /// Generate a diff between two snapshots
    pub fn generate(old: &[u8], new: &[u8]) -> Self {
        let common = old.len().min(new.len());
        let mut changes = Self::generate_span_changes(&old[..common], &new[..common]);

        // Growth: everything past the shared prefix is new
        if new.len() > common {
            match changes.last_mut() {
                Some(last) if last.offset as usize + last.data.len() == common => {
                    last.data.extend_from_slice(&new[common..]);
                }
                _ => changes.push(SpanChange {
                    offset: common as u64,
                    data: new[common..].to_vec(),
                }),
            }
        }

        SnapshotDiff {
            new_len: new.len() as u64,
            changes,
        }
    }

    /// Collect runs of differing bytes over two equal-length slices
    fn generate_span_changes(old: &[u8], new: &[u8]) -> Vec<SpanChange> {
        let mut changes = Vec::new();
        let mut i = 0;

        while i < old.len() {
            if old[i] != new[i] {
                let start = i;
                let mut end = i + 1;
                let mut j = i + 1;

                while j < old.len() {
                    if old[j] != new[j] {
                        end = j + 1;
                    } else if j - end >= MERGE_GAP {
                        break;
                    }
                    j += 1;
                }

                changes.push(SpanChange {
                    offset: start as u64,
                    data: new[start..end].to_vec(),
                });
                i = end;
            } else {
                i += 1;
            }
        }

        changes
    }

    /// Apply diff to a snapshot to produce the new snapshot
    pub fn apply(&self, old: &[u8]) -> Result<Vec<u8>, StateError> {
        let new_len = usize::try_from(self.new_len).map_err(|_| StateError::StateDivergence)?;
        // Bytes past the old end must all be carried by the changes
        if new_len > old.len().saturating_add(self.payload_len()) {
            return Err(StateError::StateDivergence);
        }
        let mut new_state = old.to_vec();
        new_state.resize(new_len, 0);

        for change in &self.changes {
            let offset = usize::try_from(change.offset).map_err(|_| StateError::StateDivergence)?;
            let end = offset
                .checked_add(change.data.len())
                .ok_or(StateError::StateDivergence)?;
            if end > new_state.len() {
                return Err(StateError::StateDivergence);
            }
            new_state[offset..end].copy_from_slice(&change.data);
        }

        Ok(new_state)
    }

    /// Number of payload bytes carried by the diff
    pub fn payload_len(&self) -> usize {
        self.changes.iter().map(|c| c.data.len()).sum()
    }

    /// Serialize diff to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        rkyv::to_bytes::<_, 256>(self)
            .map(|b| b.to_vec())
            .map_err(|e| StateError::SerializationError(e.to_string()))
    }

    /// Deserialize diff from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        // Decompressed buffers carry no alignment guarantee
        let mut aligned = rkyv::AlignedVec::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);

        let archived = rkyv::check_archived_root::<Self>(&aligned)
            .map_err(|e| StateError::DeserializationError(e.to_string()))?;

        archived
            .deserialize(&mut rkyv::Infallible)
            .map_err(|_| StateError::DeserializationError("infallible".to_string()))
    }
}

/// Span-based codec over [`SnapshotDiff`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanCodec;

impl DeltaCodec for SpanCodec {
    fn diff(&self, old: &[u8], new: &[u8]) -> Result<Vec<u8>, StateError> {
        SnapshotDiff::generate(old, new).to_bytes()
    }

    fn apply(&self, old: &[u8], patch: &[u8]) -> Result<Vec<u8>, StateError> {
        SnapshotDiff::from_bytes(patch)?.apply(old)
    }
}
