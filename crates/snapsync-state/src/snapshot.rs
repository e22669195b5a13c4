//! Immutable simulation snapshots

use bytes::Bytes;
use snapsync_hash::Checksum;
use std::ops::Deref;

/// Full serialized state at one instant
///
/// Backed by `Bytes`, so clones share the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct Snapshot(Bytes);

impl Snapshot {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checksum with the shared snapshot seed
    pub fn checksum(&self) -> Checksum {
        Checksum::of(&self.0)
    }
}

impl Deref for Snapshot {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Snapshot {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Snapshot {
    fn from(data: Vec<u8>) -> Self {
        Self(Bytes::from(data))
    }
}

impl From<Bytes> for Snapshot {
    fn from(data: Bytes) -> Self {
        Self(data)
    }
}

impl From<&'static [u8]> for Snapshot {
    fn from(data: &'static [u8]) -> Self {
        Self(Bytes::from_static(data))
    }
}
