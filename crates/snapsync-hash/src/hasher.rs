//! Seeded hasher values and `std::hash` adapters

use crate::{wyhash, Checksum};
use std::hash::{BuildHasher, Hasher};

/// A hasher bound to one seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntegrityHasher {
    seed: u64,
}

impl IntegrityHasher {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn hash(&self, data: &[u8]) -> u64 {
        wyhash::hash(data, self.seed)
    }

    pub fn hash_str(&self, s: &str) -> u64 {
        wyhash::hash_str(s, self.seed)
    }

    pub fn checksum(&self, data: &[u8]) -> Checksum {
        Checksum(self.hash(data))
    }
}

/// `std::hash::Hasher` adapter
///
/// wyhash is not incremental, so written bytes are buffered and hashed in one
/// pass on `finish`. Good for short keys, not for streaming large payloads.
#[derive(Debug, Clone, Default)]
pub struct WyHasher {
    seed: u64,
    buf: Vec<u8>,
}

impl WyHasher {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            buf: Vec::new(),
        }
    }
}

impl Hasher for WyHasher {
    fn write(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn finish(&self) -> u64 {
        wyhash::hash(&self.buf, self.seed)
    }
}

/// Builds [`WyHasher`]s sharing one seed
#[derive(Debug, Clone, Copy, Default)]
pub struct WyBuildHasher {
    seed: u64,
}

impl WyBuildHasher {
    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }
}

impl BuildHasher for WyBuildHasher {
    type Hasher = WyHasher;

    fn build_hasher(&self) -> WyHasher {
        WyHasher::with_seed(self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_hasher_matches_one_shot() {
        let mut h = WyHasher::with_seed(7);
        h.write(b"hello ");
        h.write(b"world");
        assert_eq!(h.finish(), wyhash::hash(b"hello world", 7));
    }

    #[test]
    fn test_build_hasher_in_map() {
        let mut map: HashMap<&str, u32, WyBuildHasher> =
            HashMap::with_hasher(WyBuildHasher::with_seed(1));
        map.insert("alpha", 1);
        map.insert("beta", 2);
        assert_eq!(map.get("alpha"), Some(&1));
        assert_eq!(map.get("beta"), Some(&2));
        assert_eq!(map.get("gamma"), None);
    }

    #[test]
    fn test_integrity_hasher_seed() {
        let h = IntegrityHasher::new(42);
        assert_eq!(h.hash(b"abc"), 0xb0632d5ba93fcab5);
        assert_eq!(h.hash_str("abc"), h.hash(b"abc"));
        assert_eq!(IntegrityHasher::default().checksum(b"abc"), Checksum::of(b"abc"));
    }
}
