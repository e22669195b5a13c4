//! Integrity hashing for Snapsync
//!
//! A fast, seeded, non-cryptographic 64-bit hash used to compare replicas
//! without shipping the full snapshot. The construction is wyhash (final 4),
//! so independent implementations in other languages produce the same values.
//!
//! Not suitable for adversarial input: it only guards against accidental
//! divergence.

pub mod checksum;
pub mod hasher;
pub mod wyhash;

pub use checksum::Checksum;
pub use hasher::{IntegrityHasher, WyBuildHasher, WyHasher};
pub use wyhash::{hash, hash_str, SECRET};

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum HashError {
    #[error("Invalid checksum length: expected {expected} hex digits, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Invalid hex in checksum {input:?}: {source}")]
    InvalidHex {
        input: String,
        #[source]
        source: hex::FromHexError,
    },
}
