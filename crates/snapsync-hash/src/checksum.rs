//! Snapshot checksums and their hex wire form

use crate::{wyhash, HashError};
use std::fmt;
use std::str::FromStr;

/// Number of hex digits in the canonical wire form
pub const HEX_WIDTH: usize = 16;

/// 64-bit integrity checksum of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Checksum(pub u64);

impl Checksum {
    /// Seed used for snapshot checksums on both ends of a session
    pub const SNAPSHOT_SEED: u64 = 0;

    /// Checksum of `data` with the snapshot seed
    pub fn of(data: &[u8]) -> Self {
        Self(wyhash::hash(data, Self::SNAPSHOT_SEED))
    }

    /// Checksum of `data` with an explicit seed
    pub fn with_seed(data: &[u8], seed: u64) -> Self {
        Self(wyhash::hash(data, seed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Big-endian lower-case hex, always 16 digits
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_be_bytes())
    }

    /// Parse the 16-digit hex form; case-insensitive
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        if s.len() != HEX_WIDTH {
            return Err(HashError::InvalidLength {
                expected: HEX_WIDTH,
                got: s.len(),
            });
        }
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(s, &mut bytes).map_err(|source| HashError::InvalidHex {
            input: s.to_string(),
            source,
        })?;
        Ok(Self(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Checksum {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<u64> for Checksum {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_is_fixed_width() {
        assert_eq!(Checksum(0).to_hex(), "0000000000000000");
        assert_eq!(Checksum(0xabc).to_hex(), "0000000000000abc");
        assert_eq!(Checksum(u64::MAX).to_string(), "ffffffffffffffff");
    }

    #[test]
    fn test_hex_parse() {
        let c = Checksum::of(b"snapshot");
        assert_eq!(Checksum::from_hex(&c.to_hex()).unwrap(), c);
        assert_eq!(
            "0000000000000ABC".parse::<Checksum>().unwrap(),
            Checksum(0xabc)
        );

        assert!(matches!(
            Checksum::from_hex(""),
            Err(HashError::InvalidLength { got: 0, .. })
        ));
        assert!(matches!(
            Checksum::from_hex("abc"),
            Err(HashError::InvalidLength { got: 3, .. })
        ));
        assert!(matches!(
            Checksum::from_hex("00000000000000000"),
            Err(HashError::InvalidLength { got: 17, .. })
        ));
        assert!(matches!(
            Checksum::from_hex("+000000000000001"),
            Err(HashError::InvalidHex { .. })
        ));
        assert!(matches!(
            Checksum::from_hex("xyz0000000000000"),
            Err(HashError::InvalidHex {
                source: hex::FromHexError::InvalidHexCharacter { c: 'x', index: 0 },
                ..
            })
        ));
    }

    #[test]
    fn test_scenario_checksum() {
        assert_eq!(Checksum::of(&[0x01, 0x02, 0x04]).0, 0x140b15a845808081);
        assert_eq!(Checksum::of(&[0x01, 0x02, 0x03]).0, 0x1e95b2fb296ed0e9);
    }
}
