use proptest::prelude::*;
use snapsync_hash::{hash, Checksum, WyHasher};
use std::hash::Hasher;

proptest! {
    #[test]
    fn hash_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..512), seed in any::<u64>()) {
        prop_assert_eq!(hash(&data, seed), hash(&data.clone(), seed));
    }

    #[test]
    fn distinct_seeds_disagree(data in proptest::collection::vec(any::<u8>(), 0..256), a in any::<u64>(), b in any::<u64>()) {
        prop_assume!(a != b);
        prop_assert_ne!(hash(&data, a), hash(&data, b));
    }

    #[test]
    fn chunked_writes_match_one_shot(data in proptest::collection::vec(any::<u8>(), 0..300), split in 0usize..300) {
        let split = split.min(data.len());
        let mut h = WyHasher::with_seed(3);
        h.write(&data[..split]);
        h.write(&data[split..]);
        prop_assert_eq!(h.finish(), hash(&data, 3));
    }

    #[test]
    fn checksum_hex_roundtrip(value in any::<u64>()) {
        let c = Checksum(value);
        prop_assert_eq!(Checksum::from_hex(&c.to_hex()).unwrap(), c);
    }
}
