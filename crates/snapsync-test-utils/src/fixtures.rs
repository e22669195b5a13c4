//! Deterministic snapshot generators

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use snapsync_state::Snapshot;

/// Pseudo-random snapshot of `len` bytes with some long runs mixed in
pub fn evolving_snapshot(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    for chunk in data.chunks_mut(64) {
        if rng.gen_bool(0.5) {
            rng.fill(chunk);
        }
    }
    data
}

/// Apply `edits` single-byte changes derived from `step`; every tenth step
/// also grows the snapshot
pub fn mutate(data: &mut Vec<u8>, step: u64, edits: usize) {
    let mut rng = StdRng::seed_from_u64(step.wrapping_mul(0x9e37_79b9_7f4a_7c15));

    if !data.is_empty() {
        for _ in 0..edits {
            let at = rng.gen_range(0..data.len());
            data[at] = data[at].wrapping_add(rng.gen_range(1..=255));
        }
    }

    if step % 10 == 9 {
        let extra = rng.gen_range(1..32);
        data.extend((0..extra).map(|_| rng.gen::<u8>()));
    }
}

/// `steps` successive snapshots starting from `evolving_snapshot(len, seed)`
pub fn snapshot_series(len: usize, steps: usize, seed: u64) -> Vec<Snapshot> {
    let mut data = evolving_snapshot(len, seed);
    (0..steps as u64)
        .map(|step| {
            mutate(&mut data, step, 4);
            Snapshot::from(data.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generators_are_deterministic() {
        assert_eq!(evolving_snapshot(1000, 3), evolving_snapshot(1000, 3));
        assert_ne!(evolving_snapshot(1000, 3), evolving_snapshot(1000, 4));

        let a = snapshot_series(256, 12, 1);
        let b = snapshot_series(256, 12, 1);
        assert_eq!(a, b);
        assert!(a[11].len() > 256);
    }

    #[test]
    fn test_mutate_changes_bytes() {
        let original = evolving_snapshot(128, 0);
        let mut data = original.clone();
        mutate(&mut data, 0, 3);
        assert_ne!(data, original);
        assert_eq!(data.len(), original.len());
    }
}
