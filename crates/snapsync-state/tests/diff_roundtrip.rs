use proptest::prelude::*;
use snapsync_state::diff::{DeltaCodec, SnapshotDiff, SpanCodec};
use snapsync_state::{Checksum, Snapshot};

#[test]
fn scenario_patch_reconstructs_new_snapshot() {
    let last_acked = Snapshot::from(vec![0x01, 0x02, 0x03]);
    let new_snapshot = Snapshot::from(vec![0x01, 0x02, 0x04]);

    let patch = SpanCodec.diff(&last_acked, &new_snapshot).expect("diff");
    let rebuilt = SpanCodec.apply(&last_acked, &patch).expect("apply");

    assert_eq!(rebuilt, vec![0x01, 0x02, 0x04]);
    assert_eq!(new_snapshot.checksum(), Checksum(snapsync_hash::hash(&[0x01, 0x02, 0x04], 0)));
    assert_eq!(Checksum::of(&rebuilt), new_snapshot.checksum());
}

#[test]
fn identical_snapshots_produce_empty_diff() {
    let data = vec![5u8; 256];
    let diff = SnapshotDiff::generate(&data, &data);
    assert!(diff.changes.is_empty());
    assert_eq!(diff.payload_len(), 0);
    assert_eq!(diff.apply(&data).unwrap(), data);
}

#[test]
fn diff_to_and_from_empty() {
    let data = b"non-empty snapshot".to_vec();

    let grow = SpanCodec.diff(&[], &data).unwrap();
    assert_eq!(SpanCodec.apply(&[], &grow).unwrap(), data);

    let shrink = SpanCodec.diff(&data, &[]).unwrap();
    assert!(SpanCodec.apply(&data, &shrink).unwrap().is_empty());
}

#[test]
fn sparse_change_keeps_patch_small() {
    let old = vec![0u8; 64 * 1024];
    let mut new = old.clone();
    new[1000] = 1;
    new[50_000] = 2;

    let patch = SpanCodec.diff(&old, &new).unwrap();
    assert!(patch.len() < 256, "patch was {} bytes", patch.len());
    assert_eq!(SpanCodec.apply(&old, &patch).unwrap(), new);
}

#[test]
fn truncated_patch_is_rejected() {
    let patch = SpanCodec.diff(&[1, 2, 3], &[4, 5, 6, 7]).unwrap();
    let truncated = &patch[..patch.len() / 2];
    assert!(SpanCodec.apply(&[1, 2, 3], truncated).is_err());
}

proptest! {
    #[test]
    fn apply_of_diff_is_identity(
        old in proptest::collection::vec(any::<u8>(), 0..1024),
        new in proptest::collection::vec(any::<u8>(), 0..1024),
    ) {
        let patch = SpanCodec.diff(&old, &new).unwrap();
        prop_assert_eq!(SpanCodec.apply(&old, &patch).unwrap(), new);
    }

    #[test]
    fn apply_of_sparse_edit_is_identity(
        old in proptest::collection::vec(any::<u8>(), 1..2048),
        edits in proptest::collection::vec((any::<usize>(), any::<u8>()), 0..16),
    ) {
        let mut new = old.clone();
        for (idx, value) in edits {
            let at = idx % new.len();
            new[at] = value;
        }
        let diff = SnapshotDiff::generate(&old, &new);
        prop_assert_eq!(diff.apply(&old).unwrap(), new);
    }
}
