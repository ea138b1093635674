//! Property-based tests for last-write-wins replication.
//!
//! Replicas that apply the same records must agree regardless of arrival
//! order or duplication, as long as per-key timestamps are distinct.

use lwwkv_txn::conflict_resolver::ConflictResolver;
use lwwkv_txn::locking::LockManager;
use lwwkv_txn::store::Store;
use lwwkv_txn::{ReplicationBatch, Timestamp, WriteRecord};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Records over a small key space with per-key distinct timestamps.
fn distinct_records() -> impl Strategy<Value = Vec<WriteRecord>> {
    proptest::collection::vec((0i64..8, any::<i64>(), 0u64..10_000), 0..64).prop_map(|raw| {
        let mut seen = HashSet::new();
        raw.into_iter()
            .filter(|(key, _, ts)| seen.insert((*key, *ts)))
            .map(|(key, value, ts)| WriteRecord::new(key, value, Timestamp::new(ts)))
            .collect()
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn apply_in_batches(records: &[WriteRecord], batch_size: usize) -> Vec<(i64, i64)> {
    let store = Arc::new(Store::new());
    let resolver = ConflictResolver::new(Arc::new(LockManager::new()), Arc::clone(&store));
    runtime().block_on(async {
        for chunk in records.chunks(batch_size.max(1)) {
            resolver
                .apply(&ReplicationBatch::new(chunk.to_vec()))
                .await
                .unwrap();
        }
    });
    store.snapshot()
}

/// Expected final state: per key, the value of the highest timestamp.
fn expected(records: &[WriteRecord]) -> Vec<(i64, i64)> {
    let mut best: BTreeMap<i64, (u64, i64)> = BTreeMap::new();
    for r in records {
        let entry = best.entry(r.key).or_insert((r.timestamp.as_u64(), r.value));
        if r.timestamp.as_u64() > entry.0 {
            *entry = (r.timestamp.as_u64(), r.value);
        }
    }
    best.into_iter().map(|(k, (_, v))| (k, v)).collect()
}

proptest! {
    /// Test: any permutation of the same records converges to the same state.
    #[test]
    fn test_convergence_independent_of_order(
        (records, shuffled) in distinct_records().prop_flat_map(|records| {
            let shuffled = Just(records.clone()).prop_shuffle();
            (Just(records), shuffled)
        }),
        batch_a in 1usize..10,
        batch_b in 1usize..10,
    ) {
        let a = apply_in_batches(&records, batch_a);
        let b = apply_in_batches(&shuffled, batch_b);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a, expected(&records));
    }

    /// Test: delivering every record twice changes nothing.
    #[test]
    fn test_duplicate_delivery_is_idempotent(records in distinct_records()) {
        let once = apply_in_batches(&records, 4);
        let mut twice = records.clone();
        twice.extend(records.iter().copied());
        prop_assert_eq!(once, apply_in_batches(&twice, 4));
    }
}
