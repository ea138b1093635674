//! Last-write-wins application of replicated write batches.
//!
//! A record wins only if its timestamp is strictly greater than the
//! highest timestamp already applied to its key. Re-applying a record is a
//! no-op and arrival order does not matter, so replicas that see the same
//! records converge. Clock skew between nodes can make a causally later
//! write lose; nothing here corrects for that.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::locking::{LockManager, LockMode};
use crate::store::Store;
use crate::types::ReplicationBatch;

/// Outcome of applying one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Records that overwrote the local value.
    pub applied: usize,
    /// Records that were not newer than the local value.
    pub discarded: usize,
}

/// Snapshot of resolver counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Batches processed.
    pub batches: u64,
    /// Records applied.
    pub applied: u64,
    /// Records discarded as stale or duplicate.
    pub discarded: u64,
}

/// Applies inbound replication batches through the shared lock manager.
pub struct ConflictResolver {
    locks: Arc<LockManager>,
    store: Arc<Store>,
    batches: AtomicU64,
    applied: AtomicU64,
    discarded: AtomicU64,
}

impl ConflictResolver {
    /// Creates a resolver over the node's lock manager and store.
    pub fn new(locks: Arc<LockManager>, store: Arc<Store>) -> Self {
        Self {
            locks,
            store,
            batches: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Applies every record of `batch`, locking each key exclusively in turn.
    pub async fn apply(&self, batch: &ReplicationBatch) -> Result<ApplySummary> {
        let mut summary = ApplySummary::default();
        for record in &batch.records {
            let guards = self
                .locks
                .acquire_uniform([record.key], LockMode::Exclusive)
                .await;
            let won = self.store.apply_if_newer(&guards, record)?;
            self.locks.release(guards);

            if won {
                summary.applied += 1;
            } else {
                summary.discarded += 1;
                debug!(
                    key = record.key,
                    remote_ts = %record.timestamp,
                    local_ts = ?self.store.last_applied(record.key).map(|t| t.as_u64()),
                    "discarded stale replicated write"
                );
            }
        }

        self.batches.fetch_add(1, Ordering::Relaxed);
        self.applied
            .fetch_add(summary.applied as u64, Ordering::Relaxed);
        self.discarded
            .fetch_add(summary.discarded as u64, Ordering::Relaxed);
        Ok(summary)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            batches: self.batches.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}
