//! Local transaction execution.
//!
//! A transaction is an ordered list of reads and writes. Every key it
//! touches is locked up front in one ascending pass (written keys
//! exclusively, read-only keys shared), the operations run in submitted
//! order, and the locks are released before the writes are handed to the
//! replication queue.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::locking::{LockManager, LockMode};
use crate::queue::{PushOutcome, ReplicationQueue};
use crate::store::Store;
use crate::types::{decode_transaction, Key, Operation, OperationResult, RawOperation, WriteRecord};

/// Lock mode needed for every key in `ops`, sorted by key.
///
/// A key written anywhere in the transaction is exclusive even if it is also
/// read; keys that are only read are shared.
pub fn lock_plan(ops: &[Operation]) -> BTreeMap<Key, LockMode> {
    let mut plan = BTreeMap::new();
    for op in ops {
        let mode = if op.is_write() {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        };
        let entry = plan.entry(op.key()).or_insert(mode);
        if mode > *entry {
            *entry = mode;
        }
    }
    plan
}

/// Executes transactions against the local store.
pub struct TransactionEngine {
    locks: Arc<LockManager>,
    store: Arc<Store>,
    queue: Arc<ReplicationQueue>,
    clock: Arc<dyn Clock>,
}

impl TransactionEngine {
    /// Creates an engine over shared components.
    pub fn new(
        locks: Arc<LockManager>,
        store: Arc<Store>,
        queue: Arc<ReplicationQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            locks,
            store,
            queue,
            clock,
        }
    }

    /// Decodes and executes a wire-form transaction. A malformed operation
    /// rejects the whole transaction before any lock is taken.
    pub async fn execute_raw(&self, raw: &[RawOperation]) -> Result<Vec<OperationResult>> {
        let ops = decode_transaction(raw)?;
        self.execute(&ops).await
    }

    /// Executes `ops` atomically with respect to other transactions and to
    /// replicated writes. Results are returned in submission order.
    pub async fn execute(&self, ops: &[Operation]) -> Result<Vec<OperationResult>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let plan = lock_plan(ops);
        let guards = self.locks.acquire(plan).await;

        let mut results = Vec::with_capacity(ops.len());
        let mut records = Vec::new();
        for op in ops {
            let result = match *op {
                Operation::Read { key } => {
                    let value = self.store.read(key);
                    debug!(key, ?value, "read");
                    OperationResult::Read { key, value }
                }
                Operation::Write { key, value } => {
                    let ts = self.store.write(&guards, key, value, self.clock.now())?;
                    records.push(WriteRecord::new(key, value, ts));
                    OperationResult::Write { key, value }
                }
            };
            results.push(result);
        }
        self.locks.release(guards);

        // A full queue may park the writer; key locks are already free.
        for record in records {
            match self.queue.push(record).await {
                PushOutcome::Enqueued => {}
                outcome => {
                    warn!(key = record.key, ?outcome, "write will not be replicated");
                }
            }
        }
        Ok(results)
    }
}
