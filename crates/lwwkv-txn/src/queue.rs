//! Bounded buffer of write records awaiting anti-entropy publication.
//!
//! Transactions push, the publisher drains. When the buffer is full the
//! configured [`OverflowPolicy`] decides whether the writer waits or the
//! record is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::config::OverflowPolicy;
use crate::types::WriteRecord;

/// Outcome of pushing a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The record is queued for the next batch.
    Enqueued,
    /// The queue was full and the policy discarded the record.
    Dropped,
    /// The queue is closed; the record will never be published.
    Closed,
}

#[derive(Debug, Default)]
struct QueueStatsInner {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    drained: AtomicU64,
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Records accepted into the queue.
    pub enqueued: u64,
    /// Records discarded because the queue was full or closed.
    pub dropped: u64,
    /// Records handed to the publisher.
    pub drained: u64,
}

/// Bounded FIFO of write records.
pub struct ReplicationQueue {
    policy: OverflowPolicy,
    capacity: usize,
    sender: mpsc::Sender<WriteRecord>,
    receiver: Mutex<mpsc::Receiver<WriteRecord>>,
    stats: QueueStatsInner,
}

impl ReplicationQueue {
    /// Creates a queue holding at most `capacity` records.
    ///
    /// # Panics
    /// Panics if `capacity` is zero; `NodeConfig::validate` rejects that.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            policy,
            capacity,
            sender,
            receiver: Mutex::new(receiver),
            stats: QueueStatsInner::default(),
        }
    }

    /// Queues `record`, applying the overflow policy when full.
    pub async fn push(&self, record: WriteRecord) -> PushOutcome {
        let outcome = match self.policy {
            OverflowPolicy::Block => match self.sender.send(record).await {
                Ok(()) => PushOutcome::Enqueued,
                Err(_) => PushOutcome::Closed,
            },
            OverflowPolicy::DropNewest => match self.sender.try_send(record) {
                Ok(()) => PushOutcome::Enqueued,
                Err(TrySendError::Full(record)) => {
                    warn!(
                        key = record.key,
                        capacity = self.capacity,
                        "replication queue full, dropping record"
                    );
                    PushOutcome::Dropped
                }
                Err(TrySendError::Closed(_)) => PushOutcome::Closed,
            },
        };

        match outcome {
            PushOutcome::Enqueued => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Dropped | PushOutcome::Closed => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    /// Removes and returns every record currently buffered, oldest first.
    pub async fn drain(&self) -> Vec<WriteRecord> {
        let mut receiver = self.receiver.lock().await;
        let mut records = Vec::with_capacity(self.len());
        while let Ok(record) = receiver.try_recv() {
            records.push(record);
        }
        self.stats
            .drained
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        records
    }

    /// Stops accepting records. Already buffered records can still be drained.
    pub async fn close(&self) {
        self.receiver.lock().await.close();
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflow policy in effect.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            drained: self.stats.drained.load(Ordering::Relaxed),
        }
    }
}
