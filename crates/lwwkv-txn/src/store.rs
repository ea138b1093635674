//! In-memory key/value table.
//!
//! Nothing here is persisted; a restart starts from an empty store. Every
//! mutation takes the caller's [`LockGuardSet`] and refuses to proceed unless
//! it holds the key exclusively, so local transactions and replicated writes
//! share one serialization point per key.

use dashmap::DashMap;
use tracing::debug;

use crate::error::{Result, TxnError};
use crate::locking::LockGuardSet;
use crate::types::{Key, Timestamp, Value, WriteRecord};

/// Key/value table plus the highest timestamp applied to each key.
#[derive(Debug, Default)]
pub struct Store {
    data: DashMap<Key, Value>,
    last_applied: DashMap<Key, Timestamp>,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, or `None` if it was never written.
    pub fn read(&self, key: Key) -> Option<Value> {
        self.data.get(&key).map(|v| *v)
    }

    /// Local write: always overwrites the value and stamps it with `now`,
    /// or with one past the key's last-applied timestamp if that is not
    /// older than `now`. Returns the stamp, which becomes the key's
    /// last-applied timestamp, so the value held locally is also the one
    /// that wins on every peer.
    pub fn write(
        &self,
        guards: &LockGuardSet,
        key: Key,
        value: Value,
        now: Timestamp,
    ) -> Result<Timestamp> {
        if !guards.holds_exclusive(key) {
            return Err(TxnError::LockNotHeld { key });
        }
        let ts = match self.last_applied(key) {
            Some(cur) if cur >= now => cur.next(),
            _ => now,
        };
        self.data.insert(key, value);
        self.last_applied.insert(key, ts);
        debug!(key, value, %ts, "key written");
        Ok(ts)
    }

    /// Replicated write: applies `record` only if its timestamp is strictly
    /// greater than the key's last-applied timestamp. Returns whether it was
    /// applied.
    pub fn apply_if_newer(&self, guards: &LockGuardSet, record: &WriteRecord) -> Result<bool> {
        if !guards.holds_exclusive(record.key) {
            return Err(TxnError::LockNotHeld { key: record.key });
        }
        if let Some(current) = self.last_applied(record.key) {
            if record.timestamp <= current {
                return Ok(false);
            }
        }
        self.data.insert(record.key, record.value);
        self.last_applied.insert(record.key, record.timestamp);
        Ok(true)
    }

    /// Highest timestamp applied to `key` so far.
    pub fn last_applied(&self, key: Key) -> Option<Timestamp> {
        self.last_applied.get(&key).map(|t| *t)
    }

    /// Number of keys with a value.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if no key was ever written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// All key/value pairs sorted by key.
    pub fn snapshot(&self) -> Vec<(Key, Value)> {
        let mut pairs: Vec<(Key, Value)> = self.data.iter().map(|e| (*e.key(), *e.value())).collect();
        pairs.sort_unstable_by_key(|(k, _)| *k);
        pairs
    }
}
