//! Per-key reader/writer locking with a canonical acquisition order.
//!
//! Every caller that needs several locks (local transactions and the
//! replication apply path) goes through [`LockManager::acquire`], which
//! merges duplicate keys, sorts them ascending and takes the locks one by
//! one in that order. Using one order everywhere rules out circular waits.

use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

use crate::types::Key;

/// Mode in which a key is locked. `Exclusive` orders above `Shared` so the
/// stronger mode wins when requests for one key are merged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    /// Any number of concurrent holders.
    Shared,
    /// A single holder, no concurrent shared holders.
    Exclusive,
}

/// How keys map onto lock slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockLayout {
    /// One lock per distinct key, created lazily and never evicted.
    PerKey,
    /// A fixed pool of `stripes` locks; a key uses `hash(key) mod stripes`.
    Striped {
        /// Number of locks in the pool.
        stripes: usize,
    },
}

impl LockLayout {
    /// Builds a layout from the optional stripe count in the config.
    pub fn from_stripes(stripes: Option<usize>) -> Self {
        match stripes {
            Some(stripes) if stripes > 0 => LockLayout::Striped { stripes },
            _ => LockLayout::PerKey,
        }
    }

    /// Lock slot guarding `key`.
    pub fn slot(&self, key: Key) -> i64 {
        match self {
            LockLayout::PerKey => key,
            LockLayout::Striped { stripes } => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % *stripes as u64) as i64
            }
        }
    }
}

enum SlotGuard {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

struct HeldLock {
    slot: i64,
    mode: LockMode,
    _guard: SlotGuard,
}

/// The set of locks held by one caller. Dropping it releases every lock in
/// reverse acquisition order.
pub struct LockGuardSet {
    layout: LockLayout,
    held: Vec<HeldLock>,
}

impl LockGuardSet {
    /// Returns true if the set holds the lock guarding `key` exclusively.
    pub fn holds_exclusive(&self, key: Key) -> bool {
        self.mode_for(key) == Some(LockMode::Exclusive)
    }

    /// Returns true if the set holds the lock guarding `key` in any mode.
    pub fn holds(&self, key: Key) -> bool {
        self.mode_for(key).is_some()
    }

    fn mode_for(&self, key: Key) -> Option<LockMode> {
        let slot = self.layout.slot(key);
        self.held
            .binary_search_by_key(&slot, |h| h.slot)
            .ok()
            .map(|idx| self.held[idx].mode)
    }

    /// Slots held, in acquisition (ascending) order.
    pub fn slots(&self) -> Vec<(i64, LockMode)> {
        self.held.iter().map(|h| (h.slot, h.mode)).collect()
    }

    /// Number of locks held.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Returns true if no locks are held.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Releases all locks.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuardSet {
    fn drop(&mut self) {
        while let Some(held) = self.held.pop() {
            trace!(slot = held.slot, mode = ?held.mode, "released lock");
        }
    }
}

/// Lazily populated table of reader/writer locks.
pub struct LockManager {
    layout: LockLayout,
    locks: DashMap<i64, Arc<RwLock<()>>>,
}

impl LockManager {
    /// Creates a manager with one lock per key.
    pub fn new() -> Self {
        Self::with_layout(LockLayout::PerKey)
    }

    /// Creates a manager with the given slot layout.
    pub fn with_layout(layout: LockLayout) -> Self {
        Self {
            layout,
            locks: DashMap::new(),
        }
    }

    /// Slot layout in use.
    pub fn layout(&self) -> LockLayout {
        self.layout
    }

    /// Acquires locks for `(key, mode)` requests.
    ///
    /// Requests that land on the same slot are merged, with `Exclusive`
    /// winning over `Shared`, so a key that is both read and written is
    /// locked once, exclusively. Slots are then acquired in ascending order.
    /// Waits without timeout until every lock is granted.
    pub async fn acquire<I>(&self, requests: I) -> LockGuardSet
    where
        I: IntoIterator<Item = (Key, LockMode)>,
    {
        let mut plan: BTreeMap<i64, LockMode> = BTreeMap::new();
        for (key, mode) in requests {
            let slot = self.layout.slot(key);
            let entry = plan.entry(slot).or_insert(mode);
            *entry = (*entry).max(mode);
        }

        let mut held = Vec::with_capacity(plan.len());
        for (slot, mode) in plan {
            let lock = self.lock_for(slot);
            let guard = match mode {
                LockMode::Shared => SlotGuard::Shared(lock.read_owned().await),
                LockMode::Exclusive => SlotGuard::Exclusive(lock.write_owned().await),
            };
            trace!(slot, ?mode, "acquired lock");
            held.push(HeldLock {
                slot,
                mode,
                _guard: guard,
            });
        }

        LockGuardSet {
            layout: self.layout,
            held,
        }
    }

    /// Acquires every key in `keys` with the same mode.
    pub async fn acquire_uniform<I>(&self, keys: I, mode: LockMode) -> LockGuardSet
    where
        I: IntoIterator<Item = Key>,
    {
        self.acquire(keys.into_iter().map(|k| (k, mode))).await
    }

    /// Releases a guard set.
    pub fn release(&self, guards: LockGuardSet) {
        guards.release();
    }

    /// Number of lock entries created so far.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    fn lock_for(&self, slot: i64) -> Arc<RwLock<()>> {
        self.locks
            .entry(slot)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
