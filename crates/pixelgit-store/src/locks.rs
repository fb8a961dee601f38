//! Per-key write locks.
//!
//! Writers on the same user or chat serialize; writers on different keys run
//! in parallel.  Callers that need several keys must go through
//! [`KeyedLocks::lock_all`], which acquires them in sorted order, and must take
//! user locks before chat locks.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};

/// Held lock on one key.  Released on drop.
pub type KeyGuard = ArcMutexGuard<RawMutex, ()>;

/// Number of slots after which unheld entries are dropped from the table.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, key: &str) -> KeyGuard {
        self.slot(key).lock_arc()
    }

    /// Lock every distinct key, in ascending order.
    pub fn lock_all<I, S>(&self, keys: I) -> Vec<KeyGuard>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: BTreeSet<String> = keys.into_iter().map(Into::into).collect();
        keys.iter().map(|key| self.lock(key)).collect()
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock();
        if slots.len() >= PRUNE_THRESHOLD {
            // Only the table itself references an unheld slot.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        slots.entry(key.to_string()).or_default().clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}
