//! Per-key mutual exclusion.
//!
//! Settlement serializes on station ids: two trades touching the same station
//! never read-modify-write its inventory at the same time, while trades on
//! disjoint stations proceed in parallel.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

/// Idle slots are pruned once the table grows past this many keys.
const PRUNE_THRESHOLD: usize = 1024;

/// A table of lazily created mutexes, one per key.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

/// Holds the locks of every key passed to `lock_all`; released on drop.
#[must_use = "the keys unlock as soon as the guard is dropped"]
pub struct KeyedGuard {
    _held: Vec<ArcMutexGuard<RawMutex, ()>>,
}

impl core::fmt::Debug for KeyedGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyedGuard").field("held", &self._held.len()).finish()
    }
}

impl<K> KeyedLocks<K>
where
    K: Clone + Ord + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, key: &K) -> KeyedGuard {
        self.lock_all([key])
    }

    /// Lock several keys at once.
    ///
    /// Keys are taken in sorted order (duplicates collapse), so concurrent callers
    /// with overlapping key sets cannot deadlock.
    pub fn lock_all<'a>(&self, keys: impl IntoIterator<Item = &'a K>) -> KeyedGuard
    where
        K: 'a,
    {
        let mut keys: Vec<&K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let slots: Vec<Arc<Mutex<()>>> = {
            let mut table = self.slots.lock();
            if table.len() > PRUNE_THRESHOLD {
                table.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            keys.into_iter()
                .map(|k| table.entry(k.clone()).or_default().clone())
                .collect()
        };

        KeyedGuard {
            _held: slots.iter().map(|slot| slot.lock_arc()).collect(),
        }
    }

    /// Number of keys with a lock slot (held or idle).
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
