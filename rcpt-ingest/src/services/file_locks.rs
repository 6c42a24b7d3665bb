//! Per-key async locks
//!
//! Serializes work on the same file record (or the same declared upload
//! name) while letting unrelated keys proceed concurrently. Map entries are
//! dropped once the last holder or waiter releases them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap<K> = Mutex<HashMap<K, Arc<AsyncMutex<()>>>>;

/// Collection of named async mutexes
pub struct KeyedLocks<K> {
    locks: Arc<LockMap<K>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let mutex = {
            let mut locks = lock_map(&self.locks);
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = mutex.lock_owned().await;
        KeyGuard {
            key,
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited
    pub fn active_keys(&self) -> usize {
        lock_map(&self.locks).len()
    }
}

/// Held lock for one key; released on drop
pub struct KeyGuard<K>
where
    K: Eq + Hash,
{
    key: K,
    locks: Arc<LockMap<K>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyGuard<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        // Release before inspecting the refcount so waiters can proceed
        self.guard.take();

        let mut locks = lock_map(&self.locks);
        let unused = locks
            .get(&self.key)
            .map(|mutex| Arc::strong_count(mutex) == 1)
            .unwrap_or(false);
        if unused {
            locks.remove(&self.key);
        }
    }
}

fn lock_map<K>(locks: &LockMap<K>) -> MutexGuard<'_, HashMap<K, Arc<AsyncMutex<()>>>> {
    // The map holds no invariants a panicking holder could break
    locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
