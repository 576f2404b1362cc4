// Per-key in-flight guard: at most one operation per key at a time.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

/// Set of keys with an operation currently running.
///
/// `try_acquire` never waits: a second caller for a busy key gets `None`
/// and is expected to report the conflict instead of queueing.
#[derive(Debug)]
pub struct KeyedGuard<K> {
    active: Arc<Mutex<HashSet<K>>>,
}

impl<K> Default for KeyedGuard<K> {
    fn default() -> Self {
        Self { active: Arc::new(Mutex::new(HashSet::new())) }
    }
}

impl<K: Eq + Hash + Clone> KeyedGuard<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, key: K) -> Option<GuardToken<K>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(key.clone()) {
            return None;
        }
        Some(GuardToken { active: Arc::clone(&self.active), key })
    }

    pub fn is_active(&self, key: &K) -> bool {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).contains(key)
    }
}

/// Releases its key when dropped.
#[derive(Debug)]
pub struct GuardToken<K: Eq + Hash> {
    active: Arc<Mutex<HashSet<K>>>,
    key: K,
}

impl<K: Eq + Hash> Drop for GuardToken<K> {
    fn drop(&mut self) {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.key);
    }
}
