//! Per-channel keyed Message Store.
//!
//! Deliberately a plain mutex-protected `HashMap`, not a lock-free map: the
//! critical section is O(1) over tiny payloads, and a full scan (`snapshot`)
//! needs an internal lock in any lock-free design anyway, so the lock-free
//! option buys nothing here and costs cache-coherence traffic on every
//! write. Do not "optimise" this without a benchmark to back it up.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::msg::Msg;

pub struct MessageStore<B> {
    entries: Mutex<HashMap<String, Msg<B>>>,
}

impl<B: Clone> MessageStore<B> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn put(&self, msg: Msg<B>) {
        let key = msg.key.clone().expect("store=true requires a key");
        let mut guard = self.entries.lock().expect("message store lock poisoned");
        guard.insert(key, msg);
    }

    pub fn remove(&self, key: &str) -> Option<Msg<B>> {
        let mut guard = self.entries.lock().expect("message store lock poisoned");
        guard.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<Msg<B>> {
        let guard = self.entries.lock().expect("message store lock poisoned");
        guard.get(key).cloned()
    }

    /// Point-in-time snapshot; order is unspecified. Callers needing
    /// sequence ordering rely on each message's `id`, not the iteration
    /// order here.
    pub fn snapshot(&self) -> Vec<Msg<B>> {
        let guard = self.entries.lock().expect("message store lock poisoned");
        guard.values().cloned().collect()
    }

    pub fn clear(&self) {
        let mut guard = self.entries.lock().expect("message store lock poisoned");
        guard.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("message store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: Clone> Default for MessageStore<B> {
    fn default() -> Self {
        Self::new()
    }
}
