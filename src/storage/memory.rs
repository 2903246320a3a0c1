//! In-process store, lost when the process (the browsing session) ends.

use dashmap::DashMap;
use std::sync::Arc;

/// A thread-safe in-memory `KeyValueStore`.
///
/// Clones share the same entries, which lets tests inspect or tamper with
/// what a component persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.iter().map(|r| r.key().clone()).collect()
    }
}

impl super::KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.get(key).map(|r| r.value().clone())
    }

    fn set(&self, key: &str, value: Vec<u8>) {
        self.inner.insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) {
        self.inner.remove(key);
    }
}
