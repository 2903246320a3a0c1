//! Session-scoped key-value storage.
//!
//! # Data Flow
//! ```text
//! CredentialVault ──(encrypted envelopes)──┐
//!                                          ├─→ KeyValueStore (get/set/delete bytes)
//! AntiForgeryManager ──(token JSON)────────┘
//! ```
//!
//! # Design Decisions
//! - Storage only ever sees bytes; neither encryption keys nor state machines live here
//! - Backends are swappable (memory, encrypted disk, remote) behind one trait
//! - A store is scoped to one browsing session and dropped with it

pub mod memory;

pub use memory::MemoryStore;

/// Minimal byte-oriented key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    fn set(&self, key: &str, value: Vec<u8>);

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str);
}
