//! Credential vault.
//!
//! # Data Flow
//! ```text
//! login → store(pair)
//!     → cipher.rs seal(record JSON) under the in-memory session key
//!     → KeyValueStore["vault.access" / "vault.refresh"] = Envelope JSON
//!
//! gateway → retrieve(kind)
//!     → KeyValueStore get → cipher.rs open → expiry check → Some(record) | None
//!
//! logout / expiry → clear()
//!     → delete both envelopes, drop (and wipe) the session key
//! ```
//!
//! # Design Decisions
//! - The key never reaches the store, so a storage snapshot alone is useless
//! - Every decrypt problem degrades to "absent"; it is reported, never retried
//! - `is_expired` subtracts a safety buffer; `retrieve` uses the exact expiry

pub mod cipher;
pub mod credential;

use ring::rand::SystemRandom;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

use crate::config::VaultConfig;
use crate::observability::metrics;
use crate::runtime::{Clock, EventBus, Subscription};
use crate::storage::KeyValueStore;

pub use cipher::{CipherError, Envelope, SessionKey};
pub use credential::{Credential, CredentialKind, CredentialPair};

/// Errors surfaced by the vault.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The record violates the credential invariants.
    #[error("invalid {kind} credential: {reason}")]
    InvalidCredential { kind: CredentialKind, reason: String },

    /// No valid credential of this kind is held.
    #[error("no valid {kind} credential")]
    CredentialAbsent { kind: CredentialKind },

    /// The stored envelope could not be opened. It has been removed, so later
    /// reads report `CredentialAbsent`.
    #[error("stored {kind} credential could not be decrypted")]
    DecryptionFailure { kind: CredentialKind },
}

/// Notifications published by the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    Stored,
    Cleared,
    /// A stored envelope could not be decrypted (tampering, foreign session
    /// key, corruption). The credential is treated as absent.
    DecryptionFailed { kind: CredentialKind },
    /// Sealing failed during `store`; the vault is left empty.
    EncryptionFailed { kind: CredentialKind },
}

fn storage_key(kind: CredentialKind) -> &'static str {
    match kind {
        CredentialKind::Access => "vault.access",
        CredentialKind::Refresh => "vault.refresh",
    }
}

/// Encrypted holder of the session's access/refresh pair.
pub struct CredentialVault {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    expiry_buffer: Duration,
    key: Mutex<Option<SessionKey>>,
    rng: SystemRandom,
    events: EventBus<VaultEvent>,
}

impl CredentialVault {
    /// Create a vault and derive this session's key.
    pub fn new(config: &VaultConfig, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let rng = SystemRandom::new();
        let key = match SessionKey::generate(&rng) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::error!(error = %e, "Failed to derive session key; vault will hold nothing");
                None
            }
        };

        Self {
            store,
            clock,
            expiry_buffer: Duration::from_secs(config.expiry_buffer_secs),
            key: Mutex::new(key),
            rng,
            events: EventBus::new(),
        }
    }

    /// Encrypt and persist both records, replacing any existing pair.
    ///
    /// Only invalid input is an error. An encryption failure leaves the vault
    /// empty, which callers observe as "not logged in".
    pub fn store(&self, pair: CredentialPair) -> Result<(), VaultError> {
        pair.access.validate()?;
        pair.refresh.validate()?;

        let mut key_slot = self.key.lock().unwrap_or_else(|e| e.into_inner());
        if key_slot.is_none() {
            // Key material was wiped by an earlier clear(); this is a new login.
            *key_slot = SessionKey::generate(&self.rng).ok();
        }

        let mut sealed = Vec::with_capacity(2);
        let mut failure = None;
        for kind in CredentialKind::ALL {
            match self.seal(key_slot.as_ref(), pair.get(kind)) {
                Ok(bytes) => sealed.push((kind, bytes)),
                Err(e) => {
                    tracing::error!(kind = %kind, error = %e, "Credential encryption failed");
                    failure = Some(kind);
                    break;
                }
            }
        }
        drop(key_slot);

        if let Some(kind) = failure {
            for k in CredentialKind::ALL {
                self.store.delete(storage_key(k));
            }
            self.events.emit(&VaultEvent::EncryptionFailed { kind });
            return Ok(());
        }

        for (kind, bytes) in sealed {
            self.store.set(storage_key(kind), bytes);
        }

        tracing::info!("Credential pair stored");
        self.events.emit(&VaultEvent::Stored);
        Ok(())
    }

    /// The current record of `kind`, or `None` if absent, expired or unreadable.
    pub fn retrieve(&self, kind: CredentialKind) -> Option<Credential> {
        self.require(kind).ok()
    }

    /// Like `retrieve`, but as a `Result` for `?`-style callers. A decrypt
    /// failure is reported as such the first time it is seen.
    pub fn require(&self, kind: CredentialKind) -> Result<Credential, VaultError> {
        let credential = self.load(kind, true)?.ok_or(VaultError::CredentialAbsent { kind })?;
        if credential.is_expired_at(self.clock.now()) {
            tracing::debug!(kind = %kind, "Stored credential has expired");
            return Err(VaultError::CredentialAbsent { kind });
        }
        Ok(credential)
    }

    /// Whether `kind` is absent or within the safety buffer of its expiry.
    ///
    /// Has no side effects: unreadable envelopes are not reported or removed.
    pub fn is_expired(&self, kind: CredentialKind) -> bool {
        match self.load(kind, false) {
            Ok(Some(credential)) => self.clock.now() + self.expiry_buffer >= credential.expires_at(),
            Ok(None) | Err(_) => true,
        }
    }

    /// Erase both records and the session key. Safe to call repeatedly.
    pub fn clear(&self) {
        let had_key = self
            .key
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some();

        let mut had_data = false;
        for kind in CredentialKind::ALL {
            let key = storage_key(kind);
            if self.store.get(key).is_some() {
                had_data = true;
                self.store.delete(key);
            }
        }

        if had_key || had_data {
            tracing::info!("Credential vault cleared");
            self.events.emit(&VaultEvent::Cleared);
        }
    }

    /// Subscribe to vault notifications.
    pub fn on_event<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&VaultEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    fn seal(&self, key: Option<&SessionKey>, credential: &Credential) -> Result<Vec<u8>, CipherError> {
        let key = key.ok_or(CipherError::Derive)?;
        let plaintext = zeroize::Zeroizing::new(
            serde_json::to_vec(credential).map_err(|e| CipherError::Malformed(e.to_string()))?,
        );
        key.seal(&self.rng, credential.kind().as_str().as_bytes(), &plaintext)?
            .to_bytes()
    }

    fn load(&self, kind: CredentialKind, report: bool) -> Result<Option<Credential>, VaultError> {
        let Some(bytes) = self.store.get(storage_key(kind)) else { return Ok(None) };

        match self.open(kind, &bytes) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                if report {
                    tracing::warn!(kind = %kind, error = %e, "Stored credential could not be decrypted");
                    metrics::record_decrypt_failure(kind.as_str());
                    self.store.delete(storage_key(kind));
                    self.events.emit(&VaultEvent::DecryptionFailed { kind });
                }
                Err(VaultError::DecryptionFailure { kind })
            }
        }
    }

    fn open(&self, kind: CredentialKind, bytes: &[u8]) -> Result<Credential, CipherError> {
        let envelope = Envelope::from_bytes(bytes)?;
        let plaintext = {
            let key_slot = self.key.lock().unwrap_or_else(|e| e.into_inner());
            let key = key_slot.as_ref().ok_or(CipherError::Open)?;
            key.open(kind.as_str().as_bytes(), &envelope)?
        };

        let credential: Credential =
            serde_json::from_slice(&plaintext).map_err(|e| CipherError::Malformed(e.to_string()))?;
        if credential.kind() != kind || credential.validate().is_err() {
            return Err(CipherError::Malformed("record does not match its slot".to_string()));
        }
        Ok(credential)
    }
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("expiry_buffer", &self.expiry_buffer)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ManualClock;
    use crate::storage::MemoryStore;
    use std::time::SystemTime;

    struct Fixture {
        vault: CredentialVault,
        store: MemoryStore,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let clock = ManualClock::default();
        let vault = CredentialVault::new(
            &VaultConfig { expiry_buffer_secs: 30 },
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
        );
        Fixture { vault, store, clock }
    }

    fn pair(now: SystemTime, access_ttl: u64, refresh_ttl: u64) -> CredentialPair {
        CredentialPair::new(
            Credential::with_ttl(CredentialKind::Access, "access-secret", now, Duration::from_secs(access_ttl)).unwrap(),
            Credential::with_ttl(CredentialKind::Refresh, "refresh-secret", now, Duration::from_secs(refresh_ttl)).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_store_then_retrieve_until_expiry() {
        let f = fixture();
        let p = pair(f.clock.now(), 3600, 86_400);
        f.vault.store(p.clone()).unwrap();

        assert_eq!(f.vault.retrieve(CredentialKind::Access), Some(p.access.clone()));
        assert_eq!(f.vault.retrieve(CredentialKind::Refresh), Some(p.refresh.clone()));

        f.clock.advance(Duration::from_secs(3599));
        assert_eq!(f.vault.retrieve(CredentialKind::Access), Some(p.access.clone()));

        f.clock.advance(Duration::from_secs(1));
        assert_eq!(f.vault.retrieve(CredentialKind::Access), None);
        assert!(f.vault.retrieve(CredentialKind::Refresh).is_some());
    }

    #[test]
    fn test_login_expiry_scenario() {
        let f = fixture();
        f.vault.store(pair(f.clock.now(), 3600, 7200)).unwrap();
        assert!(!f.vault.is_expired(CredentialKind::Access));

        f.clock.advance(Duration::from_secs(3601));
        assert!(f.vault.is_expired(CredentialKind::Access));
        assert!(f.vault.retrieve(CredentialKind::Access).is_none());
    }

    #[test]
    fn test_is_expired_applies_buffer() {
        let f = fixture();
        f.vault.store(pair(f.clock.now(), 100, 7200)).unwrap();

        f.clock.advance(Duration::from_secs(69));
        assert!(!f.vault.is_expired(CredentialKind::Access));
        f.clock.advance(Duration::from_secs(1));
        assert!(f.vault.is_expired(CredentialKind::Access));
        // Still retrievable: the buffer only informs pre-emption.
        assert!(f.vault.retrieve(CredentialKind::Access).is_some());
    }

    #[test]
    fn test_never_writes_plaintext_or_key() {
        let f = fixture();
        f.vault.store(pair(f.clock.now(), 60, 60)).unwrap();

        let mut keys = f.store.keys();
        keys.sort();
        assert_eq!(keys, vec!["vault.access".to_string(), "vault.refresh".to_string()]);

        for key in keys {
            let raw = String::from_utf8(f.store.get(&key).unwrap()).unwrap();
            assert!(!raw.contains("access-secret"));
            assert!(!raw.contains("refresh-secret"));
        }
    }

    #[test]
    fn test_corrupted_ciphertext_reads_as_absent_and_is_reported() {
        let f = fixture();
        f.vault.store(pair(f.clock.now(), 60, 60)).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        let _sub = f.vault.on_event(move |ev| e.lock().unwrap().push(ev.clone()));

        let mut envelope = Envelope::from_bytes(&f.store.get("vault.access").unwrap()).unwrap();
        let mut chars: Vec<char> = envelope.ciphertext.chars().collect();
        chars[20] = if chars[20] == 'A' { 'B' } else { 'A' };
        envelope.ciphertext = chars.into_iter().collect();
        f.store.set("vault.access", envelope.to_bytes().unwrap());

        assert!(f.vault.is_expired(CredentialKind::Access));
        assert!(events.lock().unwrap().is_empty());

        assert_eq!(f.vault.retrieve(CredentialKind::Access), None);
        assert_eq!(
            *events.lock().unwrap(),
            vec![VaultEvent::DecryptionFailed { kind: CredentialKind::Access }]
        );
        // Not retried: the unreadable envelope is gone.
        assert!(f.store.get("vault.access").is_none());
        assert!(f.vault.retrieve(CredentialKind::Refresh).is_some());
    }

    #[test]
    fn test_garbage_bytes_read_as_absent() {
        let f = fixture();
        f.store.set("vault.refresh", b"\x00\x01garbage".to_vec());
        assert_eq!(f.vault.retrieve(CredentialKind::Refresh), None);
    }

    #[test]
    fn test_swapped_envelopes_fail_authentication() {
        let f = fixture();
        f.vault.store(pair(f.clock.now(), 60, 60)).unwrap();
        let access = f.store.get("vault.access").unwrap();
        let refresh = f.store.get("vault.refresh").unwrap();
        f.store.set("vault.access", refresh);
        f.store.set("vault.refresh", access);

        assert!(f.vault.retrieve(CredentialKind::Access).is_none());
        assert!(f.vault.retrieve(CredentialKind::Refresh).is_none());
    }

    #[test]
    fn test_snapshot_unreadable_by_another_vault() {
        let f = fixture();
        f.vault.store(pair(f.clock.now(), 60, 60)).unwrap();

        let other = CredentialVault::new(
            &VaultConfig { expiry_buffer_secs: 30 },
            Arc::new(f.store.clone()),
            Arc::new(f.clock.clone()),
        );
        assert!(other.retrieve(CredentialKind::Access).is_none());
    }

    #[test]
    fn test_clear_is_idempotent_and_wipes_key() {
        let f = fixture();
        let cleared = Arc::new(Mutex::new(0));
        let c = cleared.clone();
        let _sub = f.vault.on_event(move |ev| {
            if *ev == VaultEvent::Cleared {
                *c.lock().unwrap() += 1;
            }
        });

        f.vault.store(pair(f.clock.now(), 60, 60)).unwrap();
        let snapshot = f.store.get("vault.access").unwrap();

        f.vault.clear();
        f.vault.clear();
        assert!(f.store.is_empty());
        assert_eq!(*cleared.lock().unwrap(), 1);

        // A restored snapshot is useless once the key is gone.
        f.store.set("vault.access", snapshot);
        assert!(f.vault.retrieve(CredentialKind::Access).is_none());

        // A later login works with a fresh key.
        f.vault.store(pair(f.clock.now(), 60, 60)).unwrap();
        assert!(f.vault.retrieve(CredentialKind::Access).is_some());
    }

    #[test]
    fn test_store_replaces_existing_pair() {
        let f = fixture();
        f.vault.store(pair(f.clock.now(), 60, 60)).unwrap();

        let now = f.clock.now();
        let replacement = CredentialPair::new(
            Credential::with_ttl(CredentialKind::Access, "new-access", now, Duration::from_secs(60)).unwrap(),
            Credential::with_ttl(CredentialKind::Refresh, "new-refresh", now, Duration::from_secs(60)).unwrap(),
        )
        .unwrap();
        f.vault.store(replacement).unwrap();

        assert_eq!(f.vault.require(CredentialKind::Access).unwrap().secret(), "new-access");
    }

    #[test]
    fn test_require_distinguishes_tampering_once() {
        let f = fixture();
        f.vault.store(pair(f.clock.now(), 60, 60)).unwrap();
        f.store.set("vault.refresh", b"not an envelope".to_vec());

        assert!(matches!(
            f.vault.require(CredentialKind::Refresh),
            Err(VaultError::DecryptionFailure { kind: CredentialKind::Refresh })
        ));
        assert!(matches!(
            f.vault.require(CredentialKind::Refresh),
            Err(VaultError::CredentialAbsent { kind: CredentialKind::Refresh })
        ));
        assert!(f.vault.require(CredentialKind::Access).is_ok());
    }

    #[test]
    fn test_require_reports_absence() {
        let f = fixture();
        assert!(matches!(
            f.vault.require(CredentialKind::Access),
            Err(VaultError::CredentialAbsent { kind: CredentialKind::Access })
        ));
    }
}
