//! Credential records held by the vault.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::vault::VaultError;

/// Which half of the credential pair a record is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Access,
    Refresh,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 2] = [CredentialKind::Access, CredentialKind::Refresh];

    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Access => "access",
            CredentialKind::Refresh => "refresh",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque, time-bounded secret.
///
/// The secret is wiped from memory when the record is dropped.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    #[zeroize(skip)]
    kind: CredentialKind,
    secret: String,
    #[zeroize(skip)]
    issued_at: SystemTime,
    #[zeroize(skip)]
    expires_at: SystemTime,
}

impl Credential {
    /// Build a record, rejecting lifetimes where `expires_at <= issued_at`.
    pub fn new(
        kind: CredentialKind,
        secret: impl Into<String>,
        issued_at: SystemTime,
        expires_at: SystemTime,
    ) -> Result<Self, VaultError> {
        let credential = Self {
            kind,
            secret: secret.into(),
            issued_at,
            expires_at,
        };
        credential.validate()?;
        Ok(credential)
    }

    /// Build a record that lives for `ttl` from `issued_at`.
    pub fn with_ttl(
        kind: CredentialKind,
        secret: impl Into<String>,
        issued_at: SystemTime,
        ttl: Duration,
    ) -> Result<Self, VaultError> {
        Self::new(kind, secret, issued_at, issued_at + ttl)
    }

    pub(crate) fn validate(&self) -> Result<(), VaultError> {
        if self.expires_at <= self.issued_at {
            return Err(VaultError::InvalidCredential {
                kind: self.kind,
                reason: "expires_at must be later than issued_at".to_string(),
            });
        }
        if self.secret.is_empty() {
            return Err(VaultError::InvalidCredential {
                kind: self.kind,
                reason: "secret is empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn issued_at(&self) -> SystemTime {
        self.issued_at
    }

    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    /// True once `now` has reached `expires_at`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("secret", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The access/refresh pair returned by a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access: Credential,
    pub refresh: Credential,
}

impl CredentialPair {
    /// Pair two records, checking each one sits in the right slot.
    pub fn new(access: Credential, refresh: Credential) -> Result<Self, VaultError> {
        for (expected, credential) in [
            (CredentialKind::Access, &access),
            (CredentialKind::Refresh, &refresh),
        ] {
            if credential.kind() != expected {
                return Err(VaultError::InvalidCredential {
                    kind: expected,
                    reason: format!("got a {} credential in the {} slot", credential.kind(), expected),
                });
            }
        }
        Ok(Self { access, refresh })
    }

    pub fn get(&self, kind: CredentialKind) -> &Credential {
        match kind {
            CredentialKind::Access => &self.access,
            CredentialKind::Refresh => &self.refresh,
        }
    }
}
