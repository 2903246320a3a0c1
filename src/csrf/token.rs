//! Anti-forgery token type and the source it is fetched from.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// A server-issued anti-forgery token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntiForgeryToken {
    pub token: String,
    pub issued_at: SystemTime,
    pub expires_at: SystemTime,
}

impl AntiForgeryToken {
    pub fn new(token: impl Into<String>, issued_at: SystemTime, expires_at: SystemTime) -> Self {
        Self {
            token: token.into(),
            issued_at,
            expires_at,
        }
    }

    pub fn with_ttl(token: impl Into<String>, issued_at: SystemTime, ttl: Duration) -> Self {
        Self::new(token, issued_at, issued_at + ttl)
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }

    /// Whether the remaining lifetime at `now` has fallen inside `buffer`.
    pub fn needs_renewal_at(&self, now: SystemTime, buffer: Duration) -> bool {
        now + buffer >= self.expires_at
    }

    /// Instant at which a proactive renewal should run.
    pub fn renewal_due(&self, buffer: Duration) -> SystemTime {
        self.expires_at
            .checked_sub(buffer)
            .filter(|t| *t > self.issued_at)
            .unwrap_or(self.issued_at)
    }
}

impl fmt::Debug for AntiForgeryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AntiForgeryToken")
            .field("token", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Why a token could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("token endpoint returned status {0}")]
    Status(u16),

    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

/// Where anti-forgery tokens come from.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<AntiForgeryToken, FetchError>;
}
