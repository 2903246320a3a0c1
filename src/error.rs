//! Crate-level error taxonomy.
//!
//! Component errors (`VaultError`, `CsrfError`, `SessionError`, `BreakerError`,
//! `ConfigError`) convert into `CoreError` so a gateway can decide what to do
//! with a single match.

use std::time::{Duration, SystemTime};
use thiserror::Error;

use crate::config::ConfigError;
use crate::csrf::{CsrfError, FetchError};
use crate::resilience::{BreakerError, UnknownTarget};
use crate::session::SessionError;
use crate::vault::{CredentialKind, VaultError};

#[derive(Debug, Error)]
pub enum CoreError {
    /// No valid credential of this kind. Re-authenticate; do not retry.
    #[error("no valid {kind} credential")]
    CredentialAbsent { kind: CredentialKind },

    /// A stored credential could not be decrypted. Handled like `CredentialAbsent`.
    #[error("stored {kind} credential could not be decrypted")]
    DecryptionFailure { kind: CredentialKind },

    #[error("invalid {kind} credential: {reason}")]
    InvalidCredential { kind: CredentialKind, reason: String },

    /// No anti-forgery token could be obtained; the request must not be sent.
    #[error("anti-forgery token unavailable: {0}")]
    AntiForgeryFetchFailure(FetchError),

    /// The server rejected the anti-forgery token.
    #[error("server rejected the anti-forgery token")]
    AntiForgeryMismatch,

    #[error("session has expired")]
    SessionExpired,

    /// Rejected by an open breaker; the operation was not invoked.
    #[error("service '{target}' temporarily unavailable")]
    CircuitOpen {
        target: String,
        retry_at: Option<SystemTime>,
    },

    #[error("call to '{target}' timed out after {}ms", .after.as_millis())]
    OperationTimeout { target: String, after: Duration },

    #[error(transparent)]
    UnknownTarget(#[from] UnknownTarget),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CoreError {
    /// The user has to log in again before anything else will work.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            CoreError::CredentialAbsent { .. }
                | CoreError::DecryptionFailure { .. }
                | CoreError::SessionExpired
        )
    }

    /// The gateway may invalidate the anti-forgery token and retry once.
    pub fn is_retryable_by_gateway(&self) -> bool {
        matches!(self, CoreError::AntiForgeryMismatch)
    }
}

impl From<VaultError> for CoreError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::CredentialAbsent { kind } => CoreError::CredentialAbsent { kind },
            VaultError::DecryptionFailure { kind } => CoreError::DecryptionFailure { kind },
            VaultError::InvalidCredential { kind, reason } => CoreError::InvalidCredential { kind, reason },
        }
    }
}

impl From<CsrfError> for CoreError {
    fn from(err: CsrfError) -> Self {
        match err {
            CsrfError::Unavailable(fetch) => CoreError::AntiForgeryFetchFailure(fetch),
            CsrfError::Disposed => CoreError::SessionExpired,
        }
    }
}

impl From<SessionError> for CoreError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Expired => CoreError::SessionExpired,
        }
    }
}

/// Breaker-originated errors become `CoreError`; the operation's own error is
/// handed back untouched as the `Err` side.
impl<E> TryFrom<BreakerError<E>> for CoreError {
    type Error = E;

    fn try_from(err: BreakerError<E>) -> Result<Self, E> {
        match err {
            BreakerError::Open { target, retry_at } => Ok(CoreError::CircuitOpen { target, retry_at }),
            BreakerError::Timeout { target, after } => Ok(CoreError::OperationTimeout { target, after }),
            BreakerError::Operation(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reauthentication_classes() {
        let absent = CoreError::from(VaultError::CredentialAbsent {
            kind: CredentialKind::Access,
        });
        assert!(absent.requires_reauthentication());
        assert!(CoreError::DecryptionFailure {
            kind: CredentialKind::Refresh
        }
        .requires_reauthentication());
        assert!(CoreError::from(SessionError::Expired).requires_reauthentication());

        let fetch = CoreError::from(CsrfError::Unavailable(FetchError::Status(503)));
        assert!(!fetch.requires_reauthentication());
        assert!(!fetch.is_retryable_by_gateway());
    }

    #[test]
    fn test_decrypt_failure_maps_to_its_own_variant() {
        let err = CoreError::from(VaultError::DecryptionFailure {
            kind: CredentialKind::Access,
        });
        assert!(matches!(err, CoreError::DecryptionFailure { kind: CredentialKind::Access }));
        assert!(err.requires_reauthentication());
    }

    #[test]
    fn test_only_mismatch_is_retryable() {
        assert!(CoreError::AntiForgeryMismatch.is_retryable_by_gateway());
        assert!(!CoreError::SessionExpired.is_retryable_by_gateway());
        assert!(!CoreError::CircuitOpen {
            target: "billing".into(),
            retry_at: None
        }
        .is_retryable_by_gateway());
    }

    #[test]
    fn test_breaker_errors_split_from_operation_errors() {
        let open: BreakerError<&str> = BreakerError::Open {
            target: "billing".into(),
            retry_at: None,
        };
        let core = CoreError::try_from(open).unwrap();
        assert_eq!(core.to_string(), "service 'billing' temporarily unavailable");

        let op: BreakerError<&str> = BreakerError::Operation("payment declined");
        assert_eq!(CoreError::try_from(op).unwrap_err(), "payment declined");
    }

    #[test]
    fn test_disposed_manager_reads_as_expired() {
        assert!(matches!(CoreError::from(CsrfError::Disposed), CoreError::SessionExpired));
    }
}
