//! Timeout enforcement.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from the operation's own errors
//! - The timed-out future is dropped, which aborts it at its next await point

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation timed out after {}ms", .after.as_millis())]
pub struct TimeoutError {
    pub after: Duration,
}

/// Run `fut` to completion or fail once `limit` has elapsed.
pub async fn enforce<F>(limit: Duration, fut: F) -> Result<F::Output, TimeoutError>
where
    F: Future,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TimeoutError { after: limit })
}
