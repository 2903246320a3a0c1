//! Anti-forgery (CSRF) token management.
//!
//! # Data Flow
//! ```text
//! gateway → get_token()
//!     → cached token outside renewal buffer? return it
//!     → else join the single in-flight fetch (or start one)
//!         → TokenSource::fetch() (http_source.rs in production)
//!         → accept: cache, persist to session store, schedule renewal
//!
//! renewal timer (expires_at − buffer) → get_token() in the background
//! server reports mismatch → gateway calls invalidate()
//! ```
//!
//! # Design Decisions
//! - At most one fetch is outstanding; concurrent callers share its result
//! - A started fetch runs to completion even if every caller gives up
//! - A failed refresh may fall back to the stale (unexpired) token once
//! - Never hands out an empty result: failure is `CsrfError::Unavailable`

pub mod http_source;
pub mod manager;
pub mod token;

pub use http_source::HttpTokenSource;
pub use manager::{AntiForgeryManager, CsrfError};
pub use token::{AntiForgeryToken, FetchError, TokenSource};
