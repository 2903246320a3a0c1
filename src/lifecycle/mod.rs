//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Login (session.rs):
//!     CoreConfig + credential pair + token source
//!     → CredentialVault::new, store(pair)
//!     → AntiForgeryManager::new (hydrates a persisted token)
//!     → SessionMonitor::start (ACTIVE, deadlines armed)
//!     → BreakerRegistry::new (breakers created on first use)
//!
//! Use:
//!     gateway → SessionCore accessors → SessionExpired once the monitor has expired
//!
//! Dispose:
//!     cancel timers → forget anti-forgery token → clear vault
//! ```
//!
//! # Design Decisions
//! - One core per login; nothing is global, so concurrent sessions never share state
//! - Expiry and logout are driven by the monitor; the core only observes them
//! - Dispose is idempotent and does not emit a session event
//! - Dropping a core without dispose leaves storage intact; pending timers hold weak refs and no-op

pub mod session;

pub use session::{SessionCore, SessionEnv};
