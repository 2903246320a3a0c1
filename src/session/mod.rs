//! Session activity monitoring and idle expiry.
//!
//! # Data Flow
//! ```text
//! UI input events → record_activity(kind)
//!     → throttle (coalesce bursts while ACTIVE)
//!     → state.rs reset → deadlines recomputed → deadline timer rescheduled
//!
//! deadline timer fires → state.rs on_deadline(now)
//!     ACTIVE  → WARNING: emit Warning{remaining}, start countdown ticks
//!     WARNING → EXPIRED: emit Expired, clear the credential vault
//!
//! extend() / activity while WARNING → ACTIVE (deadlines from now)
//! logout() from any state → EXPIRED immediately
//! ```
//!
//! # Design Decisions
//! - The state machine (state.rs) is pure and clock-free; monitor.rs owns timers
//! - Every reschedule bumps a generation so late timers from an older schedule no-op
//! - EXPIRED is terminal; a new login builds a new monitor

pub mod monitor;
pub mod state;

pub use monitor::{ActivityKind, SessionError, SessionEvent, SessionMonitor};
pub use state::{ExpiryReason, IdlePolicy, SessionState, SessionStatus, Transition};
