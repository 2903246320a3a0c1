//! Shared scheduling and event-emission utilities.
//!
//! # Data Flow
//! ```text
//! Component needs "now":
//!     → clock.rs (SystemClock in production, ManualClock in tests)
//!
//! Component needs a deadline callback (renewal, idle warning, logout):
//!     → scheduler.rs schedule_at(instant, callback) → TimerHandle
//!     → TimerHandle::cancel() on extension / reset / dispose
//!
//! Component changes state:
//!     → events.rs EventBus::emit(event)
//!     → every live Subscription callback observes it
//! ```
//!
//! # Design Decisions
//! - Wall-clock `SystemTime` everywhere; server-issued expiries are wall-clock
//! - Timer callbacks are synchronous; async follow-up work is spawned by the callee
//! - Listeners are invoked outside component locks so they may call back in

pub mod clock;
pub mod events;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{EventBus, Subscription};
pub use scheduler::{ManualScheduler, Scheduler, TimerHandle, TokioScheduler};
