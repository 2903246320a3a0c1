//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway call to a downstream target:
//!     → registry.rs (named breaker for the target)
//!     → circuit_breaker.rs (admit? CLOSED / HALF_OPEN trial : fail fast)
//!     → timeouts.rs (enforce per-call deadline, drop = abort)
//!     → outcome recorded, then returned to the caller unchanged
//! ```
//!
//! # Design Decisions
//! - Per-target circuit breaker (not global); targets never share counters
//! - Fail fast in Open state (no waiting for timeout)
//! - A timeout is a failure whether or not the operation noticed the abort
//! - No retries here; retry policy belongs to the caller

pub mod circuit_breaker;
pub mod registry;
pub mod timeouts;

pub use circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, CircuitTransition,
};
pub use registry::{BreakerRegistry, UnknownTarget};
pub use timeouts::TimeoutError;
