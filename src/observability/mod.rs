//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields (logging.rs installs the subscriber)
//!     → metrics.rs (counters for breaker, anti-forgery, vault and session outcomes)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON lines)
//!     → Whatever `metrics` recorder the host installs
//! ```
//!
//! # Design Decisions
//! - Library code never installs a subscriber or recorder on its own
//! - Without a recorder every metric call is a no-op
//! - Secrets never appear in fields; credential and token types redact their Debug output

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
