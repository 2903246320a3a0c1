//! Client-side session security core: encrypted credential vault, anti-forgery
//! token lifecycle, idle session monitor and per-target circuit breakers.

pub mod config;
pub mod csrf;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod vault;

pub use config::CoreConfig;
pub use error::CoreError;
pub use lifecycle::{SessionCore, SessionEnv};
