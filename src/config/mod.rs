//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CoreConfig (validated, immutable)
//!     → each section handed to the component it configures
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a new core
//! - Every section has defaults so an empty file is valid
//! - Breaker tables are the exception: all four fields must be given
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{AntiForgeryConfig, BreakerConfig, CoreConfig, ObservabilityConfig, SessionConfig, VaultConfig};
pub use validation::{validate_config, ValidationError};
