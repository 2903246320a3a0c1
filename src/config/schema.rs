//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the session core.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    /// Credential vault settings.
    pub vault: VaultConfig,

    /// Anti-forgery token lifecycle settings.
    pub anti_forgery: AntiForgeryConfig,

    /// Idle session monitor settings.
    pub session: SessionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Circuit breakers keyed by downstream target name.
    pub breakers: BTreeMap<String, BreakerConfig>,
}

/// Credential vault configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct VaultConfig {
    /// A credential within this many seconds of expiry counts as expired.
    pub expiry_buffer_secs: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            expiry_buffer_secs: 30,
        }
    }
}

/// Anti-forgery token configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AntiForgeryConfig {
    /// Renew this many seconds before the token expires.
    pub renewal_buffer_secs: u64,

    /// Token endpoint (GET). When unset the host supplies its own token source.
    pub endpoint: Option<String>,

    /// Timeout for a single token fetch.
    pub request_timeout_ms: u64,
}

impl Default for AntiForgeryConfig {
    fn default() -> Self {
        Self {
            renewal_buffer_secs: 60,
            endpoint: None,
            request_timeout_ms: 5_000,
        }
    }
}

/// Idle session configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity before the session is logged out.
    pub idle_timeout_secs: u64,

    /// Length of the warning window that precedes logout.
    pub warning_secs: u64,

    /// Minimum spacing between accepted activity signals.
    pub activity_throttle_ms: u64,

    /// Countdown event interval during the warning window. 0 disables ticks.
    pub countdown_tick_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30 * 60,
            warning_secs: 5 * 60,
            activity_throttle_ms: 1_000,
            countdown_tick_secs: 1,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

/// Per-target circuit breaker configuration. No field has a default.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Time spent open before a trial call is allowed.
    pub reset_timeout_ms: u64,

    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,

    /// Per-call timeout; exceeding it counts as a failure.
    pub call_timeout_ms: u64,
}
