//! Metrics collection.
//!
//! # Metrics
//! - `session_guard_breaker_transitions_total` (counter): state changes by target, new state
//! - `session_guard_breaker_rejections_total` (counter): calls rejected while open, by target
//! - `session_guard_csrf_fetches_total` (counter): anti-forgery fetches by outcome
//! - `session_guard_vault_decrypt_failures_total` (counter): unreadable entries by credential kind
//! - `session_guard_sessions_expired_total` (counter): session ends by reason
//!
//! # Design Decisions
//! - Free functions so call sites stay one line
//! - Labels are low-cardinality: target names come from config, never from requests

use metrics::counter;

pub fn record_breaker_transition(target: &str, to: &str) {
    let labels = [("target", target.to_string()), ("to", to.to_string())];
    counter!("session_guard_breaker_transitions_total", &labels).increment(1);
}

pub fn record_breaker_rejection(target: &str) {
    let labels = [("target", target.to_string())];
    counter!("session_guard_breaker_rejections_total", &labels).increment(1);
}

pub fn record_csrf_fetch(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!("session_guard_csrf_fetches_total", &labels).increment(1);
}

pub fn record_decrypt_failure(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!("session_guard_vault_decrypt_failures_total", &labels).increment(1);
}

pub fn record_session_expired(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!("session_guard_sessions_expired_total", &labels).increment(1);
}
