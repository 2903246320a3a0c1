//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, timeouts > 0)
//! - Check that session windows nest (throttle < warning < idle timeout)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: CoreConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use url::Url;

use crate::config::schema::{BreakerConfig, CoreConfig};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem, with the dotted path of the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &CoreConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let session = &config.session;
    if session.idle_timeout_secs == 0 {
        errors.push(ValidationError::new("session.idle_timeout_secs", "must be greater than 0"));
    }
    if session.warning_secs == 0 {
        errors.push(ValidationError::new("session.warning_secs", "must be greater than 0"));
    } else if session.warning_secs >= session.idle_timeout_secs {
        errors.push(ValidationError::new(
            "session.warning_secs",
            format!("must be less than idle_timeout_secs ({})", session.idle_timeout_secs),
        ));
    }
    if session.activity_throttle_ms >= session.warning_secs.saturating_mul(1_000) {
        errors.push(ValidationError::new(
            "session.activity_throttle_ms",
            "must be shorter than the warning window",
        ));
    }

    let anti_forgery = &config.anti_forgery;
    if anti_forgery.request_timeout_ms == 0 {
        errors.push(ValidationError::new("anti_forgery.request_timeout_ms", "must be greater than 0"));
    }
    if let Some(endpoint) = &anti_forgery.endpoint {
        match Url::parse(endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ValidationError::new(
                "anti_forgery.endpoint",
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new("anti_forgery.endpoint", format!("invalid URL: {}", e))),
        }
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }

    for (target, breaker) in &config.breakers {
        validate_breaker(target, breaker, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(target: &str, breaker: &BreakerConfig, errors: &mut Vec<ValidationError>) {
    if target.trim().is_empty() {
        errors.push(ValidationError::new("breakers", "target name must not be empty"));
        return;
    }

    let checks = [
        ("failure_threshold", breaker.failure_threshold == 0),
        ("reset_timeout_ms", breaker.reset_timeout_ms == 0),
        ("success_threshold", breaker.success_threshold == 0),
        ("call_timeout_ms", breaker.call_timeout_ms == 0),
    ];
    for (field, is_zero) in checks {
        if is_zero {
            errors.push(ValidationError::new(
                format!("breakers.{}.{}", target, field),
                "must be greater than 0",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            reset_timeout_ms: 60_000,
            success_threshold: 2,
            call_timeout_ms: 2_000,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(validate_config(&CoreConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = CoreConfig::default();
        config.session.warning_secs = config.session.idle_timeout_secs;
        config.observability.log_level = "loud".into();
        config.breakers.insert(
            "billing".into(),
            BreakerConfig {
                failure_threshold: 0,
                call_timeout_ms: 0,
                ..breaker()
            },
        );

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "session.warning_secs",
                "observability.log_level",
                "breakers.billing.failure_threshold",
                "breakers.billing.call_timeout_ms",
            ]
        );
    }

    #[test]
    fn test_endpoint_must_be_http() {
        let mut config = CoreConfig::default();
        config.anti_forgery.endpoint = Some("ftp://example.com/csrf".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "anti_forgery.endpoint");

        config.anti_forgery.endpoint = Some("https://example.com/csrf".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_throttle_must_fit_inside_warning_window() {
        let mut config = CoreConfig::default();
        config.session.activity_throttle_ms = 300_000;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].to_string(), "session.activity_throttle_ms: must be shorter than the warning window");
    }

    #[test]
    fn test_blank_target_name() {
        let mut config = CoreConfig::default();
        config.breakers.insert(" ".into(), breaker());
        assert_eq!(validate_config(&config).unwrap_err()[0].field, "breakers");
    }
}
