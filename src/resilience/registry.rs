//! Named breakers, one per configured downstream target.

use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::config::BreakerConfig;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
use crate::runtime::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no circuit breaker configured for target '{0}'")]
pub struct UnknownTarget(pub String);

/// Lazily creates breakers for configured targets and hands out shared instances.
pub struct BreakerRegistry {
    configs: HashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    clock: Arc<dyn Clock>,
}

impl BreakerRegistry {
    pub fn new(configs: &BTreeMap<String, BreakerConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            configs: configs
                .iter()
                .map(|(target, config)| (target.clone(), CircuitBreakerConfig::from(config)))
                .collect(),
            breakers: DashMap::new(),
            clock,
        }
    }

    /// The breaker for `target`. Repeated calls return the same instance.
    pub fn get(&self, target: &str) -> Result<Arc<CircuitBreaker>, UnknownTarget> {
        if let Some(existing) = self.breakers.get(target) {
            return Ok(existing.clone());
        }

        let config = self
            .configs
            .get(target)
            .copied()
            .ok_or_else(|| UnknownTarget(target.to_string()))?;

        let breaker = self
            .breakers
            .entry(target.to_string())
            .or_insert_with(|| {
                tracing::debug!(breaker = %target, "Circuit breaker created");
                Arc::new(CircuitBreaker::new(target, config, self.clock.clone()))
            })
            .clone();
        Ok(breaker)
    }

    /// Configured target names, sorted.
    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.configs.keys().cloned().collect();
        targets.sort();
        targets
    }

    /// Snapshots of every breaker created so far.
    pub fn snapshot_all(&self) -> BTreeMap<String, CircuitSnapshot> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;
    use crate::runtime::ManualClock;

    fn registry() -> BreakerRegistry {
        let mut configs = BTreeMap::new();
        configs.insert(
            "billing".to_string(),
            BreakerConfig {
                failure_threshold: 1,
                reset_timeout_ms: 60_000,
                success_threshold: 1,
                call_timeout_ms: 1_000,
            },
        );
        BreakerRegistry::new(&configs, Arc::new(ManualClock::default()))
    }

    #[test]
    fn test_same_instance_per_target() {
        let registry = registry();
        let a = registry.get("billing").unwrap();
        let b = registry.get("billing").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.config().reset_timeout, std::time::Duration::from_secs(60));
    }

    #[test]
    fn test_unknown_target_is_an_error() {
        let err = registry().get("search").unwrap_err();
        assert_eq!(err, UnknownTarget("search".into()));
    }

    #[tokio::test]
    async fn test_snapshot_and_reset_all() {
        let registry = registry();
        assert!(registry.snapshot_all().is_empty());

        let breaker = registry.get("billing").unwrap();
        let _ = breaker.execute(|| async { Err::<(), _>("down") }).await;
        assert_eq!(registry.snapshot_all()["billing"].state, CircuitState::Open);

        registry.reset_all();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(registry.targets(), vec!["billing".to_string()]);
    }
}
