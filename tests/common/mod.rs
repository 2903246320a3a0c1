//! Shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use session_guard::config::{parse_config, CoreConfig};
use session_guard::csrf::{AntiForgeryToken, FetchError, TokenSource};
use session_guard::runtime::{Clock, ManualClock, ManualScheduler};
use session_guard::storage::MemoryStore;
use session_guard::vault::{Credential, CredentialKind, CredentialPair};
use session_guard::SessionEnv;

pub const MIN: u64 = 60;

/// Config used across the integration suites: one `billing` breaker with the
/// 3 failures / 60 s / 2 successes tuning.
pub fn fixture_config() -> CoreConfig {
    parse_config(
        r#"
        [session]
        idle_timeout_secs = 1800
        warning_secs = 300
        countdown_tick_secs = 0

        [breakers.billing]
        failure_threshold = 3
        reset_timeout_ms = 60000
        success_threshold = 2
        call_timeout_ms = 2000
        "#,
    )
    .unwrap()
}

/// A login response: access valid for `access_ttl`, refresh for a day.
pub fn login_pair(clock: &dyn Clock, access_ttl: Duration) -> CredentialPair {
    let now = clock.now();
    CredentialPair::new(
        Credential::with_ttl(CredentialKind::Access, "access-token", now, access_ttl).unwrap(),
        Credential::with_ttl(CredentialKind::Refresh, "refresh-token", now, Duration::from_secs(86_400)).unwrap(),
    )
    .unwrap()
}

/// Virtual time plus a store the test can inspect.
pub struct VirtualEnv {
    pub scheduler: ManualScheduler,
    pub clock: ManualClock,
    pub store: MemoryStore,
}

impl VirtualEnv {
    pub fn new() -> Self {
        let scheduler = ManualScheduler::new(ManualClock::default());
        Self {
            clock: scheduler.clock(),
            scheduler,
            store: MemoryStore::new(),
        }
    }

    pub fn session_env(&self) -> SessionEnv {
        SessionEnv::manual(&self.scheduler, self.store.clone())
    }
}

/// Token endpoint stand-in. Hands out `csrf-<n>` tokens, optionally after a
/// delay, and fails for as many calls as have been queued with `fail_next`.
pub struct ScriptedSource {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    delay: Option<Duration>,
    failures: Mutex<VecDeque<FetchError>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Arc<Self> {
        Self::build(clock, ttl, None)
    }

    pub fn slow(clock: Arc<dyn Clock>, ttl: Duration, delay: Duration) -> Arc<Self> {
        Self::build(clock, ttl, Some(delay))
    }

    fn build(clock: Arc<dyn Clock>, ttl: Duration, delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            ttl,
            delay,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn fail_next(&self, error: FetchError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for ScriptedSource {
    async fn fetch(&self) -> Result<AntiForgeryToken, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(AntiForgeryToken::with_ttl(format!("csrf-{}", n), self.clock.now(), self.ttl))
    }
}
