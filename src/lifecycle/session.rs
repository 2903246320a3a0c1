//! Composition of the session components for one login.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::csrf::{AntiForgeryManager, AntiForgeryToken, TokenSource};
use crate::error::CoreError;
use crate::resilience::{BreakerRegistry, CircuitBreaker};
use crate::runtime::{Clock, ManualScheduler, Scheduler, Subscription, SystemClock, TokioScheduler};
use crate::session::{SessionEvent, SessionMonitor};
use crate::storage::{KeyValueStore, MemoryStore};
use crate::vault::{Credential, CredentialKind, CredentialPair, CredentialVault};

/// Storage, time source and timers shared by the components of a session.
#[derive(Clone)]
pub struct SessionEnv {
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
    pub scheduler: Arc<dyn Scheduler>,
}

impl SessionEnv {
    /// In-memory storage, wall clock, tokio timers. Must be built inside a runtime
    /// for timers to fire.
    pub fn system() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            store: Arc::new(MemoryStore::new()),
            scheduler: Arc::new(TokioScheduler::new(clock.clone())),
            clock,
        }
    }

    /// Virtual time driven by `scheduler.advance(..)`.
    pub fn manual(scheduler: &ManualScheduler, store: MemoryStore) -> Self {
        Self {
            store: Arc::new(store),
            clock: Arc::new(scheduler.clock()),
            scheduler: Arc::new(scheduler.clone()),
        }
    }
}

/// Everything a request gateway needs for one authenticated session.
pub struct SessionCore {
    id: Uuid,
    vault: Arc<CredentialVault>,
    anti_forgery: Arc<AntiForgeryManager>,
    monitor: Arc<SessionMonitor>,
    breakers: BreakerRegistry,
    expiry_watch: Mutex<Option<Subscription>>,
    disposed: AtomicBool,
}

impl SessionCore {
    /// Build the components for a fresh login and store its credential pair.
    pub fn login(
        config: &CoreConfig,
        pair: CredentialPair,
        token_source: Arc<dyn TokenSource>,
        env: SessionEnv,
    ) -> Result<Self, CoreError> {
        let id = Uuid::new_v4();

        let vault = Arc::new(CredentialVault::new(&config.vault, env.store.clone(), env.clock.clone()));
        vault.store(pair)?;

        let anti_forgery = AntiForgeryManager::new(
            &config.anti_forgery,
            token_source,
            env.store,
            env.clock.clone(),
            env.scheduler.clone(),
        );
        let monitor = SessionMonitor::start(&config.session, vault.clone(), env.clock.clone(), env.scheduler);
        let breakers = BreakerRegistry::new(&config.breakers, env.clock);

        let weak_csrf = Arc::downgrade(&anti_forgery);
        let expiry_watch = monitor.on_state_change(move |event| {
            if let SessionEvent::Expired { .. } = event {
                if let Some(csrf) = weak_csrf.upgrade() {
                    csrf.invalidate();
                }
            }
        });

        tracing::info!(session_id = %id, breakers = config.breakers.len(), "Session started");

        Ok(Self {
            id,
            vault,
            anti_forgery,
            monitor,
            breakers,
            expiry_watch: Mutex::new(Some(expiry_watch)),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The monitor stays reachable after expiry so observers can subscribe and
    /// the UI can read the final state.
    pub fn monitor(&self) -> &Arc<SessionMonitor> {
        &self.monitor
    }

    pub fn is_active(&self) -> bool {
        self.ensure_live().is_ok()
    }

    pub fn vault(&self) -> Result<&Arc<CredentialVault>, CoreError> {
        self.ensure_live()?;
        Ok(&self.vault)
    }

    pub fn anti_forgery(&self) -> Result<&Arc<AntiForgeryManager>, CoreError> {
        self.ensure_live()?;
        Ok(&self.anti_forgery)
    }

    pub fn breaker(&self, target: &str) -> Result<Arc<CircuitBreaker>, CoreError> {
        self.ensure_live()?;
        Ok(self.breakers.get(target)?)
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// The access credential to attach as a bearer, if still valid.
    pub fn access_credential(&self) -> Result<Credential, CoreError> {
        self.ensure_live()?;
        Ok(self.vault.require(CredentialKind::Access)?)
    }

    /// Replace the stored pair after a token refresh.
    pub fn store_credentials(&self, pair: CredentialPair) -> Result<(), CoreError> {
        self.ensure_live()?;
        Ok(self.vault.store(pair)?)
    }

    /// The anti-forgery token to attach to a state-changing request.
    pub async fn anti_forgery_token(&self) -> Result<AntiForgeryToken, CoreError> {
        self.ensure_live()?;
        Ok(self.anti_forgery.get_token().await?)
    }

    /// End the session now. Observers receive `Expired { reason: Logout }`.
    pub fn logout(&self) {
        tracing::info!(session_id = %self.id, "Logout requested");
        self.monitor.logout();
    }

    /// Tear down timers and forget all session secrets. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let watch = self.expiry_watch.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(watch) = watch {
            watch.unsubscribe();
        }
        self.monitor.dispose();
        self.anti_forgery.dispose();
        self.vault.clear();

        tracing::info!(session_id = %self.id, "Session disposed");
    }

    fn ensure_live(&self) -> Result<(), CoreError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(CoreError::SessionExpired);
        }
        Ok(self.monitor.ensure_active()?)
    }
}
