//! Caching, deduplicating anti-forgery token manager.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use thiserror::Error;

use crate::config::AntiForgeryConfig;
use crate::csrf::token::{AntiForgeryToken, FetchError, TokenSource};
use crate::observability::metrics;
use crate::runtime::{Clock, Scheduler, TimerHandle};
use crate::storage::KeyValueStore;

const STORAGE_KEY: &str = "csrf.token";

type FetchFuture = Shared<BoxFuture<'static, Result<AntiForgeryToken, FetchError>>>;

/// Errors returned by `AntiForgeryManager::get_token`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CsrfError {
    /// No usable token could be obtained. Callers must not send the
    /// state-changing request without one.
    #[error("cannot obtain anti-forgery token: {0}")]
    Unavailable(FetchError),

    #[error("anti-forgery manager has been disposed")]
    Disposed,
}

#[derive(Default)]
struct State {
    token: Option<AntiForgeryToken>,
    in_flight: Option<(u64, FetchFuture)>,
    next_seq: u64,
    /// Fetch whose failure was papered over with the stale token.
    stale_grace: Option<u64>,
    renewal: Option<TimerHandle>,
    disposed: bool,
}

/// Holds the current anti-forgery token and keeps it fresh.
pub struct AntiForgeryManager {
    me: Weak<AntiForgeryManager>,
    source: Arc<dyn TokenSource>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    renewal_buffer: Duration,
    state: Mutex<State>,
}

impl AntiForgeryManager {
    /// Create a manager, reusing a still-valid token persisted earlier in this
    /// browsing session.
    pub fn new(
        config: &AntiForgeryConfig,
        source: Arc<dyn TokenSource>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        let manager = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            source,
            store,
            clock,
            scheduler,
            renewal_buffer: Duration::from_secs(config.renewal_buffer_secs),
            state: Mutex::new(State::default()),
        });
        manager.hydrate();
        manager
    }

    /// Return a valid token, fetching one first if none is cached or the
    /// cached one is inside the renewal buffer.
    pub async fn get_token(&self) -> Result<AntiForgeryToken, CsrfError> {
        let (seq, fetch) = {
            let mut state = self.lock();
            if state.disposed {
                return Err(CsrfError::Disposed);
            }
            if let Some(token) = &state.token {
                if !token.needs_renewal_at(self.clock.now(), self.renewal_buffer) {
                    return Ok(token.clone());
                }
            }
            self.join_or_start_fetch(&mut state)
        };

        let outcome = fetch.await;
        self.complete_fetch(seq, outcome)
    }

    /// Forget the cached token so the next `get_token` fetches a fresh one.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.token = None;
        state.stale_grace = None;
        if let Some(timer) = state.renewal.take() {
            timer.cancel();
        }
        drop(state);

        self.store.delete(STORAGE_KEY);
        tracing::info!("Anti-forgery token invalidated");
    }

    /// Cancel renewal, forget the token and refuse further use.
    pub fn dispose(&self) {
        self.invalidate();
        let mut state = self.lock();
        state.disposed = true;
        state.in_flight = None;
    }

    /// The cached token, if any, without triggering a fetch.
    pub fn peek(&self) -> Option<AntiForgeryToken> {
        self.lock().token.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn join_or_start_fetch(&self, state: &mut State) -> (u64, FetchFuture) {
        if let Some((seq, fetch)) = &state.in_flight {
            if fetch.peek().is_none() {
                tracing::debug!(seq, "Joining in-flight anti-forgery fetch");
                return (*seq, fetch.clone());
            }
            // A result nobody stayed to collect is stale by now; fetch again.
            tracing::debug!(seq, "Discarding abandoned anti-forgery fetch result");
            state.in_flight = None;
        }

        let seq = state.next_seq;
        state.next_seq += 1;

        let source = self.source.clone();
        let fetch: FetchFuture = async move { source.fetch().await }.boxed().shared();

        // Drive the fetch independently of callers so it is never abandoned half-way.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(fetch.clone());
        }

        tracing::debug!(seq, "Starting anti-forgery token fetch");
        state.in_flight = Some((seq, fetch.clone()));
        (seq, fetch)
    }

    fn complete_fetch(
        &self,
        seq: u64,
        outcome: Result<AntiForgeryToken, FetchError>,
    ) -> Result<AntiForgeryToken, CsrfError> {
        let now = self.clock.now();
        let outcome = outcome.and_then(|token| {
            if token.token.is_empty() {
                Err(FetchError::InvalidResponse("empty token".to_string()))
            } else if token.is_expired_at(now) || token.expires_at <= token.issued_at {
                Err(FetchError::InvalidResponse("token already expired".to_string()))
            } else {
                Ok(token)
            }
        });

        let mut state = self.lock();
        if state.disposed {
            return Err(CsrfError::Disposed);
        }

        let first = matches!(&state.in_flight, Some((s, _)) if *s == seq);
        if first {
            state.in_flight = None;
        }

        match outcome {
            Ok(token) => {
                if first {
                    self.accept(&mut state, token.clone());
                }
                Ok(token)
            }
            Err(e) => {
                if first {
                    tracing::warn!(error = %e, "Anti-forgery token fetch failed");
                    metrics::record_csrf_fetch("failure");
                }

                let stale_allowed = state.stale_grace.is_none() || state.stale_grace == Some(seq);
                match state.token.clone() {
                    Some(stale) if stale_allowed && !stale.is_expired_at(now) => {
                        state.stale_grace = Some(seq);
                        tracing::debug!("Serving stale anti-forgery token after failed refresh");
                        Ok(stale)
                    }
                    _ => Err(CsrfError::Unavailable(e)),
                }
            }
        }
    }

    fn accept(&self, state: &mut State, token: AntiForgeryToken) {
        metrics::record_csrf_fetch("success");
        match serde_json::to_vec(&token) {
            Ok(bytes) => self.store.set(STORAGE_KEY, bytes),
            Err(e) => tracing::warn!(error = %e, "Failed to persist anti-forgery token"),
        }

        self.schedule_renewal(state, &token);
        state.token = Some(token);
        state.stale_grace = None;
        tracing::info!("Anti-forgery token accepted");
    }

    fn schedule_renewal(&self, state: &mut State, token: &AntiForgeryToken) {
        if let Some(timer) = state.renewal.take() {
            timer.cancel();
        }

        let due = token.renewal_due(self.renewal_buffer);
        if due <= self.clock.now() {
            // Already inside the buffer; the lazy check in get_token covers it.
            return;
        }

        let me = self.me.clone();
        state.renewal = Some(self.scheduler.schedule_at(
            due,
            Box::new(move || {
                let Some(manager) = me.upgrade() else { return };
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(async move {
                            if let Err(e) = manager.get_token().await {
                                tracing::warn!(error = %e, "Background anti-forgery renewal failed");
                            }
                        });
                    }
                    Err(_) => tracing::debug!("No runtime for background renewal; deferring to next use"),
                }
            }),
        ));
    }

    fn hydrate(&self) {
        let Some(bytes) = self.store.get(STORAGE_KEY) else { return };

        let token: AntiForgeryToken = match serde_json::from_slice(&bytes) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable persisted anti-forgery token");
                self.store.delete(STORAGE_KEY);
                return;
            }
        };

        if token.is_expired_at(self.clock.now()) {
            self.store.delete(STORAGE_KEY);
            return;
        }

        let mut state = self.lock();
        self.schedule_renewal(&mut state, &token);
        state.token = Some(token);
        tracing::debug!("Reusing persisted anti-forgery token");
    }
}

impl Drop for AntiForgeryManager {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = state.renewal.take() {
            timer.cancel();
        }
    }
}
