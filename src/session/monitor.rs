//! Timer-driven session monitor.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime};
use thiserror::Error;

use crate::config::SessionConfig;
use crate::observability::metrics;
use crate::runtime::{Clock, EventBus, Scheduler, Subscription, TimerHandle};
use crate::session::state::{ExpiryReason, IdlePolicy, SessionState, SessionStatus, Transition};
use crate::vault::CredentialVault;

/// Kinds of user input the monitor recognises as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    PointerMove,
    Scroll,
    KeyPress,
    Click,
    Touch,
    Focus,
}

/// Notifications for the UI / gateway layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Entered WARNING; logout in `remaining` unless the user acts.
    Warning { remaining: Duration },
    /// Periodic countdown while in WARNING.
    Countdown { remaining: Duration },
    /// Left WARNING because of activity or `extend()`.
    Resumed,
    /// Session ended. Credentials are cleared right after this is delivered.
    Expired { reason: ExpiryReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session has expired")]
    Expired,
}

struct Inner {
    state: SessionState,
    last_recompute: SystemTime,
    generation: u64,
    deadline_timer: Option<TimerHandle>,
    tick_timer: Option<TimerHandle>,
    /// Latest activity coalesced by the throttle, applied when the window closes.
    trailing_activity: Option<SystemTime>,
    trailing_timer: Option<TimerHandle>,
}

impl Inner {
    fn cancel_timers(&mut self) {
        self.generation += 1;
        self.trailing_activity = None;
        let timers = [self.deadline_timer.take(), self.tick_timer.take(), self.trailing_timer.take()];
        for timer in timers.into_iter().flatten() {
            timer.cancel();
        }
    }
}

/// Tracks user activity and enforces idle expiry for one session.
pub struct SessionMonitor {
    me: Weak<SessionMonitor>,
    policy: IdlePolicy,
    activity_throttle: Duration,
    countdown_tick: Option<Duration>,
    vault: Arc<CredentialVault>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    inner: Mutex<Inner>,
    events: EventBus<SessionEvent>,
}

impl SessionMonitor {
    /// Start monitoring in ACTIVE with deadlines counted from now.
    pub fn start(
        config: &SessionConfig,
        vault: Arc<CredentialVault>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        let policy = IdlePolicy {
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            warning_window: Duration::from_secs(config.warning_secs),
        };
        let now = clock.now();

        let monitor = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            policy,
            activity_throttle: Duration::from_millis(config.activity_throttle_ms),
            countdown_tick: (config.countdown_tick_secs > 0)
                .then(|| Duration::from_secs(config.countdown_tick_secs)),
            vault,
            clock,
            scheduler,
            inner: Mutex::new(Inner {
                state: SessionState::started(now, &policy),
                last_recompute: now,
                generation: 0,
                deadline_timer: None,
                tick_timer: None,
                trailing_activity: None,
                trailing_timer: None,
            }),
            events: EventBus::new(),
        });

        {
            let mut inner = monitor.lock();
            monitor.arm_deadline(&mut inner);
        }
        tracing::info!(
            idle_timeout_secs = config.idle_timeout_secs,
            warning_secs = config.warning_secs,
            "Session monitor started"
        );
        monitor
    }

    /// Record a user input event. Returns whether deadlines were recomputed.
    ///
    /// While ACTIVE, events closer together than the throttle interval are
    /// coalesced; the latest of them is applied once the interval closes.
    /// While WARNING, any event resumes the session.
    pub fn record_activity(&self, kind: ActivityKind) -> bool {
        let now = self.clock.now();
        let mut inner = self.lock();

        let status = inner.state.status;
        match status {
            SessionStatus::Expired => return false,
            SessionStatus::Active
                if now < inner.last_recompute + self.activity_throttle =>
            {
                tracing::trace!(?kind, "Activity coalesced");
                if now > inner.state.last_activity_at {
                    inner.trailing_activity = Some(now);
                    self.arm_trailing(&mut inner);
                }
                return false;
            }
            _ => {}
        }

        let transition = self.reset(&mut inner, now);
        drop(inner);

        tracing::debug!(?kind, "Activity recorded");
        self.publish(transition);
        true
    }

    /// Explicitly extend the session (e.g. "stay signed in" button).
    pub fn extend(&self) -> Result<(), SessionError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        if inner.state.status == SessionStatus::Expired {
            return Err(SessionError::Expired);
        }

        let transition = self.reset(&mut inner, now);
        drop(inner);

        tracing::info!("Session extended");
        self.publish(transition);
        Ok(())
    }

    /// End the session now, skipping the warning window. Idempotent.
    pub fn logout(&self) {
        let mut inner = self.lock();
        let transition = inner.state.logout();
        inner.cancel_timers();
        drop(inner);

        self.publish(transition);
    }

    /// Cancel timers without ending the session (owner is shutting down).
    pub fn dispose(&self) {
        self.lock().cancel_timers();
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().state.status
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock().state.clone()
    }

    /// Time left before forced logout, only while in WARNING.
    pub fn countdown(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.lock().state.countdown(now)
    }

    /// Fail with `SessionError::Expired` once the session has ended.
    pub fn ensure_active(&self) -> Result<(), SessionError> {
        match self.status() {
            SessionStatus::Expired => Err(SessionError::Expired),
            _ => Ok(()),
        }
    }

    /// Subscribe to session notifications.
    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reset(&self, inner: &mut Inner, now: SystemTime) -> Transition {
        let transition = inner.state.on_activity(now, &self.policy);
        inner.last_recompute = now;
        inner.cancel_timers();
        self.arm_deadline(inner);
        transition
    }

    fn arm_deadline(&self, inner: &mut Inner) {
        let Some(deadline) = inner.state.next_deadline() else { return };
        let generation = inner.generation;
        let me = self.me.clone();

        inner.deadline_timer = Some(self.scheduler.schedule_at(
            deadline,
            Box::new(move || {
                if let Some(monitor) = me.upgrade() {
                    monitor.on_deadline(generation);
                }
            }),
        ));
    }

    fn arm_trailing(&self, inner: &mut Inner) {
        if inner.trailing_timer.is_some() {
            return;
        }
        let generation = inner.generation;
        let me = self.me.clone();
        inner.trailing_timer = Some(self.scheduler.schedule_at(
            inner.last_recompute + self.activity_throttle,
            Box::new(move || {
                if let Some(monitor) = me.upgrade() {
                    monitor.on_trailing(generation);
                }
            }),
        ));
    }

    fn arm_tick(&self, inner: &mut Inner, from: SystemTime) {
        let Some(tick) = self.countdown_tick else { return };
        let at = from + tick;
        if at >= inner.state.logout_deadline {
            return;
        }

        let generation = inner.generation;
        let me = self.me.clone();
        inner.tick_timer = Some(self.scheduler.schedule_at(
            at,
            Box::new(move || {
                if let Some(monitor) = me.upgrade() {
                    monitor.on_tick(generation);
                }
            }),
        ));
    }

    fn on_deadline(&self, generation: u64) {
        let now = self.clock.now();
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        if inner.state.status == SessionStatus::Active {
            if let Some(at) = inner.trailing_activity {
                // Activity seen before this deadline still counts.
                self.reset(&mut inner, at);
                return;
            }
        }

        let transition = inner.state.on_deadline(now);
        match transition {
            Transition::Warned { .. } => {
                inner.cancel_timers();
                self.arm_deadline(&mut inner);
                self.arm_tick(&mut inner, now);
            }
            Transition::Expired { .. } => inner.cancel_timers(),
            _ => {
                // Woke before the deadline; wait again.
                inner.cancel_timers();
                self.arm_deadline(&mut inner);
            }
        }
        drop(inner);

        self.publish(transition);
    }

    fn on_trailing(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        inner.trailing_timer = None;
        let Some(at) = inner.trailing_activity.take() else { return };
        if inner.state.status != SessionStatus::Active {
            return;
        }

        let transition = self.reset(&mut inner, at);
        drop(inner);

        tracing::debug!("Coalesced activity applied");
        self.publish(transition);
    }

    fn on_tick(&self, generation: u64) {
        let now = self.clock.now();
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        let Some(remaining) = inner.state.countdown(now) else { return };
        self.arm_tick(&mut inner, now);
        drop(inner);

        self.events.emit(&SessionEvent::Countdown { remaining });
    }

    /// Emit the notification for a transition. Must be called without the lock.
    fn publish(&self, transition: Transition) {
        match transition {
            Transition::None | Transition::Refreshed => {}
            Transition::Resumed => {
                tracing::info!("Session resumed from warning");
                self.events.emit(&SessionEvent::Resumed);
            }
            Transition::Warned { remaining } => {
                tracing::info!(remaining_secs = remaining.as_secs(), "Session idle warning");
                self.events.emit(&SessionEvent::Warning { remaining });
            }
            Transition::Expired { reason } => {
                tracing::info!(reason = reason.as_str(), "Session expired");
                metrics::record_session_expired(reason.as_str());
                self.events.emit(&SessionEvent::Expired { reason });
                self.vault.clear();
            }
        }
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.inner
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .cancel_timers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use crate::runtime::{ManualClock, ManualScheduler};
    use crate::storage::MemoryStore;
    use crate::vault::{Credential, CredentialKind, CredentialPair};

    const MIN: u64 = 60;

    struct Fixture {
        monitor: Arc<SessionMonitor>,
        scheduler: ManualScheduler,
        vault: Arc<CredentialVault>,
        events: Arc<Mutex<Vec<SessionEvent>>>,
        _sub: Subscription,
    }

    fn config(countdown_tick_secs: u64) -> SessionConfig {
        SessionConfig {
            idle_timeout_secs: 30 * MIN,
            warning_secs: 5 * MIN,
            activity_throttle_ms: 1_000,
            countdown_tick_secs,
        }
    }

    fn fixture(config: SessionConfig) -> Fixture {
        let scheduler = ManualScheduler::new(ManualClock::default());
        let clock = Arc::new(scheduler.clock());
        let vault = Arc::new(CredentialVault::new(
            &VaultConfig { expiry_buffer_secs: 30 },
            Arc::new(MemoryStore::new()),
            clock.clone(),
        ));
        let now = clock.now();
        vault
            .store(
                CredentialPair::new(
                    Credential::with_ttl(CredentialKind::Access, "a", now, Duration::from_secs(7200)).unwrap(),
                    Credential::with_ttl(CredentialKind::Refresh, "r", now, Duration::from_secs(7200)).unwrap(),
                )
                .unwrap(),
            )
            .unwrap();

        let monitor = SessionMonitor::start(&config, vault.clone(), clock, Arc::new(scheduler.clone()));
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        let sub = monitor.on_state_change(move |ev| e.lock().unwrap().push(ev.clone()));

        Fixture { monitor, scheduler, vault, events, _sub: sub }
    }

    fn mins(m: u64) -> Duration {
        Duration::from_secs(m * MIN)
    }

    #[test]
    fn test_warning_then_expiry_clears_vault() {
        let f = fixture(config(0));

        f.scheduler.advance(mins(24));
        assert_eq!(f.monitor.status(), SessionStatus::Active);

        f.scheduler.advance(mins(1));
        assert_eq!(f.monitor.status(), SessionStatus::Warning);
        assert_eq!(f.monitor.countdown(), Some(mins(5)));

        f.scheduler.advance(mins(5));
        assert_eq!(f.monitor.status(), SessionStatus::Expired);
        assert!(f.vault.retrieve(CredentialKind::Access).is_none());

        assert_eq!(
            *f.events.lock().unwrap(),
            vec![
                SessionEvent::Warning { remaining: mins(5) },
                SessionEvent::Expired { reason: ExpiryReason::IdleTimeout },
            ]
        );
        assert_eq!(f.scheduler.pending(), 0);
    }

    #[test]
    fn test_activity_during_warning_resets_deadlines() {
        let f = fixture(config(0));
        let start = f.scheduler.clock().now();

        f.scheduler.advance(mins(25));
        f.scheduler.advance(mins(2));
        assert!(f.monitor.record_activity(ActivityKind::KeyPress));

        let s = f.monitor.snapshot();
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.last_activity_at, start + mins(27));
        assert_eq!(s.warning_deadline, start + mins(52));
        assert_eq!(s.logout_deadline, start + mins(57));

        // The old logout deadline (minute 30) passes harmlessly.
        f.scheduler.advance(mins(24));
        assert_eq!(f.monitor.status(), SessionStatus::Active);
        f.scheduler.advance(mins(1));
        assert_eq!(f.monitor.status(), SessionStatus::Warning);

        assert_eq!(
            *f.events.lock().unwrap(),
            vec![
                SessionEvent::Warning { remaining: mins(5) },
                SessionEvent::Resumed,
                SessionEvent::Warning { remaining: mins(5) },
            ]
        );
    }

    #[test]
    fn test_bursts_are_throttled_while_active() {
        let f = fixture(config(0));
        let start = f.scheduler.clock().now();

        f.scheduler.advance(Duration::from_secs(10));
        assert!(f.monitor.record_activity(ActivityKind::PointerMove));
        for _ in 0..50 {
            f.scheduler.advance(Duration::from_millis(10));
            assert!(!f.monitor.record_activity(ActivityKind::PointerMove));
        }
        assert_eq!(f.monitor.snapshot().last_activity_at, start + Duration::from_secs(10));

        // The window closes at 11s and picks up the last event of the burst.
        f.scheduler.advance(Duration::from_millis(500));
        assert_eq!(f.monitor.snapshot().last_activity_at, start + Duration::from_millis(10_500));
        assert_eq!(f.monitor.snapshot().logout_deadline, start + Duration::from_millis(10_500) + mins(30));
        assert_eq!(f.scheduler.pending(), 1);

        f.scheduler.advance(Duration::from_secs(1));
        assert!(f.monitor.record_activity(ActivityKind::Scroll));
        assert_eq!(f.monitor.snapshot().last_activity_at, start + Duration::from_millis(12_000));
        assert_eq!(f.scheduler.pending(), 1);
    }

    #[test]
    fn test_coalesced_activity_is_not_lost_when_idle_follows() {
        let f = fixture(config(0));
        let start = f.scheduler.clock().now();

        f.scheduler.advance(Duration::from_secs(2));
        assert!(f.monitor.record_activity(ActivityKind::KeyPress));
        f.scheduler.advance(Duration::from_millis(400));
        assert!(!f.monitor.record_activity(ActivityKind::KeyPress));

        // Warning is due 25 minutes after the coalesced key press, not the first one.
        f.scheduler.advance(mins(25) - Duration::from_millis(400));
        assert_eq!(f.monitor.status(), SessionStatus::Active);
        f.scheduler.advance(Duration::from_millis(400));
        assert_eq!(f.monitor.status(), SessionStatus::Warning);
        assert_eq!(f.monitor.snapshot().last_activity_at, start + Duration::from_millis(2_400));
    }

    #[test]
    fn test_logout_drops_pending_coalesced_activity() {
        let f = fixture(config(0));
        f.scheduler.advance(Duration::from_secs(2));
        assert!(f.monitor.record_activity(ActivityKind::Click));
        f.scheduler.advance(Duration::from_millis(200));
        assert!(!f.monitor.record_activity(ActivityKind::Click));

        f.monitor.logout();
        f.scheduler.advance(Duration::from_secs(2));
        assert_eq!(f.monitor.status(), SessionStatus::Expired);
        assert_eq!(f.scheduler.pending(), 0);
    }

    #[test]
    fn test_extend_and_logout() {
        let f = fixture(config(0));
        f.scheduler.advance(mins(26));
        f.monitor.extend().unwrap();
        assert_eq!(f.monitor.status(), SessionStatus::Active);

        f.monitor.logout();
        f.monitor.logout();
        assert_eq!(f.monitor.status(), SessionStatus::Expired);
        assert_eq!(f.monitor.snapshot().expiry_reason, Some(ExpiryReason::Logout));
        assert_eq!(f.monitor.extend(), Err(SessionError::Expired));
        assert_eq!(f.monitor.ensure_active(), Err(SessionError::Expired));
        assert!(!f.monitor.record_activity(ActivityKind::Click));
        assert!(f.vault.retrieve(CredentialKind::Refresh).is_none());

        let events = f.events.lock().unwrap();
        assert_eq!(
            events.iter().filter(|e| matches!(e, SessionEvent::Expired { .. })).count(),
            1
        );
    }

    #[test]
    fn test_expired_event_precedes_vault_clear() {
        let f = fixture(config(0));
        let vault = f.vault.clone();
        let saw_credential = Arc::new(Mutex::new(None));
        let s = saw_credential.clone();
        let _sub = f.monitor.on_state_change(move |ev| {
            if matches!(ev, SessionEvent::Expired { .. }) {
                *s.lock().unwrap() = Some(vault.retrieve(CredentialKind::Access).is_some());
            }
        });

        f.monitor.logout();
        assert_eq!(*saw_credential.lock().unwrap(), Some(true));
        assert!(f.vault.retrieve(CredentialKind::Access).is_none());
    }

    #[test]
    fn test_countdown_ticks_during_warning() {
        let f = fixture(config(60));
        f.scheduler.advance(mins(25));
        f.scheduler.advance(Duration::from_secs(150));

        let events = f.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                SessionEvent::Warning { remaining: mins(5) },
                SessionEvent::Countdown { remaining: mins(4) },
                SessionEvent::Countdown { remaining: mins(3) },
            ]
        );
    }

    #[test]
    fn test_dispose_cancels_timers() {
        let f = fixture(config(0));
        f.monitor.dispose();
        assert_eq!(f.scheduler.pending(), 0);
        f.scheduler.advance(mins(60));
        assert_eq!(f.monitor.status(), SessionStatus::Active);
    }
}
