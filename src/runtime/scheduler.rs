//! Deadline scheduling with uniform cancellation.
//!
//! # Responsibilities
//! - Run a callback once a wall-clock instant has been reached
//! - Hand back a `TimerHandle` that cancels the callback if it has not fired
//!
//! # Design Decisions
//! - `TokioScheduler` backs each timer with a spawned sleep task
//! - `ManualScheduler` keeps an ordered queue and fires it from `advance()`,
//!   moving its `ManualClock` to each deadline before running the callback

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::task::AbortHandle;

use crate::runtime::clock::{remaining, Clock, ManualClock};

/// Work to run once a deadline is reached.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Schedules callbacks at absolute instants.
pub trait Scheduler: Send + Sync {
    /// Run `callback` at (or shortly after) `at`.
    fn schedule_at(&self, at: SystemTime, callback: TimerCallback) -> TimerHandle;
}

/// Cancellation token for a scheduled callback.
///
/// Dropping the handle does not cancel the timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    fn new(cancelled: Arc<AtomicBool>, abort: Option<AbortHandle>) -> Self {
        Self { cancelled, abort }
    }

    /// Handle for a timer that will never fire.
    pub fn inert() -> Self {
        Self::new(Arc::new(AtomicBool::new(true)), None)
    }

    /// Prevent the callback from running. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Production scheduler backed by Tokio timers.
pub struct TokioScheduler {
    clock: Arc<dyn Clock>,
}

impl TokioScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_at(&self, at: SystemTime, callback: TimerCallback) -> TimerHandle {
        let delay = remaining(self.clock.now(), at);
        let cancelled = Arc::new(AtomicBool::new(false));

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(
                    delay_ms = delay.as_millis() as u64,
                    "No Tokio runtime available, timer dropped"
                );
                return TimerHandle::inert();
            }
        };

        let flag = cancelled.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                callback();
            }
        });

        TimerHandle::new(cancelled, Some(task.abort_handle()))
    }
}

struct PendingTimer {
    at: SystemTime,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    callback: TimerCallback,
}

/// Virtual-time scheduler for deterministic tests and simulations.
#[derive(Clone)]
pub struct ManualScheduler {
    clock: ManualClock,
    queue: Arc<Mutex<Vec<PendingTimer>>>,
    seq: Arc<AtomicU64>,
}

impl ManualScheduler {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            queue: Arc::new(Mutex::new(Vec::new())),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The clock this scheduler drives.
    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    /// Number of timers that are neither fired nor cancelled.
    pub fn pending(&self) -> usize {
        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Advance virtual time by `by`, firing every timer that falls due on the way
    /// in deadline order. Timers scheduled by callbacks fire in the same pass if due.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.now() + by;

        while let Some(timer) = self.pop_due(target) {
            self.clock.set(timer.at);
            if !timer.cancelled.load(Ordering::SeqCst) {
                (timer.callback)();
            }
        }

        self.clock.set(target);
    }

    fn pop_due(&self, target: SystemTime) -> Option<PendingTimer> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.retain(|t| !t.cancelled.load(Ordering::SeqCst));

        let idx = queue
            .iter()
            .enumerate()
            .filter(|(_, t)| t.at <= target)
            .min_by_key(|(_, t)| (t.at, t.seq))
            .map(|(i, _)| i)?;

        Some(queue.swap_remove(idx))
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_at(&self, at: SystemTime, callback: TimerCallback) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);

        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push(PendingTimer {
            at,
            seq,
            cancelled: cancelled.clone(),
            callback,
        });

        TimerHandle::new(cancelled, None)
    }
}
