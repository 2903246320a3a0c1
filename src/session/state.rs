//! Idle-timeout state machine.
//!
//! # State Transitions
//! ```text
//! Active  → Warning: now >= warning_deadline
//! Warning → Expired: now >= logout_deadline
//! Active | Warning → Active: activity or extend (deadlines from now)
//! any → Expired: logout
//! ```

use serde::Serialize;
use std::time::{Duration, SystemTime};

use crate::runtime::clock::remaining;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Warning,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    IdleTimeout,
    Logout,
}

impl ExpiryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryReason::IdleTimeout => "idle_timeout",
            ExpiryReason::Logout => "logout",
        }
    }
}

/// Idle timeout `T` and warning window `W`: warning after `T − W` idle, expiry after `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    pub idle_timeout: Duration,
    pub warning_window: Duration,
}

impl IdlePolicy {
    fn warning_after(&self) -> Duration {
        self.idle_timeout.saturating_sub(self.warning_window)
    }
}

/// Outcome of feeding an input to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed.
    None,
    /// Deadlines recomputed while already ACTIVE.
    Refreshed,
    /// WARNING → ACTIVE.
    Resumed,
    /// ACTIVE → WARNING.
    Warned { remaining: Duration },
    /// → EXPIRED.
    Expired { reason: ExpiryReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub last_activity_at: SystemTime,
    pub warning_deadline: SystemTime,
    pub logout_deadline: SystemTime,
    pub expiry_reason: Option<ExpiryReason>,
}

impl SessionState {
    pub fn started(now: SystemTime, policy: &IdlePolicy) -> Self {
        Self {
            status: SessionStatus::Active,
            last_activity_at: now,
            warning_deadline: now + policy.warning_after(),
            logout_deadline: now + policy.idle_timeout,
            expiry_reason: None,
        }
    }

    /// Activity or an explicit extend: back to ACTIVE with deadlines from `now`.
    pub fn on_activity(&mut self, now: SystemTime, policy: &IdlePolicy) -> Transition {
        let was = self.status;
        match was {
            SessionStatus::Expired => Transition::None,
            SessionStatus::Active | SessionStatus::Warning => {
                *self = Self::started(now, policy);
                if was == SessionStatus::Warning {
                    Transition::Resumed
                } else {
                    Transition::Refreshed
                }
            }
        }
    }

    /// Apply whichever deadline `now` has reached.
    pub fn on_deadline(&mut self, now: SystemTime) -> Transition {
        match self.status {
            SessionStatus::Expired => Transition::None,
            _ if now >= self.logout_deadline => self.expire(ExpiryReason::IdleTimeout),
            SessionStatus::Active if now >= self.warning_deadline => {
                self.status = SessionStatus::Warning;
                Transition::Warned {
                    remaining: remaining(now, self.logout_deadline),
                }
            }
            _ => Transition::None,
        }
    }

    pub fn logout(&mut self) -> Transition {
        self.expire(ExpiryReason::Logout)
    }

    fn expire(&mut self, reason: ExpiryReason) -> Transition {
        if self.status == SessionStatus::Expired {
            return Transition::None;
        }
        self.status = SessionStatus::Expired;
        self.expiry_reason = Some(reason);
        Transition::Expired { reason }
    }

    /// The deadline the driver should wake up for next, if any.
    pub fn next_deadline(&self) -> Option<SystemTime> {
        match self.status {
            SessionStatus::Active => Some(self.warning_deadline),
            SessionStatus::Warning => Some(self.logout_deadline),
            SessionStatus::Expired => None,
        }
    }

    /// Countdown to forced logout while in WARNING.
    pub fn countdown(&self, now: SystemTime) -> Option<Duration> {
        (self.status == SessionStatus::Warning).then(|| remaining(now, self.logout_deadline))
    }
}
