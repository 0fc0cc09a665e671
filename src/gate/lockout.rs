//! Per-principal attempt tracking and lockout.
//!
//! Flow Overview:
//! 1) Every failed factor chain increments the principal's counter.
//! 2) Reaching `max_attempts` locks the principal for `lockout_duration`.
//! 3) Checks made while locked return the remaining cool-down and do not
//!    consume an attempt.
//! 4) Once the cool-down elapses the counter resets; a success resets it too.
//!
//! State is partitioned per principal: the outer map is locked only long
//! enough to find or insert an entry, so unrelated principals never serialize
//! on each other. Locks are synchronous and never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LOCKOUT_DURATION: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockoutDecision {
    Allowed,
    Locked { remaining: Duration },
}

/// Failure counter and optional lockout deadline for one principal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttemptState {
    failure_count: u32,
    lockout_until: Option<Instant>,
}

impl AttemptState {
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    #[must_use]
    pub fn lockout_until(&self) -> Option<Instant> {
        self.lockout_until
    }

    /// Reopen the principal once its lockout has elapsed.
    fn expire(&mut self, now: Instant) {
        if let Some(until) = self.lockout_until
            && now >= until
        {
            self.failure_count = 0;
            self.lockout_until = None;
        }
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.lockout_until
            .map(|until| until.saturating_duration_since(now))
    }
}

#[derive(Debug)]
pub struct LockoutPolicy {
    max_attempts: u32,
    lockout_duration: Duration,
    states: Mutex<HashMap<String, Arc<Mutex<AttemptState>>>>,
}

impl LockoutPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, lockout_duration: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            lockout_duration,
            states: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }

    /// Gate check that never consumes an attempt.
    pub fn check(&self, principal_id: &str) -> LockoutDecision {
        let entry = self.entry(principal_id);
        let mut state = lock(&entry);
        let now = Instant::now();
        state.expire(now);
        match state.remaining(now) {
            Some(remaining) => LockoutDecision::Locked { remaining },
            None => LockoutDecision::Allowed,
        }
    }

    /// Record the outcome of an attempt and return the resulting decision.
    ///
    /// While locked the outcome is ignored and the remaining cool-down is
    /// returned. The failure that reaches `max_attempts` itself returns
    /// `Locked` with the full lockout duration.
    pub fn check_and_record_attempt(&self, principal_id: &str, success: bool) -> LockoutDecision {
        let entry = self.entry(principal_id);
        let mut state = lock(&entry);
        let now = Instant::now();
        state.expire(now);

        if let Some(remaining) = state.remaining(now) {
            return LockoutDecision::Locked { remaining };
        }

        if success {
            state.failure_count = 0;
            return LockoutDecision::Allowed;
        }

        state.failure_count = state.failure_count.saturating_add(1);
        if state.failure_count >= self.max_attempts {
            state.lockout_until = Some(now + self.lockout_duration);
            warn!(
                principal = principal_id,
                failures = state.failure_count,
                lockout_secs = self.lockout_duration.as_secs(),
                "principal locked out"
            );
            return LockoutDecision::Locked {
                remaining: self.lockout_duration,
            };
        }

        info!(
            principal = principal_id,
            failures = state.failure_count,
            remaining_attempts = self.max_attempts - state.failure_count,
            "failed attempt recorded"
        );
        LockoutDecision::Allowed
    }

    /// Snapshot of a principal's attempt state.
    #[must_use]
    pub fn attempt_state(&self, principal_id: &str) -> AttemptState {
        let entry = self.entry(principal_id);
        let mut state = lock(&entry);
        state.expire(Instant::now());
        *state
    }

    fn entry(&self, principal_id: &str) -> Arc<Mutex<AttemptState>> {
        let mut states = lock(&self.states);
        Arc::clone(states.entry(principal_id.to_string()).or_default())
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_LOCKOUT_DURATION)
    }
}

// Attempt state stays consistent even if a holder panicked; recover the guard.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn policy() -> LockoutPolicy {
        LockoutPolicy::new(3, Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn third_failure_locks_for_full_duration() {
        let policy = policy();
        assert_eq!(
            policy.check_and_record_attempt("guest", false),
            LockoutDecision::Allowed
        );
        assert_eq!(
            policy.check_and_record_attempt("guest", false),
            LockoutDecision::Allowed
        );
        assert_eq!(
            policy.check_and_record_attempt("guest", false),
            LockoutDecision::Locked {
                remaining: Duration::from_secs(30)
            }
        );
        assert_eq!(policy.attempt_state("guest").failure_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_while_locked_do_not_consume_slots() {
        let policy = policy();
        for _ in 0..3 {
            policy.check_and_record_attempt("guest", false);
        }
        let before = policy.attempt_state("guest");

        advance(Duration::from_secs(10)).await;
        assert_eq!(
            policy.check_and_record_attempt("guest", false),
            LockoutDecision::Locked {
                remaining: Duration::from_secs(20)
            }
        );
        // A success while locked is ignored as well.
        assert!(matches!(
            policy.check_and_record_attempt("guest", true),
            LockoutDecision::Locked { .. }
        ));
        assert_eq!(policy.attempt_state("guest"), before);
    }

    #[tokio::test(start_paused = true)]
    async fn lockout_expires_and_counter_resets() {
        let policy = policy();
        for _ in 0..3 {
            policy.check_and_record_attempt("guest", false);
        }

        advance(Duration::from_secs(29)).await;
        assert!(matches!(
            policy.check("guest"),
            LockoutDecision::Locked { .. }
        ));

        advance(Duration::from_secs(1)).await;
        assert_eq!(policy.check("guest"), LockoutDecision::Allowed);
        let state = policy.attempt_state("guest");
        assert_eq!(state.failure_count(), 0);
        assert_eq!(state.lockout_until(), None);

        // Fresh budget after expiry.
        assert_eq!(
            policy.check_and_record_attempt("guest", false),
            LockoutDecision::Allowed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_counter_below_max() {
        let policy = policy();
        policy.check_and_record_attempt("admin", false);
        policy.check_and_record_attempt("admin", false);
        assert_eq!(
            policy.check_and_record_attempt("admin", true),
            LockoutDecision::Allowed
        );
        assert_eq!(policy.attempt_state("admin").failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn check_does_not_consume_attempts() {
        let policy = policy();
        for _ in 0..10 {
            assert_eq!(policy.check("analyst"), LockoutDecision::Allowed);
        }
        assert_eq!(policy.attempt_state("analyst").failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn principals_are_isolated() {
        let policy = policy();
        for _ in 0..3 {
            policy.check_and_record_attempt("guest", false);
        }
        assert!(matches!(
            policy.check("guest"),
            LockoutDecision::Locked { .. }
        ));
        assert_eq!(policy.check("admin"), LockoutDecision::Allowed);
        assert_eq!(policy.attempt_state("admin").failure_count(), 0);
    }

    #[test]
    fn zero_max_attempts_is_clamped() {
        let policy = LockoutPolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 1);
    }
}
