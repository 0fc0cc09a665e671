//! Gate configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::audit::DEFAULT_QUEUE_CAPACITY;
use super::external::RetryPolicy;
use super::lockout::{DEFAULT_MAX_ATTEMPTS, LockoutPolicy};

const DEFAULT_LOCKOUT_SECONDS: u64 = 30;
const DEFAULT_FACTOR_TIMEOUT_SECONDS: u64 = 120;
const DEFAULT_AUDIT_PATH: &str = "audit_log.jsonl";
const DEFAULT_POSSESSION_LATENCY_MS: u64 = 1500;
const DEFAULT_BACKEND_ATTEMPTS: u32 = 3;
const DEFAULT_BACKEND_TIMEOUT_SECONDS: u64 = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthConfig {
    max_attempts: u32,
    lockout_duration_seconds: u64,
    factor_timeout_seconds: u64,
    audit_path: PathBuf,
    audit_queue_capacity: usize,
    possession_latency_ms: u64,
    backend_attempts: u32,
    backend_timeout_seconds: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lockout_duration_seconds: DEFAULT_LOCKOUT_SECONDS,
            factor_timeout_seconds: DEFAULT_FACTOR_TIMEOUT_SECONDS,
            audit_path: PathBuf::from(DEFAULT_AUDIT_PATH),
            audit_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            possession_latency_ms: DEFAULT_POSSESSION_LATENCY_MS,
            backend_attempts: DEFAULT_BACKEND_ATTEMPTS,
            backend_timeout_seconds: DEFAULT_BACKEND_TIMEOUT_SECONDS,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_lockout_duration_seconds(mut self, seconds: u64) -> Self {
        self.lockout_duration_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_factor_timeout_seconds(mut self, seconds: u64) -> Self {
        self.factor_timeout_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_audit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_path = path.into();
        self
    }

    #[must_use]
    pub fn with_audit_queue_capacity(mut self, capacity: usize) -> Self {
        self.audit_queue_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_possession_latency_ms(mut self, millis: u64) -> Self {
        self.possession_latency_ms = millis;
        self
    }

    #[must_use]
    pub fn with_backend_attempts(mut self, attempts: u32) -> Self {
        self.backend_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_backend_timeout_seconds(mut self, seconds: u64) -> Self {
        self.backend_timeout_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_duration_seconds)
    }

    #[must_use]
    pub fn factor_timeout(&self) -> Duration {
        Duration::from_secs(self.factor_timeout_seconds)
    }

    #[must_use]
    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }

    #[must_use]
    pub fn audit_queue_capacity(&self) -> usize {
        self.audit_queue_capacity
    }

    #[must_use]
    pub fn possession_latency(&self) -> Duration {
        Duration::from_millis(self.possession_latency_ms)
    }

    #[must_use]
    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy::new(self.max_attempts, self.lockout_duration())
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.backend_attempts)
            .with_timeout(Duration::from_secs(self.backend_timeout_seconds))
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}
