//! Timeout and retry policy for calls into factor backends.
//!
//! Backends (biometric service, OTP delivery) are slow and flaky. Each call
//! attempt is bounded by `timeout`; failed attempts are retried with
//! exponential backoff and jitter until `max_attempts` is reached.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalCallError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("call timed out after {0:?}")]
    TimedOut(Duration),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    timeout: Duration,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl RetryPolicy {
    /// Default policy: 3 attempts, 10s per attempt, 500ms->5s backoff.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(10),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = if max < base { base } else { max };
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `call` under this policy.
    ///
    /// # Errors
    /// Returns the error of a single-attempt policy as is, or
    /// `ExternalCallError::Exhausted` once every attempt failed.
    pub async fn call<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ExternalCallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalCallError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ExternalCallError::TimedOut(self.timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "external call failed, retrying: {err}"
                    );
                    sleep(delay).await;
                }
                Err(err) if self.max_attempts == 1 => return Err(err),
                Err(err) => {
                    error!(operation, attempts = attempt, "external call failed: {err}");
                    return Err(ExternalCallError::Exhausted {
                        attempts: attempt,
                        last: err.to_string(),
                    });
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let delay = self
            .backoff_base
            .checked_mul(1u32 << shift)
            .unwrap_or(self.backoff_max);
        jitter_delay(delay.min(self.backoff_max))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(3)
            .with_timeout(Duration::from_secs(1))
            .with_backoff(Duration::from_millis(100), Duration::from_millis(250))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = policy()
            .call("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ExternalCallError::Unavailable("flaky".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy()
            .call("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ExternalCallError::Unavailable("down".to_string())) }
            })
            .await;
        assert_eq!(
            result,
            Err(ExternalCallError::Exhausted {
                attempts: 3,
                last: "backend unavailable: down".to_string()
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out() {
        let result: Result<(), _> = policy()
            .with_max_attempts(1)
            .call("test", || std::future::pending())
            .await;
        assert_eq!(
            result,
            Err(ExternalCallError::TimedOut(Duration::from_secs(1)))
        );
    }

    #[test]
    fn backoff_is_capped_and_jittered() {
        let policy = policy();
        for attempt in 1..10 {
            let delay = policy.backoff_delay(attempt);
            assert!(delay <= Duration::from_millis(250), "attempt {attempt}: {delay:?}");
            assert!(delay >= Duration::from_millis(50), "attempt {attempt}: {delay:?}");
        }
    }
}
