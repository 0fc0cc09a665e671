//! Authentication error taxonomy.

use std::time::Duration;
use thiserror::Error;

use super::factor::FactorKind;

/// Terminal failures of an authentication attempt.
///
/// `InvalidFactor` and `Locked` are surfaced verbatim to the caller; the chain
/// never retries on its own. `Internal` means a security primitive (RNG,
/// digest) is unavailable and the request must be aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("unknown principal")]
    UnknownPrincipal,

    #[error("invalid {kind} factor: {reason}")]
    InvalidFactor { kind: FactorKind, reason: String },

    #[error("account locked: {}s remaining", .remaining.as_secs())]
    Locked { remaining: Duration },

    #[error("{0} factor timed out")]
    FactorTimeout(FactorKind),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Whether this failure counts against the principal's attempt budget.
    #[must_use]
    pub fn counts_as_attempt(&self) -> bool {
        matches!(self, Self::InvalidFactor { .. } | Self::FactorTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_message_reports_whole_seconds() {
        let err = AuthError::Locked {
            remaining: Duration::from_millis(29_500),
        };
        assert_eq!(err.to_string(), "account locked: 29s remaining");
    }

    #[test]
    fn only_factor_failures_consume_attempts() {
        assert!(
            AuthError::InvalidFactor {
                kind: FactorKind::Knowledge,
                reason: "secret mismatch".to_string(),
            }
            .counts_as_attempt()
        );
        assert!(AuthError::FactorTimeout(FactorKind::OneTimeCode).counts_as_attempt());
        assert!(!AuthError::UnknownPrincipal.counts_as_attempt());
        assert!(!AuthError::Internal("rng".to_string()).counts_as_attempt());
        assert!(
            !AuthError::Locked {
                remaining: Duration::from_secs(1)
            }
            .counts_as_attempt()
        );
    }
}
