//! Possession / biometric factor.
//!
//! The proof is handed to a [`PossessionVerifier`] backend through the
//! [`RetryPolicy`]. An unreachable backend fails the factor; it never passes.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use super::{AuthContext, BoxFuture, Factor, FactorKind, Verdict};
use crate::gate::error::AuthError;
use crate::gate::external::{ExternalCallError, RetryPolicy};

pub const DEFAULT_KEYWORD: &str = "scan";

/// Backend that decides whether a possession proof is genuine.
pub trait PossessionVerifier: Send + Sync {
    fn verify<'a>(
        &'a self,
        principal_id: &'a str,
        proof: &'a str,
    ) -> BoxFuture<'a, Result<bool, ExternalCallError>>;
}

/// Stand-in biometric service: accepts a fixed keyword, ignoring case, after
/// a simulated round trip.
#[derive(Clone, Debug)]
pub struct KeywordVerifier {
    keyword: String,
    latency: Duration,
}

impl KeywordVerifier {
    #[must_use]
    pub fn new(keyword: impl Into<String>, latency: Duration) -> Self {
        Self {
            keyword: keyword.into(),
            latency,
        }
    }
}

impl Default for KeywordVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORD, Duration::from_millis(1500))
    }
}

impl PossessionVerifier for KeywordVerifier {
    fn verify<'a>(
        &'a self,
        principal_id: &'a str,
        proof: &'a str,
    ) -> BoxFuture<'a, Result<bool, ExternalCallError>> {
        Box::pin(async move {
            debug!(principal = principal_id, "contacting biometric backend");
            if !self.latency.is_zero() {
                sleep(self.latency).await;
            }
            Ok(proof.trim().eq_ignore_ascii_case(&self.keyword))
        })
    }
}

#[derive(Clone)]
pub struct PossessionFactor {
    verifier: Arc<dyn PossessionVerifier>,
    policy: RetryPolicy,
}

impl PossessionFactor {
    #[must_use]
    pub fn new(verifier: Arc<dyn PossessionVerifier>, policy: RetryPolicy) -> Self {
        Self { verifier, policy }
    }
}

impl Factor for PossessionFactor {
    fn kind(&self) -> FactorKind {
        FactorKind::Possession
    }

    fn verify<'a>(&'a self, ctx: &'a AuthContext) -> BoxFuture<'a, Result<Verdict, AuthError>> {
        Box::pin(async move {
            let principal_id = ctx.principal().id();
            let proof = ctx.possession_proof();
            let accepted = self
                .policy
                .call("possession.verify", || {
                    self.verifier.verify(principal_id, proof)
                })
                .await;

            Ok(match accepted {
                Ok(true) => Verdict::Pass,
                Ok(false) => Verdict::Fail("possession proof rejected".to_string()),
                Err(err) => Verdict::Fail(format!("possession backend unavailable: {err}")),
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::gate::credentials::{Principal, Role};
    use crate::gate::factor::FactorInputs;
    use secrecy::SecretString;

    struct Unreachable;

    impl PossessionVerifier for Unreachable {
        fn verify<'a>(
            &'a self,
            _principal_id: &'a str,
            _proof: &'a str,
        ) -> BoxFuture<'a, Result<bool, ExternalCallError>> {
            Box::pin(async { Err(ExternalCallError::Unavailable("offline".to_string())) })
        }
    }

    fn ctx(proof: &str) -> AuthContext {
        let principal =
            Principal::provision("analyst", &SecretString::from("3141"), Role::Analyst).unwrap();
        AuthContext::new(principal, FactorInputs::new("3141", proof))
    }

    fn factor(verifier: Arc<dyn PossessionVerifier>) -> PossessionFactor {
        PossessionFactor::new(
            verifier,
            RetryPolicy::new()
                .with_max_attempts(2)
                .with_backoff(Duration::from_millis(10), Duration::from_millis(10)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn keyword_is_case_insensitive() {
        let factor = factor(Arc::new(KeywordVerifier::default()));
        assert_eq!(factor.verify(&ctx("scan")).await.unwrap(), Verdict::Pass);
        assert_eq!(factor.verify(&ctx("SCAN")).await.unwrap(), Verdict::Pass);
        assert_eq!(
            factor.verify(&ctx("scam")).await.unwrap(),
            Verdict::Fail("possession proof rejected".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_backend_fails_closed() {
        let factor = factor(Arc::new(Unreachable));
        let verdict = factor.verify(&ctx("scan")).await.unwrap();
        assert!(
            matches!(&verdict, Verdict::Fail(reason) if reason.starts_with("possession backend unavailable")),
            "{verdict:?}"
        );
    }
}
