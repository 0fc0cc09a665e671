//! Ordered factor chain.
//!
//! Each factor inspects the pending [`AuthContext`] and returns a [`Verdict`].
//! The chain stops at the first failure: later factors are never invoked.
//! Every step is bounded by `step_timeout`; an elapsed step fails closed.

pub mod knowledge;
pub mod otp;
pub mod possession;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{Instrument, debug, info_span, warn};

use super::credentials::Principal;
use super::error::AuthError;

pub use knowledge::KnowledgeFactor;
pub use otp::{CodeGenerator, OneTimeCode, OsCodeGenerator, OtpChannel, OtpFactor};
pub use possession::{KeywordVerifier, PossessionFactor, PossessionVerifier};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    Knowledge,
    Possession,
    OneTimeCode,
}

impl fmt::Display for FactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Knowledge => "knowledge",
            Self::Possession => "possession",
            Self::OneTimeCode => "one-time code",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(String),
}

/// Evidence submitted up front by the front-end adapter.
///
/// The one-time code is not part of it: the code only exists once the chain
/// reaches that step, and is collected through the [`OtpChannel`].
#[derive(Debug)]
pub struct FactorInputs {
    pub secret: SecretString,
    pub possession_proof: String,
}

impl FactorInputs {
    #[must_use]
    pub fn new(secret: impl Into<String>, possession_proof: impl Into<String>) -> Self {
        Self {
            secret: SecretString::from(secret.into()),
            possession_proof: possession_proof.into(),
        }
    }
}

/// Pending authentication, independent of the input transport.
#[derive(Debug)]
pub struct AuthContext {
    principal: Principal,
    inputs: FactorInputs,
}

impl AuthContext {
    #[must_use]
    pub fn new(principal: Principal, inputs: FactorInputs) -> Self {
        Self { principal, inputs }
    }

    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    #[must_use]
    pub fn secret(&self) -> &SecretString {
        &self.inputs.secret
    }

    #[must_use]
    pub fn possession_proof(&self) -> &str {
        &self.inputs.possession_proof
    }
}

/// A single verification step.
pub trait Factor: Send + Sync {
    fn kind(&self) -> FactorKind;

    /// Verify this factor. `Err` is reserved for internal failures; a rejected
    /// factor is `Ok(Verdict::Fail(_))`.
    fn verify<'a>(&'a self, ctx: &'a AuthContext) -> BoxFuture<'a, Result<Verdict, AuthError>>;
}

#[derive(Clone)]
pub struct FactorChain {
    factors: Vec<Arc<dyn Factor>>,
    step_timeout: Duration,
}

impl FactorChain {
    #[must_use]
    pub fn new(step_timeout: Duration) -> Self {
        Self {
            factors: Vec::new(),
            step_timeout,
        }
    }

    #[must_use]
    pub fn with_factor(mut self, factor: Arc<dyn Factor>) -> Self {
        self.factors.push(factor);
        self
    }

    /// Knowledge, then possession, then one-time code.
    #[must_use]
    pub fn canonical(
        knowledge: KnowledgeFactor,
        possession: PossessionFactor,
        otp: OtpFactor,
        step_timeout: Duration,
    ) -> Self {
        Self::new(step_timeout)
            .with_factor(Arc::new(knowledge))
            .with_factor(Arc::new(possession))
            .with_factor(Arc::new(otp))
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<FactorKind> {
        self.factors.iter().map(|factor| factor.kind()).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Run every factor in order, stopping at the first failure.
    ///
    /// # Errors
    /// `InvalidFactor` for a rejected factor, `FactorTimeout` for a step that
    /// exceeded `step_timeout`, `Internal` for a broken factor or an empty chain.
    pub async fn run(&self, ctx: &AuthContext) -> Result<(), AuthError> {
        if self.factors.is_empty() {
            return Err(AuthError::Internal("factor chain is empty".to_string()));
        }

        for factor in &self.factors {
            let kind = factor.kind();
            let span = info_span!("factor.verify", factor = %kind);
            let outcome = timeout(self.step_timeout, factor.verify(ctx))
                .instrument(span)
                .await;

            match outcome {
                Ok(Ok(Verdict::Pass)) => debug!(factor = %kind, "factor passed"),
                Ok(Ok(Verdict::Fail(reason))) => {
                    warn!(factor = %kind, reason = %reason, "factor rejected");
                    return Err(AuthError::InvalidFactor { kind, reason });
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    warn!(
                        factor = %kind,
                        timeout_secs = self.step_timeout.as_secs(),
                        "factor timed out"
                    );
                    return Err(AuthError::FactorTimeout(kind));
                }
            }
        }

        Ok(())
    }
}

impl fmt::Debug for FactorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactorChain")
            .field("factors", &self.kinds())
            .field("step_timeout", &self.step_timeout)
            .finish()
    }
}
