//! One-time code factor.
//!
//! Flow Overview:
//! 1) Draw a fresh 6-digit code (100000..=999999) from a CSPRNG.
//! 2) Deliver it through the [`OtpChannel`] under the retry policy.
//! 3) Collect the code the principal entered.
//! 4) Compare once. The code is consumed by that comparison whatever the
//!    result, and is dropped with the attempt, so it can never be replayed.

use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::{AuthContext, BoxFuture, Factor, FactorKind, Verdict};
use crate::gate::error::AuthError;
use crate::gate::external::{ExternalCallError, RetryPolicy};

pub const OTP_MIN: u32 = 100_000;
pub const OTP_MAX: u32 = 999_999;

/// Source of one-time codes.
pub trait CodeGenerator: Send + Sync {
    /// # Errors
    /// Returns `AuthError::Internal` when no secure randomness is available.
    fn generate(&self) -> Result<String, AuthError>;
}

const OTP_SPAN: u32 = OTP_MAX - OTP_MIN + 1;

/// Uniform codes drawn straight from the OS random source.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsCodeGenerator;

impl CodeGenerator for OsCodeGenerator {
    fn generate(&self) -> Result<String, AuthError> {
        // Largest multiple of the span; draws at or above it are rejected.
        let zone = u32::MAX - u32::MAX % OTP_SPAN;
        loop {
            let mut bytes = [0u8; 4];
            OsRng
                .try_fill_bytes(&mut bytes)
                .map_err(|e| AuthError::Internal(format!("failed to draw one-time code: {e}")))?;
            let draw = u32::from_le_bytes(bytes);
            if draw < zone {
                return Ok((OTP_MIN + draw % OTP_SPAN).to_string());
            }
        }
    }
}

/// Delivery and entry of one-time codes.
pub trait OtpChannel: Send + Sync {
    /// Send `code` to the principal out of band.
    fn deliver<'a>(
        &'a self,
        principal_id: &'a str,
        code: &'a str,
    ) -> BoxFuture<'a, Result<(), ExternalCallError>>;

    /// Wait for the code the principal typed back.
    fn receive<'a>(
        &'a self,
        principal_id: &'a str,
    ) -> BoxFuture<'a, Result<String, ExternalCallError>>;
}

/// A code that can be compared exactly once.
pub struct OneTimeCode {
    value: Option<SecretString>,
}

impl OneTimeCode {
    #[must_use]
    pub fn new(value: String) -> Self {
        Self {
            value: Some(SecretString::from(value)),
        }
    }

    /// The code for delivery, or `None` once consumed.
    #[must_use]
    pub fn expose(&self) -> Option<&str> {
        self.value.as_ref().map(|code| code.expose_secret())
    }

    /// Compare and invalidate. Exact match only.
    pub fn consume(&mut self, candidate: &str) -> bool {
        match self.value.take() {
            Some(code) => code
                .expose_secret()
                .as_bytes()
                .ct_eq(candidate.as_bytes())
                .into(),
            None => false,
        }
    }

    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.value.is_none()
    }
}

#[derive(Clone)]
pub struct OtpFactor {
    channel: Arc<dyn OtpChannel>,
    generator: Arc<dyn CodeGenerator>,
    policy: RetryPolicy,
}

impl OtpFactor {
    #[must_use]
    pub fn new(channel: Arc<dyn OtpChannel>, policy: RetryPolicy) -> Self {
        Self {
            channel,
            generator: Arc::new(OsCodeGenerator),
            policy,
        }
    }

    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn CodeGenerator>) -> Self {
        self.generator = generator;
        self
    }
}

impl Factor for OtpFactor {
    fn kind(&self) -> FactorKind {
        FactorKind::OneTimeCode
    }

    fn verify<'a>(&'a self, ctx: &'a AuthContext) -> BoxFuture<'a, Result<Verdict, AuthError>> {
        Box::pin(async move {
            let principal_id = ctx.principal().id();
            let mut code = OneTimeCode::new(self.generator.generate()?);

            let delivered = match code.expose() {
                Some(value) => {
                    self.policy
                        .call("otp.deliver", || self.channel.deliver(principal_id, value))
                        .await
                }
                None => return Err(AuthError::Internal("one-time code missing".to_string())),
            };
            if let Err(err) = delivered {
                warn!(principal = principal_id, "one-time code delivery failed: {err}");
                return Ok(Verdict::Fail(format!("delivery failed: {err}")));
            }
            debug!(principal = principal_id, "one-time code delivered");

            let entered = match self.channel.receive(principal_id).await {
                Ok(entered) => entered,
                Err(err) => return Ok(Verdict::Fail(format!("no code received: {err}"))),
            };

            if code.consume(&entered) {
                Ok(Verdict::Pass)
            } else {
                Ok(Verdict::Fail("one-time code mismatch".to_string()))
            }
        })
    }
}
