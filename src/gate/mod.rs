//! Authentication gate.
//!
//! Flow Overview:
//! 1) Resolve the principal from the credential store.
//! 2) Refuse early if the principal is locked out.
//! 3) Run the factor chain; a failure is charged against the lockout budget.
//! 4) Mint a session, append its Success record, then make it live.
//!
//! Security boundary:
//! - Nothing but a fully passed chain produces a [`Session`].
//! - An audit write failure never takes back a session that was earned; it is
//!   raised as an operator alert and counted.
//! - Step 4 runs detached from the caller. A session is live only after its
//!   Success append has completed, and dropping the caller cannot split the two.

pub mod audit;
pub mod config;
pub mod credentials;
pub mod error;
pub mod external;
pub mod factor;
pub mod lockout;
pub mod router;
pub mod session;

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{Instrument, Span, error, info, info_span, warn};

pub use audit::{AuditLog, AuditRecord};
pub use config::AuthConfig;
pub use credentials::{CredentialStore, InMemoryCredentialStore, Principal, Role};
pub use error::AuthError;
pub use factor::{AuthContext, FactorChain, FactorInputs, FactorKind};
pub use lockout::{LockoutDecision, LockoutPolicy};
pub use router::{AccessRouter, Grant, ModuleHandle, RouteError};
pub use session::{Session, SessionIssuer};

use factor::{KnowledgeFactor, OtpChannel, OtpFactor, PossessionFactor, PossessionVerifier};

const DIGEST_PROBE: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

pub struct Authenticator {
    store: Arc<dyn CredentialStore>,
    lockout: LockoutPolicy,
    chain: FactorChain,
    sessions: Arc<SessionIssuer>,
    audit: AuditLog,
    audit_failures: Arc<AtomicU64>,
}

impl Authenticator {
    /// Assemble the gate after checking its security primitives.
    ///
    /// # Errors
    /// Returns `AuthError::Internal` when the random source or digest is
    /// unusable; the gate must not start in that case.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        lockout: LockoutPolicy,
        chain: FactorChain,
        sessions: Arc<SessionIssuer>,
        audit: AuditLog,
    ) -> Result<Self, AuthError> {
        self_test()?;
        if chain.is_empty() {
            return Err(AuthError::Internal("factor chain is empty".to_string()));
        }
        info!(
            factors = ?chain.kinds(),
            max_attempts = lockout.max_attempts(),
            lockout_secs = lockout.lockout_duration().as_secs(),
            "authenticator ready"
        );
        Ok(Self {
            store,
            lockout,
            chain,
            sessions,
            audit,
            audit_failures: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Knowledge, possession and one-time code factors wired from `config`.
    ///
    /// # Errors
    /// See [`Authenticator::new`].
    pub fn from_config(
        config: &AuthConfig,
        store: Arc<dyn CredentialStore>,
        verifier: Arc<dyn PossessionVerifier>,
        channel: Arc<dyn OtpChannel>,
        audit: AuditLog,
    ) -> Result<Self, AuthError> {
        let chain = FactorChain::canonical(
            KnowledgeFactor::new(Arc::clone(&store)),
            PossessionFactor::new(verifier, config.retry_policy()),
            OtpFactor::new(channel, config.retry_policy()),
            config.factor_timeout(),
        );
        Self::new(
            store,
            config.lockout_policy(),
            chain,
            Arc::new(SessionIssuer::new()),
            audit,
        )
    }

    /// Authenticate `principal_id` with the submitted factor inputs.
    ///
    /// # Errors
    /// `UnknownPrincipal`, `Locked`, `InvalidFactor`, `FactorTimeout`, or
    /// `Internal`. Each call writes exactly one audit record.
    pub async fn authenticate(
        &self,
        principal_id: &str,
        inputs: FactorInputs,
    ) -> Result<Session, AuthError> {
        let span = info_span!("authenticate", principal = principal_id);
        self.run_attempt(principal_id, inputs).instrument(span).await
    }

    async fn run_attempt(
        &self,
        principal_id: &str,
        inputs: FactorInputs,
    ) -> Result<Session, AuthError> {
        let principal = match self.store.lookup(principal_id) {
            Ok(principal) => principal,
            Err(err) => {
                warn!("authentication for unknown principal");
                self.record(AuditRecord::failure(principal_id, None, err.to_string()))
                    .await;
                return Err(err);
            }
        };
        let role = principal.role();

        if let LockoutDecision::Locked { remaining } = self.lockout.check(principal_id) {
            let err = AuthError::Locked { remaining };
            info!(remaining_secs = remaining.as_secs(), "attempt refused while locked");
            self.record(AuditRecord::failure(principal_id, Some(role), err.to_string()))
                .await;
            return Err(err);
        }

        let ctx = AuthContext::new(principal, inputs);
        if let Err(err) = self.chain.run(&ctx).await {
            let (returned, detail) = self.charge_failure(principal_id, err);
            self.record(AuditRecord::failure(principal_id, Some(role), detail))
                .await;
            return Err(returned);
        }

        // A concurrent attempt may have locked the principal while this chain ran.
        if let LockoutDecision::Locked { remaining } =
            self.lockout.check_and_record_attempt(principal_id, true)
        {
            let err = AuthError::Locked { remaining };
            self.record(AuditRecord::failure(principal_id, Some(role), err.to_string()))
                .await;
            return Err(err);
        }

        let session = match self.sessions.mint(principal_id, role) {
            Ok(session) => session,
            Err(err) => {
                error!(alert = true, "session issuance failed: {err}");
                self.record(AuditRecord::failure(principal_id, Some(role), err.to_string()))
                    .await;
                return Err(err);
            }
        };

        let commit = tokio::spawn(
            commit_session(
                self.audit.clone(),
                Arc::clone(&self.sessions),
                Arc::clone(&self.audit_failures),
                session,
            )
            .instrument(Span::current()),
        );
        let session = commit
            .await
            .map_err(|e| AuthError::Internal(format!("session commit failed: {e}")))??;
        info!(role = %role, "authentication succeeded");
        Ok(session)
    }

    /// Charge a chain failure to the lockout budget. Returns the error to
    /// surface and the audit detail.
    fn charge_failure(&self, principal_id: &str, err: AuthError) -> (AuthError, String) {
        let detail = err.to_string();
        if !err.counts_as_attempt() {
            return (err, detail);
        }
        match self.lockout.check_and_record_attempt(principal_id, false) {
            LockoutDecision::Allowed => (err, detail),
            LockoutDecision::Locked { remaining } => {
                let locked = AuthError::Locked { remaining };
                let detail = format!("{detail}; {locked}");
                (locked, detail)
            }
        }
    }

    async fn record(&self, record: AuditRecord) {
        append_or_alert(&self.audit, &self.audit_failures, record).await;
    }

    /// End a session. The logout is audited when the session was live.
    pub async fn logout(&self, token: &str) -> bool {
        let Some(session) = self.sessions.resolve(token) else {
            return false;
        };
        if !self.sessions.revoke(token) {
            return false;
        }
        self.record(AuditRecord::action(
            session.principal_id(),
            session.role(),
            "logout",
        ))
        .await;
        true
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionIssuer> {
        &self.sessions
    }

    #[must_use]
    pub fn lockout(&self) -> &LockoutPolicy {
        &self.lockout
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Audit writes that failed since startup.
    #[must_use]
    pub fn audit_failures(&self) -> u64 {
        self.audit_failures.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("lockout", &self.lockout)
            .field("chain", &self.chain)
            .field("sessions", &self.sessions)
            .field("audit_failures", &self.audit_failures())
            .finish_non_exhaustive()
    }
}

/// Append the Success record for `session`, then make it live.
async fn commit_session(
    audit: AuditLog,
    sessions: Arc<SessionIssuer>,
    audit_failures: Arc<AtomicU64>,
    session: Session,
) -> Result<Session, AuthError> {
    let record = AuditRecord::success(session.principal_id(), session.role(), session.token());
    append_or_alert(&audit, &audit_failures, record).await;
    if !sessions.register(&session) {
        error!(alert = true, "minted session token already live");
        return Err(AuthError::Internal("session token collision".to_string()));
    }
    Ok(session)
}

async fn append_or_alert(audit: &AuditLog, audit_failures: &AtomicU64, record: AuditRecord) {
    if let Err(err) = audit.append(record).await {
        let failures = audit_failures.fetch_add(1, Ordering::Relaxed) + 1;
        error!(alert = true, audit_failures = failures, "audit append failed: {err}");
    }
}

/// Exercise the random source and the digest once before accepting traffic.
fn self_test() -> Result<(), AuthError> {
    session::generate_session_token()?;
    let probe = hex::encode(Sha256::digest(b"abc"));
    if probe != DIGEST_PROBE {
        return Err(AuthError::Internal("SHA-256 self-test failed".to_string()));
    }
    Ok(())
}
