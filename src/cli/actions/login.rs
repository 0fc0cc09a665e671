//! Interactive console adapter around [`Authenticator::authenticate`].

use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cli::telemetry;
use crate::gate::audit::ChainedFileSink;
use crate::gate::external::ExternalCallError;
use crate::gate::factor::possession::DEFAULT_KEYWORD;
use crate::gate::factor::{BoxFuture, FactorKind, KeywordVerifier, OtpChannel};
use crate::gate::router::{AccessRouter, Grant};
use crate::gate::{
    AuditLog, AuthConfig, AuthError, Authenticator, FactorInputs, InMemoryCredentialStore, Session,
};

#[derive(Debug)]
pub struct Args {
    pub config: AuthConfig,
}

type InputLines = Lines<Box<dyn AsyncBufRead + Unpin + Send>>;

/// Line-oriented console input shared by the adapter and the OTP channel.
pub struct Prompt {
    lines: Mutex<InputLines>,
}

impl Prompt {
    #[must_use]
    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }

    #[must_use]
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let reader: Box<dyn AsyncBufRead + Unpin + Send> = Box::new(reader);
        Self {
            lines: Mutex::new(reader.lines()),
        }
    }

    /// Print `label` and read one line. `None` on end of input.
    ///
    /// # Errors
    /// Returns an error if stdin cannot be read.
    pub async fn ask(&self, label: &str) -> Result<Option<String>> {
        print!("{label}");
        std::io::stdout().flush().context("failed to flush stdout")?;
        let line = self
            .lines
            .lock()
            .await
            .next_line()
            .await
            .context("failed to read from stdin")?;
        Ok(line.map(|line| line.trim_end_matches('\r').to_string()))
    }
}

/// Prints the code as a stand-in for SMS delivery and reads it back.
pub struct ConsoleOtpChannel {
    prompt: Arc<Prompt>,
}

impl ConsoleOtpChannel {
    #[must_use]
    pub fn new(prompt: Arc<Prompt>) -> Self {
        Self { prompt }
    }
}

impl OtpChannel for ConsoleOtpChannel {
    fn deliver<'a>(
        &'a self,
        principal_id: &'a str,
        code: &'a str,
    ) -> BoxFuture<'a, Result<(), ExternalCallError>> {
        Box::pin(async move {
            debug!(principal = principal_id, "sending one-time code");
            println!("Sending OTP...");
            println!("Your OTP is: {code}");
            Ok(())
        })
    }

    fn receive<'a>(
        &'a self,
        _principal_id: &'a str,
    ) -> BoxFuture<'a, Result<String, ExternalCallError>> {
        Box::pin(async move {
            match self.prompt.ask("Enter OTP: ").await {
                Ok(Some(code)) => Ok(code.trim().to_string()),
                Ok(None) => Err(ExternalCallError::Unavailable("input closed".to_string())),
                Err(err) => Err(ExternalCallError::Unavailable(err.to_string())),
            }
        })
    }
}

/// Run the interactive login against the configured audit file.
///
/// # Errors
/// Returns an error if the audit file does not verify, the gate fails its
/// startup self-test, or the console breaks.
pub async fn execute(args: Args) -> Result<()> {
    let config = args.config;

    let sink = ChainedFileSink::open(config.audit_path()).with_context(|| {
        format!("failed to open audit log {}", config.audit_path().display())
    })?;
    let (audit, writer) = AuditLog::spawn(sink, config.audit_queue_capacity());

    let prompt = Arc::new(Prompt::stdin());
    let store = Arc::new(InMemoryCredentialStore::with_defaults()?);
    let authenticator = Authenticator::from_config(
        &config,
        store,
        Arc::new(KeywordVerifier::new(DEFAULT_KEYWORD, config.possession_latency())),
        Arc::new(ConsoleOtpChannel::new(Arc::clone(&prompt))),
        audit.clone(),
    )
    .context("authentication gate failed its startup checks")?;
    let router = AccessRouter::with_defaults(audit, Arc::clone(authenticator.sessions()));

    println!("===============================================");
    println!("  custos {}", env!("CARGO_PKG_VERSION"));
    println!("  Multi-factor authentication gate");
    println!("===============================================");
    println!();

    let result = interactive(&authenticator, &router, &prompt).await;

    // Every audit handle must be gone before the writer drains and stops.
    drop(router);
    drop(authenticator);
    if let Err(err) = writer.await {
        warn!("audit writer ended abnormally: {err}");
    }
    telemetry::shutdown_tracer();

    result
}

/// Console echo of the Success record written for `session`.
fn audit_line(session: &Session) -> String {
    format!(
        "[AUDIT] SUCCESS login for '{}' ({}) at {} | Token: {}",
        session.principal_id(),
        session.role(),
        session.issued_at().format("%Y-%m-%d %H:%M:%S"),
        session.token()
    )
}

/// One login followed by routing. Returns `Ok` for denied logins; those are
/// reported on the console and in the audit log.
///
/// # Errors
/// Returns an error only if the console breaks.
pub async fn interactive(
    authenticator: &Authenticator,
    router: &AccessRouter,
    prompt: &Prompt,
) -> Result<()> {
    let Some(username) = prompt.ask("Enter username: ").await? else {
        return Ok(());
    };
    let username = username.trim().to_string();

    let session = loop {
        let Some(pin) = prompt.ask("Enter PIN: ").await? else {
            return Ok(());
        };
        let Some(scan) = prompt.ask("Simulate biometric scan (type 'scan'): ").await? else {
            return Ok(());
        };
        println!("Contacting biometric API...");

        match authenticator
            .authenticate(&username, FactorInputs::new(pin, scan))
            .await
        {
            Ok(session) => break session,
            Err(AuthError::UnknownPrincipal) => {
                println!("Unknown user.");
                return Ok(());
            }
            Err(AuthError::Locked { remaining }) => {
                println!(
                    "Too many failed attempts. Account locked for {}s.",
                    remaining.as_secs()
                );
                return Ok(());
            }
            Err(AuthError::InvalidFactor {
                kind: FactorKind::Knowledge,
                ..
            }) => {
                let state = authenticator.lockout().attempt_state(&username);
                let left = authenticator
                    .lockout()
                    .max_attempts()
                    .saturating_sub(state.failure_count());
                println!("Incorrect PIN. Attempts left: {left}");
            }
            Err(err) => {
                println!("Authentication failed: {err}");
                return Ok(());
            }
        }
    };

    println!("{}", audit_line(&session));

    let module = match router.route(session.role()) {
        Ok(module) => module,
        Err(err) => {
            println!("{err}");
            return Ok(());
        }
    };
    println!("Routing to {} ({})", module.name(), module.endpoint());

    if let Some(evidence) = module.as_evidence() {
        println!();
        println!("Forensic Evidence System");
        let evidence_id = prompt.ask("Enter evidence ID to tag: ").await?.unwrap_or_default();
        let note = prompt
            .ask("Enter chain-of-custody note: ")
            .await?
            .unwrap_or_default();
        match evidence
            .tag_evidence(&Grant::from(&session), &evidence_id, &note)
            .await
        {
            Ok(_) => println!("Evidence tagged and logged."),
            Err(err) => println!("Evidence not tagged: {err}"),
        }
    }

    authenticator.logout(session.token()).await;
    Ok(())
}
