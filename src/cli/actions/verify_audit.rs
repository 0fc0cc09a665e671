use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{error, info};

use crate::gate::audit::verify_chain;

#[derive(Debug)]
pub struct Args {
    pub audit_log: PathBuf,
}

/// Replay the audit chain and print a summary.
///
/// # Errors
/// Returns an error when the chain is broken or the file cannot be read.
pub fn execute(args: &Args) -> Result<()> {
    let summary = match verify_chain(&args.audit_log) {
        Ok(summary) => summary,
        Err(err) => {
            error!(alert = true, path = %args.audit_log.display(), "audit chain verification failed: {err}");
            return Err(err).with_context(|| {
                format!("audit log {} failed verification", args.audit_log.display())
            });
        }
    };

    info!(entries = summary.entries, "audit chain verified");
    println!(
        "{}: {} entries, chain intact (head {})",
        args.audit_log.display(),
        summary.entries,
        summary.head
    );
    Ok(())
}
