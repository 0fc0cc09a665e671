//! Map parsed CLI arguments to an [`Action`].

use crate::cli::actions::{Action, login, verify_audit};
use crate::cli::commands::{CMD_LOGIN, CMD_VERIFY_AUDIT, auth};
use anyhow::{Result, bail};

/// Map validated CLI matches to an action. `login` is the default.
///
/// # Errors
/// Returns an error for an unknown subcommand.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let options = auth::Options::parse(matches)?;

    match matches.subcommand_name() {
        None | Some(CMD_LOGIN) => Ok(Action::Login(login::Args {
            config: options.config(),
        })),
        Some(CMD_VERIFY_AUDIT) => Ok(Action::VerifyAudit(verify_audit::Args {
            audit_log: options.audit_log,
        })),
        Some(other) => bail!("unknown subcommand: {other}"),
    }
}
