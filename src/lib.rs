//! # Custos (multi-factor authentication gate)
//!
//! `custos` authenticates a principal through an ordered chain of factors
//! (knowledge, possession, one-time code), issues a role-bound session on
//! success, and records every decision in a hash-chained audit trail.
//!
//! ## Flow
//!
//! credential lookup → lockout gate → factor chain → session issuance →
//! audit append → role routing.
//!
//! ## Lockout
//!
//! Failed attempts are counted per principal. Reaching the configured maximum
//! locks the principal for a fixed cool-down; checks made while locked never
//! consume an attempt.
//!
//! ## Audit
//!
//! Records are funneled through a single writer task. The file sink chains
//! every line to its predecessor with SHA-256 so that insertion, deletion or
//! modification is detectable offline. An audit write failure never revokes a
//! session that was already earned; it is escalated on the operator channel.

pub mod cli;
pub mod gate;

pub use gate::{
    AuthConfig, AuthError, Authenticator, FactorInputs, Role, Session,
    audit::{AuditLog, AuditRecord, Outcome},
};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }
}
