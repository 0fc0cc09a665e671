use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

use crate::gate::AuthConfig;

pub const ARG_AUDIT_LOG: &str = "audit-log";
pub const ARG_MAX_ATTEMPTS: &str = "max-attempts";
pub const ARG_LOCKOUT_SECONDS: &str = "lockout-seconds";
pub const ARG_FACTOR_TIMEOUT_SECONDS: &str = "factor-timeout-seconds";
pub const ARG_SCAN_LATENCY_MS: &str = "scan-latency-ms";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_audit_args(command);
    with_lockout_args(command)
}

fn with_audit_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_AUDIT_LOG)
            .long(ARG_AUDIT_LOG)
            .help("Hash-chained audit log file")
            .env("CUSTOS_AUDIT_LOG")
            .default_value("audit_log.jsonl")
            .global(true)
            .value_parser(clap::value_parser!(PathBuf)),
    )
}

fn with_lockout_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAX_ATTEMPTS)
                .long(ARG_MAX_ATTEMPTS)
                .help("Failed attempts allowed before a principal is locked out")
                .env("CUSTOS_MAX_ATTEMPTS")
                .default_value("3")
                .global(true)
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_SECONDS)
                .long(ARG_LOCKOUT_SECONDS)
                .help("Lockout duration in seconds")
                .env("CUSTOS_LOCKOUT_SECONDS")
                .default_value("30")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_FACTOR_TIMEOUT_SECONDS)
                .long(ARG_FACTOR_TIMEOUT_SECONDS)
                .help("Time allowed for each factor step in seconds")
                .env("CUSTOS_FACTOR_TIMEOUT_SECONDS")
                .default_value("120")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SCAN_LATENCY_MS)
                .long(ARG_SCAN_LATENCY_MS)
                .help("Simulated biometric backend latency in milliseconds")
                .env("CUSTOS_SCAN_LATENCY_MS")
                .default_value("1500")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub audit_log: PathBuf,
    pub max_attempts: u32,
    pub lockout_seconds: u64,
    pub factor_timeout_seconds: u64,
    pub scan_latency_ms: u64,
}

impl Options {
    /// # Errors
    /// Never fails for matches produced by [`super::new`]; every argument has a default.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let audit_log = matches
            .get_one::<PathBuf>(ARG_AUDIT_LOG)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("missing argument: --{ARG_AUDIT_LOG}"))?;

        Ok(Self {
            audit_log,
            max_attempts: matches.get_one::<u32>(ARG_MAX_ATTEMPTS).copied().unwrap_or(3),
            lockout_seconds: matches
                .get_one::<u64>(ARG_LOCKOUT_SECONDS)
                .copied()
                .unwrap_or(30),
            factor_timeout_seconds: matches
                .get_one::<u64>(ARG_FACTOR_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(120),
            scan_latency_ms: matches
                .get_one::<u64>(ARG_SCAN_LATENCY_MS)
                .copied()
                .unwrap_or(1500),
        })
    }

    #[must_use]
    pub fn config(&self) -> AuthConfig {
        AuthConfig::new()
            .with_audit_path(self.audit_log.clone())
            .with_max_attempts(self.max_attempts)
            .with_lockout_duration_seconds(self.lockout_seconds)
            .with_factor_timeout_seconds(self.factor_timeout_seconds)
            .with_possession_latency_ms(self.scan_latency_ms)
    }
}
