pub mod auth;
pub mod logging;

use clap::{
    ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const CMD_LOGIN: &str = "login";
pub const CMD_VERIFY_AUDIT: &str = "verify-audit";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("custos")
        .about("Multi-factor authentication gate")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand(
            Command::new(CMD_LOGIN)
                .about("Authenticate interactively (PIN, biometric scan, one-time code)"),
        )
        .subcommand(
            Command::new(CMD_VERIFY_AUDIT).about("Replay the audit log hash chain and report"),
        );

    let command = auth::with_args(command);
    logging::with_args(command)
}
