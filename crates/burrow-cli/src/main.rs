//! # burrow
//!
//! Pulls an image, assembles its root filesystem in a private directory,
//! and runs one command inside it under fresh PID and UTS namespaces.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match commands::execute(cli) {
        Ok(code) => code,
        Err(err) => {
            let code = output::report_failure(&err);
            ExitCode::from(code)
        }
    }
}

/// Logs go to stderr so the launched command owns stdout.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
