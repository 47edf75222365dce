//! `burrow run`: pull an image and run a command inside it.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use burrow_common::config::RunConfig;
use burrow_common::constants;
use burrow_common::types::{CancelToken, ImageReference};
use burrow_runtime::engine::{Engine, RunRequest};
use clap::Args;

use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image to pull, as `name[:tag]`.
    pub image: String,

    /// Host command to copy into the image and execute.
    pub command: String,

    /// Arguments passed to the command unchanged.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Registry base URL.
    #[arg(long, default_value = constants::DEFAULT_REGISTRY_URL)]
    pub registry: String,

    /// Token endpoint URL.
    #[arg(long, default_value = constants::DEFAULT_AUTH_URL)]
    pub auth_url: String,

    /// Service name sent with the token request.
    #[arg(long, default_value = constants::DEFAULT_REGISTRY_SERVICE)]
    pub service: String,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = constants::DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Number of concurrent layer downloads.
    #[arg(long, default_value_t = constants::DEFAULT_FETCH_WORKERS)]
    pub fetch_workers: usize,

    /// Skip layer digest verification.
    #[arg(long)]
    pub no_verify: bool,

    /// Hostname inside the container; defaults to the short container id.
    #[arg(long)]
    pub hostname: Option<String>,

    /// Parent directory for the temporary root filesystem.
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
}

impl RunArgs {
    fn to_config(&self) -> RunConfig {
        RunConfig {
            auth_url: self.auth_url.clone(),
            registry_url: self.registry.clone(),
            registry_service: self.service.clone(),
            request_timeout_secs: self.timeout,
            fetch_workers: self.fetch_workers,
            verify_digests: !self.no_verify,
            hostname: self.hostname.clone(),
            work_dir: self.work_dir.clone(),
            ..RunConfig::default()
        }
    }
}

/// Executes the `run` command.
///
/// Returns the exit code the process should end with: the command's own
/// code when it ran.
///
/// # Errors
///
/// Returns an error if the image reference or configuration is invalid,
/// or the run fails before the command exits.
pub fn execute(args: RunArgs) -> anyhow::Result<ExitCode> {
    let image = ImageReference::parse(&args.image)?;
    let config = args.to_config();

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, cancelling run");
        handler_token.cancel();
    })
    .context("failed to set Ctrl+C handler")?;

    let engine = Engine::new(config, cancel)?;
    let request = RunRequest::new(image, args.command, args.args);
    let outcome = engine.run(&request)?;

    tracing::debug!(
        id = %outcome.container_id,
        layers = outcome.report.layers,
        unpacked = %output::format_bytes(outcome.report.totals.bytes),
        state = %outcome.state,
        "run complete"
    );
    Ok(ExitCode::from(output::exit_byte(outcome.exit_code)))
}
