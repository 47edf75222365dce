//! Runtime engine that drives a single container run.

use std::fmt;

use burrow_common::config::RunConfig;
use burrow_common::error::{BurrowError, FailureKind};
use burrow_common::types::{CancelToken, ContainerId, ImageReference};
use burrow_core::isolation::IsolationConfig;
use burrow_image::registry::{ImageRegistry, RegistryClient};
use burrow_image::rootfs::{AssembleOptions, Assembler, AssemblyReport, stage_executable};

use crate::process::{Launcher, NamespaceLauncher};
use crate::state::{RunStage, RunState, RunTracker};

/// What to run: an image and a command with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Image to pull.
    pub image: ImageReference,
    /// Host command to stage and execute.
    pub command: String,
    /// Arguments passed to the command unchanged.
    pub args: Vec<String>,
}

impl RunRequest {
    /// Creates a request.
    pub fn new(image: ImageReference, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            image,
            command: command.into(),
            args,
        }
    }
}

/// Result of a run whose command was launched.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Identifier of the run.
    pub container_id: ContainerId,
    /// Exit code of the command, `128 + signal` if it was killed.
    pub exit_code: i32,
    /// Final state; always `Terminated`.
    pub state: RunState,
    /// Layer and entry counters from root assembly.
    pub report: AssemblyReport,
}

/// A run that stopped before the command produced an exit code.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {error}")]
pub struct RunFailure {
    /// Stage the failure happened in.
    pub stage: RunStage,
    /// Underlying error.
    #[source]
    pub error: BurrowError,
}

impl RunFailure {
    /// Returns the failure category.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        self.error.kind()
    }

    /// Returns the process exit code for this failure.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error.exit_code()
    }
}

/// Coordinates root assembly, staging, and launch.
///
/// Every run gets a fresh extraction target that is removed on every exit
/// path, including failures and panics.
pub struct Engine {
    registry: Box<dyn ImageRegistry>,
    launcher: Box<dyn Launcher>,
    config: RunConfig,
    cancel: CancelToken,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine talking to the configured registry and launching
    /// with Linux namespaces.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Config` if the configuration is invalid or the
    /// HTTP client cannot be built.
    pub fn new(config: RunConfig, cancel: CancelToken) -> Result<Self, BurrowError> {
        config.validate()?;
        let registry = RegistryClient::new(&config, cancel.clone())?;
        Ok(Self::with_parts(
            Box::new(registry),
            Box::new(NamespaceLauncher),
            config,
            cancel,
        ))
    }

    /// Creates an engine from explicit parts.
    #[must_use]
    pub fn with_parts(
        registry: Box<dyn ImageRegistry>,
        launcher: Box<dyn Launcher>,
        config: RunConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            registry,
            launcher,
            config,
            cancel,
        }
    }

    /// Returns the run configuration.
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs `request` to completion.
    ///
    /// The command's own exit code, zero or not, is a successful outcome.
    ///
    /// # Errors
    ///
    /// Returns a [`RunFailure`] naming the stage that failed when the
    /// command could not be launched.
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome, RunFailure> {
        let id = ContainerId::generate();
        let mut tracker = RunTracker::new(id.clone());
        let fail = |tracker: &mut RunTracker, stage: RunStage, error: BurrowError| {
            tracker.advance(RunState::Failed(stage));
            tracing::error!(id = %id, %stage, kind = %error.kind(), %error, "run failed");
            RunFailure { stage, error }
        };

        tracing::info!(id = %id, image = %request.image, command = %request.command, "starting run");
        tracker.advance(RunState::Assembling);
        let assembler = Assembler::new(self.registry.as_ref(), self.assemble_options());
        let (target, report) = assembler
            .assemble(&request.image, &id)
            .map_err(|e| fail(&mut tracker, RunStage::Assembling, e))?;

        let program = stage_executable(target.path(), &request.command)
            .map_err(|e| fail(&mut tracker, RunStage::Staging, e))?;
        tracker.advance(RunState::Staged);

        self.cancel
            .check()
            .map_err(|e| fail(&mut tracker, RunStage::Launching, e))?;
        let hostname = self
            .config
            .hostname
            .clone()
            .unwrap_or_else(|| id.short().to_string());
        let isolation = IsolationConfig::new(target.path()).with_hostname(hostname);

        tracker.advance(RunState::Running);
        let exit = self
            .launcher
            .launch(&isolation, &program, &request.args)
            .map_err(|e| fail(&mut tracker, RunStage::Launching, e))?;
        let exit_code = exit.code();
        tracker.advance(RunState::Terminated(exit_code));

        if let Err(e) = target.remove() {
            tracing::warn!(id = %id, error = %e, "failed to remove extraction target");
        }
        tracing::info!(id = %id, exit_code, "run finished");
        Ok(RunOutcome {
            container_id: id,
            exit_code,
            state: tracker.current(),
            report,
        })
    }

    fn assemble_options(&self) -> AssembleOptions {
        AssembleOptions {
            fetch_workers: self.config.fetch_workers,
            verify_digests: self.config.verify_digests,
            work_dir: self.config.work_dir.clone(),
            cancel: self.cancel.clone(),
        }
    }
}
