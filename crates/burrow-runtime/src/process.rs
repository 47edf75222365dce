//! Process launch inside isolated namespaces.
//!
//! The child is forked into a fresh PID namespace, enters a new UTS
//! namespace, changes root, and execs the staged command with the
//! parent's stdio.

use std::path::Path;
use std::process::ExitStatus;

use burrow_common::constants::SIGNAL_EXIT_BASE;
use burrow_common::error::Result;
use burrow_core::isolation::IsolationConfig;

/// How a launched process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited normally with this code.
    Exited(i32),
    /// Killed by this signal.
    Signaled(i32),
}

impl ExitOutcome {
    /// Returns the code to report: the exit code, or `128 + signal`.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(signal) => SIGNAL_EXIT_BASE + signal,
        }
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited(code),
            (None, Some(signal)) => Self::Signaled(signal),
            (None, None) => Self::Exited(1),
        }
    }
}

/// Runs a command under an isolation configuration.
pub trait Launcher {
    /// Launches `program` with `args` and waits for it.
    ///
    /// A normal exit, whatever its code, is `Ok`; failing to start the
    /// process at all is an error.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Isolation` when namespace setup, root change,
    /// or exec fails.
    fn launch(&self, isolation: &IsolationConfig, program: &Path, args: &[String]) -> Result<ExitOutcome>;
}

/// Launcher backed by Linux namespaces and `chroot(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceLauncher;

#[cfg(target_os = "linux")]
impl Launcher for NamespaceLauncher {
    fn launch(&self, isolation: &IsolationConfig, program: &Path, args: &[String]) -> Result<ExitOutcome> {
        use std::os::unix::process::CommandExt;
        use std::process::{Command, Stdio};

        use burrow_common::error::BurrowError;

        let setup = isolation.prepare()?;
        if isolation.namespaces.pid {
            burrow_core::namespace::pid::create_pid_namespace()?;
        }

        let mut command = Command::new(program);
        let _ = command
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        // SAFETY: the hook runs between fork and exec. `ChildSetup::apply`
        // only issues unshare/sethostname/chroot/chdir on pre-built
        // buffers, and `io::Error::from(Errno)` does not allocate.
        let _ = unsafe { command.pre_exec(move || setup.apply().map_err(std::io::Error::from)) };

        tracing::info!(
            program = %program.display(),
            args = ?args,
            root = %isolation.root.display(),
            namespaces = ?isolation.namespaces.clone_flags(),
            "launching isolated process"
        );
        let status = command.status().map_err(|e| BurrowError::Isolation {
            message: format!("failed to launch {}: {e}", program.display()),
        })?;

        let outcome = ExitOutcome::from(status);
        tracing::info!(exit_code = outcome.code(), "isolated process exited");
        Ok(outcome)
    }
}

#[cfg(not(target_os = "linux"))]
impl Launcher for NamespaceLauncher {
    fn launch(&self, _isolation: &IsolationConfig, _program: &Path, _args: &[String]) -> Result<ExitOutcome> {
        Err(burrow_common::error::BurrowError::Isolation {
            message: "Linux required for namespace isolation".into(),
        })
    }
}
