//! PID namespace isolation.
//!
//! Provides the container with its own process ID space, where PID 1
//! is the container's command.

use burrow_common::error::{BurrowError, Result};

/// Creates a new PID namespace for the children of the calling process.
///
/// The caller stays in its namespace. The next `fork(2)` child sees itself
/// as PID 1; once that child exits the namespace accepts no new members.
///
/// # Errors
///
/// Returns `BurrowError::Isolation` if the `unshare(CLONE_NEWPID)` syscall fails.
#[cfg(target_os = "linux")]
pub fn create_pid_namespace() -> Result<()> {
    use nix::sched::{CloneFlags, unshare};

    unshare(CloneFlags::CLONE_NEWPID).map_err(|e| BurrowError::Isolation {
        message: format!("PID namespace creation failed: {e}"),
    })?;
    tracing::debug!("PID namespace created for children");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: PID namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn create_pid_namespace() -> Result<()> {
    Err(BurrowError::Isolation {
        message: "Linux required for PID namespaces".into(),
    })
}
