//! UTS namespace isolation.
//!
//! Gives the container its own hostname and domain name.
//!
//! Both functions run in the forked child before `exec`, so they only
//! issue syscalls and return the raw `Errno`.

use std::ffi::OsStr;

/// Moves the calling process into a new UTS namespace.
///
/// # Errors
///
/// Returns the `Errno` of a failed `unshare(CLONE_NEWUTS)`.
#[cfg(target_os = "linux")]
pub fn create_uts_namespace() -> nix::Result<()> {
    nix::sched::unshare(nix::sched::CloneFlags::CLONE_NEWUTS)
}

/// Sets the hostname of the calling process's UTS namespace.
///
/// # Errors
///
/// Returns the `Errno` of a failed `sethostname(2)`.
#[cfg(target_os = "linux")]
pub fn set_hostname(hostname: &OsStr) -> nix::Result<()> {
    nix::unistd::sethostname(hostname)
}
