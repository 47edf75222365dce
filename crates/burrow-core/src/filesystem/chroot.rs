//! Root change via `chroot(2)`.
//!
//! Runs in the forked child before `exec`. The path is passed as a
//! pre-built `CStr` so the child never allocates.

use std::ffi::CStr;

/// Changes the calling process's root to `new_root` and moves to `/` inside it.
///
/// # Errors
///
/// Returns the `Errno` of a failed `chroot(2)` or `chdir(2)`.
#[cfg(target_os = "linux")]
pub fn change_root(new_root: &CStr) -> nix::Result<()> {
    nix::unistd::chroot(new_root)?;
    nix::unistd::chdir(c"/")
}
