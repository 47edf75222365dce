//! Linux namespace management for container isolation.
//!
//! Provides safe wrappers around `unshare(2)` for the namespace kinds a
//! Burrow run uses.

pub mod pid;
pub mod uts;

/// Which namespaces a launched process gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceSet {
    /// Isolate the process ID space; the child becomes PID 1.
    pub pid: bool,
    /// Isolate hostname and domain name.
    pub uts: bool,
}

impl Default for NamespaceSet {
    fn default() -> Self {
        Self {
            pid: true,
            uts: true,
        }
    }
}

impl NamespaceSet {
    /// A set requesting no new namespaces.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            pid: false,
            uts: false,
        }
    }

    /// Returns the `CLONE_NEW*` flags for this set.
    #[cfg(target_os = "linux")]
    #[must_use]
    pub fn clone_flags(&self) -> nix::sched::CloneFlags {
        use nix::sched::CloneFlags;

        let mut flags = CloneFlags::empty();
        if self.pid {
            flags |= CloneFlags::CLONE_NEWPID;
        }
        if self.uts {
            flags |= CloneFlags::CLONE_NEWUTS;
        }
        flags
    }
}
