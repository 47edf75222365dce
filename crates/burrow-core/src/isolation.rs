//! Declarative process isolation.
//!
//! [`IsolationConfig`] names the desired root and namespaces. Before a
//! launch it is compiled into a [`ChildSetup`], which holds everything the
//! forked child needs in pre-allocated form and performs the setup with
//! raw syscalls only.

use std::ffi::{CString, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use burrow_common::error::{BurrowError, Result};

use crate::namespace::NamespaceSet;

/// Requested isolation for one launched process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationConfig {
    /// Directory that becomes the process's `/`.
    pub root: PathBuf,
    /// Namespaces the process starts in.
    pub namespaces: NamespaceSet,
    /// Hostname set inside a new UTS namespace.
    pub hostname: Option<String>,
}

impl IsolationConfig {
    /// Isolates into `root` with the default namespace set.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            namespaces: NamespaceSet::default(),
            hostname: None,
        }
    }

    /// Sets the hostname used in the UTS namespace.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Checks the configuration and pre-builds the child-side setup.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Isolation` if the root is not an absolute
    /// existing directory, contains a NUL byte, or a hostname is requested
    /// without a UTS namespace.
    pub fn prepare(&self) -> Result<ChildSetup> {
        if !self.root.is_absolute() || !self.root.is_dir() {
            return Err(BurrowError::Isolation {
                message: format!(
                    "root must be an existing absolute directory: {}",
                    self.root.display()
                ),
            });
        }
        let root = CString::new(self.root.as_os_str().as_bytes()).map_err(|_| {
            BurrowError::Isolation {
                message: format!("root path contains a NUL byte: {}", self.root.display()),
            }
        })?;
        if self.hostname.is_some() && !self.namespaces.uts {
            return Err(BurrowError::Isolation {
                message: "a hostname requires a UTS namespace".into(),
            });
        }
        Ok(ChildSetup {
            root,
            new_uts: self.namespaces.uts,
            hostname: self.hostname.as_ref().map(OsString::from),
        })
    }
}

/// Child-side setup compiled from an [`IsolationConfig`].
#[derive(Debug, Clone)]
pub struct ChildSetup {
    root: CString,
    new_uts: bool,
    hostname: Option<OsString>,
}

impl ChildSetup {
    /// Enters the UTS namespace, sets the hostname, and changes root.
    ///
    /// Runs in the forked child between `fork` and `exec`: it performs
    /// syscalls only, with no allocation and no logging.
    ///
    /// # Errors
    ///
    /// Returns the `Errno` of the first failing syscall.
    #[cfg(target_os = "linux")]
    pub fn apply(&self) -> nix::Result<()> {
        if self.new_uts {
            crate::namespace::uts::create_uts_namespace()?;
            if let Some(hostname) = &self.hostname {
                crate::namespace::uts::set_hostname(hostname)?;
            }
        }
        crate::filesystem::chroot::change_root(&self.root)
    }
}
