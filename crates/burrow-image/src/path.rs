//! Path containment for archive entries and link targets.
//!
//! Entry names are first normalised lexically; a name that climbs above the
//! root is rejected. [`ContainedRoot`] then walks the name against the tree
//! on disk so symlinks created by earlier entries are resolved and checked
//! too. Symlink targets are rewritten the way the kernel would resolve them
//! after a root change, so `..` at the root stays at the root.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Component, Path, PathBuf};

use burrow_common::error::{BurrowError, Result};

/// Normalises `name` into root-relative components.
///
/// Leading `/` is stripped and `.` dropped. `..` pops a component.
fn contained_components(name: &Path) -> Option<Vec<&OsStr>> {
    let mut parts = Vec::new();
    for component in name.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                let _ = parts.pop()?;
            }
            Component::Normal(part) => parts.push(part),
        }
    }
    Some(parts)
}

/// Splits an archive entry name into root-relative components.
///
/// # Errors
///
/// Returns `BurrowError::PathTraversal` when `name` climbs above the root.
pub fn entry_components(name: &Path) -> Result<Vec<&OsStr>> {
    contained_components(name).ok_or_else(|| BurrowError::PathTraversal {
        entry: name.to_path_buf(),
    })
}

/// Computes the relative symlink to create in `link_dir` (a root-relative
/// directory) for the archived link target `target`.
///
/// Absolute targets anchor at the root, relative targets at `link_dir`.
/// The result is relative to `link_dir` and always resolves inside the
/// root; `..` at the root stays at the root.
pub fn relative_link_target(link_dir: &Path, target: &Path) -> PathBuf {
    let link_dir: Vec<&OsStr> = link_dir
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();

    let mut resolved = if target.has_root() {
        Vec::new()
    } else {
        link_dir.clone()
    };
    for component in target.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                let _ = resolved.pop();
            }
            Component::Normal(part) => resolved.push(part),
        }
    }

    let common = link_dir
        .iter()
        .zip(&resolved)
        .take_while(|(a, b)| a == b)
        .count();
    let mut relative = PathBuf::new();
    for _ in common..link_dir.len() {
        relative.push("..");
    }
    relative.extend(&resolved[common..]);
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    relative
}

/// Maps an I/O failure at a path to the caller's error variant.
pub type IoErrorMap = fn(PathBuf, io::Error) -> BurrowError;

/// A destination root that every write is confined to.
///
/// Names are walked one component at a time against what is actually on
/// disk. A symlink met on the way is resolved and must land inside the
/// canonical root, so links laid down by earlier entries cannot redirect
/// later writes outside it.
#[derive(Debug, Clone)]
pub struct ContainedRoot {
    root: PathBuf,
    io_error: IoErrorMap,
}

impl ContainedRoot {
    /// Canonicalizes `root`.
    ///
    /// # Errors
    ///
    /// Returns the error built by `io_error` if `root` cannot be resolved.
    pub fn open(root: &Path, io_error: IoErrorMap) -> Result<Self> {
        let root = fs::canonicalize(root).map_err(|e| io_error(root.to_path_buf(), e))?;
        Ok(Self { root, io_error })
    }

    /// Returns the canonical root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Returns `dir`, a canonical path inside the root, relative to the root.
    #[must_use]
    pub fn relative<'p>(&self, dir: &'p Path) -> &'p Path {
        dir.strip_prefix(&self.root).unwrap_or(dir)
    }

    /// Creates the parent directories of `name` (mode 0755) and returns the
    /// canonical parent together with the path of the entry inside it.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::PathTraversal` if `name` or a symlink on the
    /// way leads outside the root, and the mapped I/O error otherwise.
    pub fn prepare_parent(&self, name: &Path) -> Result<(PathBuf, PathBuf)> {
        let (parents, last) = self.split(name)?;
        let parent = self.walk(self.root.clone(), &parents, true, name)?;
        let slot = parent.join(last);
        Ok((parent, slot))
    }

    /// Creates the directory `name`, replacing a non-directory in its place,
    /// and returns its canonical path.
    ///
    /// An existing symlink to a directory inside the root is kept.
    ///
    /// # Errors
    ///
    /// As for [`ContainedRoot::prepare_parent`].
    pub fn create_dir(&self, name: &Path) -> Result<PathBuf> {
        let parts = entry_components(name)?;
        let Some((last, parents)) = parts.split_last() else {
            return Ok(self.root.clone());
        };
        let parent = self.walk(self.root.clone(), parents, true, name)?;
        let slot = parent.join(last);
        match fs::symlink_metadata(&slot) {
            Ok(meta) if !meta.is_dir() && !meta.file_type().is_symlink() => {
                fs::remove_file(&slot).map_err(|e| (self.io_error)(slot.clone(), e))?;
            }
            _ => {}
        }
        self.walk(parent, &[*last], true, name)
    }

    /// Locates an existing entry named `name` without creating anything.
    ///
    /// The final component is not resolved, so a symlink there is named,
    /// not followed.
    ///
    /// # Errors
    ///
    /// As for [`ContainedRoot::prepare_parent`]; a missing parent is an I/O error.
    pub fn locate(&self, name: &Path) -> Result<PathBuf> {
        let (parents, last) = self.split(name)?;
        let parent = self.walk(self.root.clone(), &parents, false, name)?;
        Ok(parent.join(last))
    }

    /// Resolves `path` fully, returning `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::PathTraversal` if `path` resolves outside the root.
    pub fn resolve_existing(&self, path: &Path, name: &Path) -> Result<Option<PathBuf>> {
        match fs::canonicalize(path) {
            Ok(resolved) => self.contain(resolved, name).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err((self.io_error)(path.to_path_buf(), e)),
        }
    }

    fn split<'n>(&self, name: &'n Path) -> Result<(Vec<&'n OsStr>, &'n OsStr)> {
        let mut parts = entry_components(name)?;
        let last = parts.pop().ok_or_else(|| {
            (self.io_error)(
                self.root.clone(),
                io::Error::new(io::ErrorKind::InvalidInput, "entry names the root directory"),
            )
        })?;
        Ok((parts, last))
    }

    fn contain(&self, resolved: PathBuf, name: &Path) -> Result<PathBuf> {
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            tracing::warn!(entry = %name.display(), resolved = %resolved.display(), "entry escapes root");
            Err(BurrowError::PathTraversal {
                entry: name.to_path_buf(),
            })
        }
    }

    /// Descends from `start` through `parts`, creating missing directories
    /// when `create` is set. The returned path is canonical.
    fn walk(&self, start: PathBuf, parts: &[&OsStr], create: bool, name: &Path) -> Result<PathBuf> {
        let mut current = start;
        for part in parts {
            let next = current.join(part);
            let io_err = |e: io::Error| (self.io_error)(next.clone(), e);
            current = match fs::symlink_metadata(&next) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    let resolved = self.contain(fs::canonicalize(&next).map_err(io_err)?, name)?;
                    if !resolved.is_dir() {
                        return Err(io_err(not_a_directory()));
                    }
                    resolved
                }
                Ok(meta) if meta.is_dir() => next,
                Ok(_) => return Err(io_err(not_a_directory())),
                Err(e) if create && e.kind() == io::ErrorKind::NotFound => {
                    fs::DirBuilder::new().mode(0o755).create(&next).map_err(io_err)?;
                    next
                }
                Err(e) => return Err(io_err(e)),
            };
        }
        Ok(current)
    }
}

fn not_a_directory() -> io::Error {
    io::Error::new(io::ErrorKind::NotADirectory, "path component is not a directory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn open(root: &Path) -> ContainedRoot {
        ContainedRoot::open(root, |path, e| BurrowError::extraction(path, e)).expect("open root")
    }

    #[test]
    fn entry_names_are_normalised() {
        let parts = |name: &'static str| entry_components(Path::new(name)).unwrap();
        assert_eq!(parts("usr/bin/app"), ["usr", "bin", "app"]);
        assert_eq!(parts("./etc/"), ["etc"]);
        assert_eq!(parts("/abs/file"), ["abs", "file"]);
        assert_eq!(parts("a/../b"), ["b"]);
        assert!(parts("./").is_empty());
    }

    #[test]
    fn entry_names_cannot_climb_above_root() {
        for name in ["../../etc/passwd", "..", "a/../../b", "/../x"] {
            let err = entry_components(Path::new(name)).unwrap_err();
            assert!(matches!(err, BurrowError::PathTraversal { .. }), "{name}");
        }
    }

    #[test]
    fn relative_target_is_anchored_at_link_dir() {
        let link = relative_link_target(Path::new("usr/bin"), Path::new("../shared/lib.so"));
        assert_eq!(link, Path::new("../shared/lib.so"));
    }

    #[test]
    fn absolute_target_is_anchored_at_root() {
        let link = relative_link_target(Path::new("usr/bin"), Path::new("/bin/busybox"));
        assert_eq!(link, Path::new("../../bin/busybox"));

        let link = relative_link_target(Path::new("bin"), Path::new("/bin/busybox"));
        assert_eq!(link, Path::new("busybox"));
    }

    #[test]
    fn target_cannot_climb_above_root() {
        let link = relative_link_target(Path::new("etc"), Path::new("../../../../etc/shadow"));
        assert_eq!(link, Path::new("shadow"));

        let link = relative_link_target(Path::new(""), Path::new("/"));
        assert_eq!(link, Path::new("."));
    }

    #[test]
    fn sibling_target_stays_simple() {
        let link = relative_link_target(Path::new("lib"), Path::new("libc.so.6"));
        assert_eq!(link, Path::new("libc.so.6"));
    }

    #[test]
    fn missing_parents_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let root = open(dir.path());
        let (parent, slot) = root.prepare_parent(Path::new("usr/local/bin/tool")).unwrap();
        assert!(parent.is_dir());
        assert_eq!(root.relative(&parent), Path::new("usr/local/bin"));
        assert_eq!(slot, parent.join("tool"));
    }

    #[test]
    fn links_inside_root_are_followed() {
        let dir = tempfile::tempdir().unwrap();
        let root = open(dir.path());
        fs::create_dir_all(root.path().join("usr/lib")).unwrap();
        symlink("usr/lib", root.path().join("lib")).unwrap();

        let (parent, _) = root.prepare_parent(Path::new("lib/libc.so")).unwrap();
        assert_eq!(root.relative(&parent), Path::new("usr/lib"));
    }

    #[test]
    fn links_out_of_root_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let root = open(dir.path());
        symlink(outside.path(), root.path().join("esc")).unwrap();

        let err = root.prepare_parent(Path::new("esc/sub/file")).unwrap_err();
        assert!(matches!(err, BurrowError::PathTraversal { .. }));
        let err = root.create_dir(Path::new("esc/sub")).unwrap_err();
        assert!(matches!(err, BurrowError::PathTraversal { .. }));
        assert_eq!(fs::read_dir(outside.path()).unwrap().count(), 0);
    }

    #[test]
    fn file_in_the_middle_of_a_name_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = open(dir.path());
        fs::write(root.path().join("etc"), b"not a dir").unwrap();
        let err = root.prepare_parent(Path::new("etc/passwd")).unwrap_err();
        assert!(matches!(err, BurrowError::Extraction { .. }), "{err:?}");
    }

    #[test]
    fn locate_does_not_create() {
        let dir = tempfile::tempdir().unwrap();
        let root = open(dir.path());
        assert!(root.locate(Path::new("missing/file")).is_err());
        assert!(!root.path().join("missing").exists());
    }
}
