//! Root filesystem assembly.
//!
//! Creates the per-run extraction target, applies every manifest layer to
//! it in order, and stages the host executable the container will run.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use burrow_common::constants::ROOTFS_DIR_PREFIX;
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::{CancelToken, ContainerId, ImageReference};

use crate::hash::{DigestReader, verify_digest};
use crate::layer::{self, Compression, ExtractStats};
use crate::manifest::Descriptor;
use crate::path::ContainedRoot;
use crate::prefetch;
use crate::registry::{ImageRegistry, RegistrySession};
use crate::stream::BlobStream;

/// A fresh directory owned by one run and removed when dropped.
#[derive(Debug)]
pub struct ExtractionTarget {
    dir: tempfile::TempDir,
}

impl ExtractionTarget {
    /// Creates a uniquely named directory under `parent`, or under the
    /// system temp dir when `parent` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Io` if the directory cannot be created.
    pub fn create(parent: Option<&Path>, id: &ContainerId) -> Result<Self> {
        let parent = parent.map_or_else(std::env::temp_dir, Path::to_path_buf);
        let dir = tempfile::Builder::new()
            .prefix(&format!("{ROOTFS_DIR_PREFIX}{}-", id.short()))
            .tempdir_in(&parent)
            .map_err(|e| BurrowError::Io {
                path: parent.clone(),
                source: e,
            })?;
        tracing::debug!(path = %dir.path().display(), "extraction target created");
        Ok(Self { dir })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the directory now, reporting failures.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Io` if the tree cannot be removed.
    pub fn remove(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|e| BurrowError::Io {
            path: path.clone(),
            source: e,
        })?;
        tracing::debug!(path = %path.display(), "extraction target removed");
        Ok(())
    }
}

/// Knobs for [`Assembler`].
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    /// Concurrent blob downloads; `1` streams each layer straight into the extractor.
    pub fetch_workers: usize,
    /// Whether blob digests are verified.
    pub verify_digests: bool,
    /// Parent directory for the extraction target.
    pub work_dir: Option<PathBuf>,
    /// Cancellation observed between layers and entries.
    pub cancel: CancelToken,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            fetch_workers: 1,
            verify_digests: true,
            work_dir: None,
            cancel: CancelToken::new(),
        }
    }
}

/// Summary of an assembled root filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    /// Number of layers applied.
    pub layers: usize,
    /// Entry counters summed over all layers.
    pub totals: ExtractStats,
}

/// Builds a root filesystem from registry layers.
pub struct Assembler<'r, R: ImageRegistry + ?Sized> {
    registry: &'r R,
    options: AssembleOptions,
}

impl<'r, R: ImageRegistry + ?Sized> Assembler<'r, R> {
    /// Creates an assembler pulling from `registry`.
    pub const fn new(registry: &'r R, options: AssembleOptions) -> Self {
        Self { registry, options }
    }

    /// Creates a fresh extraction target and applies every layer of
    /// `reference` to it.
    ///
    /// On failure the target is dropped, which removes it.
    ///
    /// # Errors
    ///
    /// Propagates registry, extraction, and digest errors, and
    /// `BurrowError::Cancelled` when cancelled.
    pub fn assemble(
        &self,
        reference: &ImageReference,
        id: &ContainerId,
    ) -> Result<(ExtractionTarget, AssemblyReport)> {
        let target = ExtractionTarget::create(self.options.work_dir.as_deref(), id)?;
        tracing::info!(image = %reference, root = %target.path().display(), "assembling root filesystem");

        self.options.cancel.check()?;
        let session = RegistrySession::open(self.registry, reference.clone())?;
        let report = self.apply_layers(&session, target.path())?;
        tracing::info!(
            image = %reference,
            layers = report.layers,
            files = report.totals.files,
            bytes = report.totals.bytes,
            "root filesystem assembled"
        );
        Ok((target, report))
    }

    /// Applies every layer of `session` to `root`, in manifest order.
    ///
    /// # Errors
    ///
    /// Returns the first failing layer's error; later layers are not touched.
    pub fn apply_layers(&self, session: &RegistrySession, root: &Path) -> Result<AssemblyReport> {
        let layers = &session.manifest().layers;
        let compressions = layers
            .iter()
            .map(|layer| Compression::from_media_type(&layer.media_type))
            .collect::<Result<Vec<_>>>()?;

        let mut report = AssemblyReport::default();
        let mut apply = |index: usize, layer: &Descriptor, stream: BlobStream| -> Result<()> {
            self.options.cancel.check()?;
            let stats = self.apply_layer(stream, layer, compressions[index], root)?;
            tracing::info!(
                layer = index + 1,
                of = layers.len(),
                digest = %layer.digest,
                files = stats.files,
                dirs = stats.directories,
                symlinks = stats.symlinks,
                "layer applied"
            );
            accumulate(&mut report, &stats);
            Ok(())
        };

        if self.options.fetch_workers > 1 && layers.len() > 1 {
            prefetch::fetch_ordered(
                self.registry,
                session,
                self.options.fetch_workers,
                &self.options.cancel,
                &mut apply,
            )?;
        } else {
            for (index, layer) in layers.iter().enumerate() {
                self.options.cancel.check()?;
                let stream = session.open_layer(self.registry, layer)?;
                apply(index, layer, stream)?;
            }
        }
        Ok(report)
    }

    /// Extracts one blob stream onto `root`, verifying its digest when enabled.
    ///
    /// The stream is closed when this returns, whether or not extraction succeeded.
    fn apply_layer(
        &self,
        stream: BlobStream,
        layer: &Descriptor,
        compression: Compression,
        root: &Path,
    ) -> Result<ExtractStats> {
        let mut reader = DigestReader::new(stream);
        let stats = layer::extract(&mut reader, root, compression, &self.options.cancel)?;
        if self.options.verify_digests {
            verify_digest(reader, &layer.digest)?;
        }
        Ok(stats)
    }
}

fn accumulate(report: &mut AssemblyReport, stats: &ExtractStats) {
    report.layers += 1;
    let totals = &mut report.totals;
    totals.directories += stats.directories;
    totals.files += stats.files;
    totals.symlinks += stats.symlinks;
    totals.hard_links += stats.hard_links;
    totals.skipped += stats.skipped;
    totals.bytes += stats.bytes;
}

/// Copies the host binary for `command` into `root` at its host absolute
/// path and marks it executable.
///
/// Returns the absolute path the binary has inside the root.
///
/// # Errors
///
/// Returns `BurrowError::CommandNotFound` when the command cannot be
/// located on the host, and `BurrowError::Staging` when copying fails.
pub fn stage_executable(root: &Path, command: &str) -> Result<PathBuf> {
    let found = which::which(command).map_err(|e| BurrowError::CommandNotFound {
        command: command.to_string(),
        message: e.to_string(),
    })?;
    let host_path = if found.is_absolute() {
        found
    } else {
        std::env::current_dir()
            .map_err(|e| BurrowError::Staging {
                path: found.clone(),
                source: e,
            })?
            .join(found)
    };

    let contained = ContainedRoot::open(root, |path, source| BurrowError::Staging { path, source })?;
    let (parent, destination) = contained.prepare_parent(&host_path).map_err(|e| match e {
        BurrowError::PathTraversal { entry } => BurrowError::Staging {
            path: entry,
            source: io::Error::new(io::ErrorKind::PermissionDenied, "staging path escapes the root"),
        },
        other => other,
    })?;
    let staging_err = |e: io::Error| BurrowError::Staging {
        path: destination.clone(),
        source: e,
    };

    // Replace rather than write through: the image may hard-link or symlink this path.
    match fs::symlink_metadata(&destination) {
        Ok(meta) if !meta.is_dir() => fs::remove_file(&destination).map_err(staging_err)?,
        Ok(_) => {
            return Err(staging_err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a directory occupies the staging path",
            )));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(staging_err(e)),
    }

    let bytes = fs::copy(&host_path, &destination).map_err(staging_err)?;
    fs::set_permissions(&destination, fs::Permissions::from_mode(0o755)).map_err(staging_err)?;
    tracing::info!(
        command,
        host = %host_path.display(),
        staged = %destination.display(),
        bytes,
        "executable staged"
    );

    let inside = Path::new("/")
        .join(contained.relative(&parent))
        .join(destination.file_name().unwrap_or_default());
    Ok(inside)
}
