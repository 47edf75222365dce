//! Unified error types for the Burrow workspace.
//!
//! Every pipeline stage reports through [`BurrowError`]. [`BurrowError::kind`]
//! folds the variants into the coarse failure taxonomy the CLI maps onto
//! documented exit codes.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::constants;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BurrowError {
    /// The anonymous token exchange failed.
    #[error("authentication failed for {repository}: {message}")]
    Auth {
        /// Repository the token was requested for.
        repository: String,
        /// Description of the failure.
        message: String,
    },

    /// The manifest could not be fetched or decoded.
    #[error("manifest error for {repository}:{tag}: {message}")]
    Manifest {
        /// Repository being resolved.
        repository: String,
        /// Tag being resolved.
        tag: String,
        /// Description of the failure.
        message: String,
    },

    /// The registry answered with a multi-platform manifest list.
    #[error("unsupported manifest format: {media_type} (multi-platform images are not supported)")]
    UnsupportedManifest {
        /// Media type reported by the registry.
        media_type: String,
    },

    /// A layer blob could not be opened.
    #[error("failed to fetch blob {digest}: {message}")]
    BlobFetch {
        /// Digest of the blob.
        digest: String,
        /// Description of the failure.
        message: String,
    },

    /// A layer blob did not hash to its declared digest.
    #[error("digest mismatch for blob {digest}: computed {actual}")]
    DigestMismatch {
        /// Declared digest.
        digest: String,
        /// Digest of the bytes actually received.
        actual: String,
    },

    /// Decompression, archive parsing, or a filesystem write failed.
    #[error("extraction failed at {path}: {source}")]
    Extraction {
        /// Path being written, or the layer digest for stream failures.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The layer media type names a compression this build cannot read.
    #[error("unsupported layer media type: {media_type}")]
    UnsupportedLayer {
        /// Media type of the layer.
        media_type: String,
    },

    /// An archive entry resolved outside the destination root.
    #[error("archive entry escapes the destination root: {entry}")]
    PathTraversal {
        /// Entry name as stored in the archive.
        entry: PathBuf,
    },

    /// Copying the executable into the root failed.
    #[error("failed to stage executable at {path}: {source}")]
    Staging {
        /// Path being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The command could not be located on the host.
    #[error("command not found: {command} ({message})")]
    CommandNotFound {
        /// Command as given by the user.
        command: String,
        /// Lookup failure detail.
        message: String,
    },

    /// Namespace entry, root change, or exec failed.
    #[error("isolation setup failed: {message}")]
    Isolation {
        /// Description of the failure.
        message: String,
    },

    /// A host I/O operation outside extraction failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value or argument is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The run was cancelled before it finished.
    #[error("run cancelled")]
    Cancelled,
}

/// Coarse classification of a [`BurrowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Host setup or invalid configuration.
    Setup,
    /// Token exchange.
    Auth,
    /// Manifest resolution.
    Manifest,
    /// Blob download or integrity.
    BlobFetch,
    /// Layer decompression or unpacking.
    Extraction,
    /// Executable staging.
    Staging,
    /// Namespace, root change, or exec setup.
    Isolation,
    /// Interrupted by the user.
    Cancelled,
}

impl FailureKind {
    /// Returns the documented process exit code for this failure kind.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Setup => constants::EXIT_SETUP,
            Self::Auth => constants::EXIT_AUTH,
            Self::Manifest => constants::EXIT_MANIFEST,
            Self::BlobFetch => constants::EXIT_BLOB_FETCH,
            Self::Extraction => constants::EXIT_EXTRACTION,
            Self::Staging => constants::EXIT_STAGING,
            Self::Isolation => constants::EXIT_ISOLATION,
            Self::Cancelled => constants::EXIT_CANCELLED,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Setup => "setup",
            Self::Auth => "auth",
            Self::Manifest => "manifest",
            Self::BlobFetch => "blob-fetch",
            Self::Extraction => "extraction",
            Self::Staging => "staging",
            Self::Isolation => "isolation",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl BurrowError {
    /// Classifies this error into its failure kind.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Auth { .. } => FailureKind::Auth,
            Self::Manifest { .. } | Self::UnsupportedManifest { .. } => FailureKind::Manifest,
            Self::BlobFetch { .. } | Self::DigestMismatch { .. } => FailureKind::BlobFetch,
            Self::Extraction { .. } | Self::UnsupportedLayer { .. } | Self::PathTraversal { .. } => {
                FailureKind::Extraction
            }
            Self::Staging { .. } | Self::CommandNotFound { .. } => FailureKind::Staging,
            Self::Isolation { .. } => FailureKind::Isolation,
            Self::Io { .. } | Self::Config { .. } => FailureKind::Setup,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    /// Shorthand for the exit code of this error's kind.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }

    /// Wraps an I/O error raised while extracting `path`.
    ///
    /// An I/O error produced by a cancelled read is reported as
    /// [`BurrowError::Cancelled`] instead.
    pub fn extraction(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        if crate::types::is_cancellation(&source) {
            return Self::Cancelled;
        }
        Self::Extraction {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BurrowError>;
