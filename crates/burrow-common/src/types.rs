//! Domain primitive types used across the Burrow workspace.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_REPOSITORY_NAMESPACE, DEFAULT_TAG};
use crate::error::{BurrowError, Result};

/// An image name and tag, parsed from `<name>[:<tag>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    name: String,
    tag: String,
}

impl ImageReference {
    /// Parses a reference, splitting at the first colon.
    ///
    /// A reference without a colon gets the `latest` tag.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Config` if the name or the tag is empty.
    pub fn parse(input: &str) -> Result<Self> {
        let (name, tag) = input.split_once(':').unwrap_or((input, DEFAULT_TAG));
        if name.is_empty() {
            return Err(BurrowError::Config {
                message: format!("image reference has an empty name: {input:?}"),
            });
        }
        if tag.is_empty() {
            return Err(BurrowError::Config {
                message: format!("image reference has an empty tag: {input:?}"),
            });
        }
        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Returns the image name as given.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns the registry repository path, e.g. `library/busybox`.
    ///
    /// Names that already contain a `/` are used verbatim.
    #[must_use]
    pub fn repository(&self) -> String {
        if self.name.contains('/') {
            self.name.clone()
        } else {
            format!("{DEFAULT_REPOSITORY_NAMESPACE}/{}", self.name)
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// A content digest in `<algorithm>:<hex>` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: String,
    encoded: String,
}

impl Digest {
    /// Parses a digest string.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Config` if the string has no algorithm prefix
    /// or an empty encoded part.
    pub fn parse(input: &str) -> Result<Self> {
        match input.split_once(':') {
            Some((algorithm, encoded)) if !algorithm.is_empty() && !encoded.is_empty() => {
                Ok(Self {
                    algorithm: algorithm.to_ascii_lowercase(),
                    encoded: encoded.to_ascii_lowercase(),
                })
            }
            _ => Err(BurrowError::Config {
                message: format!("malformed digest: {input:?}"),
            }),
        }
    }

    /// Returns the algorithm name, e.g. `sha256`.
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Returns the hex-encoded hash.
    #[must_use]
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Returns the hex string when this is a well-formed SHA-256 digest.
    #[must_use]
    pub fn sha256_hex(&self) -> Option<&str> {
        let valid = self.algorithm == "sha256"
            && self.encoded.len() == 64
            && self.encoded.chars().all(|c| c.is_ascii_hexdigit());
        valid.then_some(self.encoded.as_str())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

/// Identifier of a single container run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first 12 characters, used as the container hostname.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared flag that aborts an in-flight run.
///
/// Clones observe the same flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `BurrowError::Cancelled` if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Cancelled` once the token is set.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BurrowError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug)]
struct CancelledRead;

impl fmt::Display for CancelledRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("read cancelled")
    }
}

impl std::error::Error for CancelledRead {}

/// Builds the I/O error returned by readers that observe a cancelled token.
#[must_use]
pub fn cancellation_error() -> std::io::Error {
    std::io::Error::other(CancelledRead)
}

/// Returns whether `err` was produced by [`cancellation_error`].
#[must_use]
pub fn is_cancellation(err: &std::io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<CancelledRead>())
}
