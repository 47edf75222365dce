//! Run configuration for the Burrow pipeline.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{BurrowError, Result};

/// Settings for a single container run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Token endpoint for the anonymous pull-token exchange.
    pub auth_url: String,
    /// Base URL of the registry API.
    pub registry_url: String,
    /// Service name passed to the token endpoint.
    pub registry_service: String,
    /// Timeout applied to every registry request, in seconds.
    pub request_timeout_secs: u64,
    /// Connection timeout for registry requests, in seconds.
    pub connect_timeout_secs: u64,
    /// Number of concurrent blob downloads.
    pub fetch_workers: usize,
    /// Whether layer blobs are checked against their SHA-256 digest.
    pub verify_digests: bool,
    /// Hostname inside the UTS namespace; defaults to the short container id.
    pub hostname: Option<String>,
    /// Parent directory for extraction targets; defaults to the system temp dir.
    pub work_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            auth_url: constants::DEFAULT_AUTH_URL.into(),
            registry_url: constants::DEFAULT_REGISTRY_URL.into(),
            registry_service: constants::DEFAULT_REGISTRY_SERVICE.into(),
            request_timeout_secs: constants::DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: constants::DEFAULT_CONNECT_TIMEOUT_SECS,
            fetch_workers: constants::DEFAULT_FETCH_WORKERS,
            verify_digests: true,
            hostname: None,
            work_dir: None,
        }
    }
}

impl RunConfig {
    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Config` for an out-of-range worker count,
    /// a zero timeout, or an empty or oversized hostname.
    pub fn validate(&self) -> Result<()> {
        if self.fetch_workers == 0 || self.fetch_workers > constants::MAX_FETCH_WORKERS {
            return Err(BurrowError::Config {
                message: format!(
                    "fetch_workers must be between 1 and {}, got {}",
                    constants::MAX_FETCH_WORKERS,
                    self.fetch_workers
                ),
            });
        }
        if self.request_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(BurrowError::Config {
                message: "timeouts must be at least one second".into(),
            });
        }
        if let Some(hostname) = &self.hostname {
            // HOST_NAME_MAX on Linux
            if hostname.is_empty() || hostname.len() > 64 {
                return Err(BurrowError::Config {
                    message: format!("hostname must be 1-64 bytes, got {hostname:?}"),
                });
            }
        }
        Ok(())
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns the connection timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
