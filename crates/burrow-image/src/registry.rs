//! Registry client: token exchange, manifest resolution, and blob streams.
//!
//! One bearer token is fetched per run and shared by every manifest and
//! blob request of that run. The [`ImageRegistry`] trait is the seam the
//! assembler depends on, so tests can substitute an in-memory registry.

use std::fmt;
use std::io::Read;

use burrow_common::config::RunConfig;
use burrow_common::constants::{MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_OCI_MANIFEST};
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::{CancelToken, ImageReference};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use crate::manifest::{Descriptor, Manifest};
use crate::stream::{BlobStream, CancellableReader};

/// Short-lived bearer token scoped to pull access on one repository.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wraps a raw token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Source of image manifests and layer blobs.
pub trait ImageRegistry: Send + Sync {
    /// Performs an anonymous token exchange for pull access to the image's repository.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Auth` on transport failure, a non-success
    /// status, or a malformed response body.
    fn authenticate(&self, reference: &ImageReference) -> Result<AuthToken>;

    /// Fetches the single-platform manifest for the image's tag.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Manifest` on transport failure, a non-success
    /// status, or an undecodable body, and `BurrowError::UnsupportedManifest`
    /// for manifest lists.
    fn fetch_manifest(&self, reference: &ImageReference, token: &AuthToken) -> Result<Manifest>;

    /// Opens a streaming read of one layer blob.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::BlobFetch` on transport failure or a
    /// non-success status. No retry is attempted.
    fn fetch_layer_blob(
        &self,
        reference: &ImageReference,
        layer: &Descriptor,
        token: &AuthToken,
    ) -> Result<BlobStream>;
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Registry client speaking the Docker Registry HTTP API v2.
#[derive(Debug)]
pub struct RegistryClient {
    http: reqwest::blocking::Client,
    auth_url: String,
    registry_url: String,
    service: String,
    cancel: CancelToken,
}

impl RegistryClient {
    /// Builds a client from the run configuration.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Config` if the HTTP client cannot be built.
    pub fn new(config: &RunConfig, cancel: CancelToken) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("burrow/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| BurrowError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            auth_url: config.auth_url.trim_end_matches('/').to_string(),
            registry_url: config.registry_url.trim_end_matches('/').to_string(),
            service: config.registry_service.clone(),
            cancel,
        })
    }

    fn token_url(&self, repository: &str) -> String {
        format!(
            "{}?service={}&scope=repository:{repository}:pull",
            self.auth_url, self.service
        )
    }

    fn manifest_url(&self, repository: &str, tag: &str) -> String {
        format!("{}/v2/{repository}/manifests/{tag}", self.registry_url)
    }

    fn blob_url(&self, repository: &str, digest: &str) -> String {
        format!("{}/v2/{repository}/blobs/{digest}", self.registry_url)
    }
}

impl ImageRegistry for RegistryClient {
    fn authenticate(&self, reference: &ImageReference) -> Result<AuthToken> {
        let repository = reference.repository();
        let auth_error = |message: String| BurrowError::Auth {
            repository: repository.clone(),
            message,
        };
        tracing::debug!(repository = %repository, "requesting pull token");

        let response = self
            .http
            .get(self.token_url(&repository))
            .send()
            .map_err(|e| auth_error(format!("token request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(auth_error(format!("token endpoint returned {status}")));
        }

        let body: TokenResponse = serde_json::from_reader(response)
            .map_err(|e| auth_error(format!("malformed token response: {e}")))?;
        let token = body
            .token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| auth_error("token response carried no token".into()))?;
        tracing::info!(repository = %repository, "pull token acquired");
        Ok(AuthToken::new(token))
    }

    fn fetch_manifest(&self, reference: &ImageReference, token: &AuthToken) -> Result<Manifest> {
        let repository = reference.repository();
        let manifest_error = |message: String| BurrowError::Manifest {
            repository: repository.clone(),
            tag: reference.tag().to_string(),
            message,
        };
        tracing::debug!(repository = %repository, tag = reference.tag(), "fetching manifest");

        let response = self
            .http
            .get(self.manifest_url(&repository, reference.tag()))
            .header(AUTHORIZATION, token.bearer())
            .header(
                ACCEPT,
                format!("{MEDIA_TYPE_DOCKER_MANIFEST}, {MEDIA_TYPE_OCI_MANIFEST}"),
            )
            .send()
            .map_err(|e| manifest_error(format!("manifest request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(manifest_error(format!("registry returned {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .map_err(|e| manifest_error(format!("failed to read manifest body: {e}")))?;
        let manifest = Manifest::decode(reference, &body, content_type.as_deref())?;
        tracing::info!(
            repository = %repository,
            tag = reference.tag(),
            layers = manifest.layers.len(),
            "manifest resolved"
        );
        Ok(manifest)
    }

    fn fetch_layer_blob(
        &self,
        reference: &ImageReference,
        layer: &Descriptor,
        token: &AuthToken,
    ) -> Result<BlobStream> {
        let blob_error = |message: String| BurrowError::BlobFetch {
            digest: layer.digest.clone(),
            message,
        };
        self.cancel.check()?;
        tracing::debug!(digest = %layer.digest, media_type = %layer.media_type, "opening blob stream");

        let response = self
            .http
            .get(self.blob_url(&reference.repository(), &layer.digest))
            .header(AUTHORIZATION, token.bearer())
            .header(ACCEPT, layer.media_type.as_str())
            .send()
            .map_err(|e| blob_error(format!("blob request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(blob_error(format!("registry returned {status}")));
        }
        let stream: Box<dyn Read + Send> =
            Box::new(CancellableReader::new(response, self.cancel.clone()));
        Ok(stream)
    }
}

/// Token and manifest resolved for one image, shared read-only by every
/// blob request of a run.
#[derive(Debug, Clone)]
pub struct RegistrySession {
    reference: ImageReference,
    token: AuthToken,
    manifest: Manifest,
}

impl RegistrySession {
    /// Authenticates and resolves the manifest for `reference`.
    ///
    /// # Errors
    ///
    /// Propagates the registry's `Auth` and `Manifest` errors.
    pub fn open<R: ImageRegistry + ?Sized>(registry: &R, reference: ImageReference) -> Result<Self> {
        let token = registry.authenticate(&reference)?;
        let manifest = registry.fetch_manifest(&reference, &token)?;
        Ok(Self {
            reference,
            token,
            manifest,
        })
    }

    /// Builds a session from parts that were resolved elsewhere.
    #[must_use]
    pub const fn from_parts(reference: ImageReference, token: AuthToken, manifest: Manifest) -> Self {
        Self {
            reference,
            token,
            manifest,
        }
    }

    /// Returns the image reference.
    #[must_use]
    pub const fn reference(&self) -> &ImageReference {
        &self.reference
    }

    /// Returns the bearer token.
    #[must_use]
    pub const fn token(&self) -> &AuthToken {
        &self.token
    }

    /// Returns the resolved manifest.
    #[must_use]
    pub const fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Opens the blob stream for one of this session's layers.
    ///
    /// # Errors
    ///
    /// Propagates `BurrowError::BlobFetch` from the registry.
    pub fn open_layer<R: ImageRegistry + ?Sized>(
        &self,
        registry: &R,
        layer: &Descriptor,
    ) -> Result<BlobStream> {
        registry.fetch_layer_blob(&self.reference, layer, &self.token)
    }
}
