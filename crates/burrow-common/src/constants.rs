//! System-wide constants and registry defaults.

/// Token endpoint used for the anonymous pull-token exchange.
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io/token";

/// Base URL of the registry serving manifests and blobs.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.hub.docker.com";

/// Service name requested from the token endpoint.
pub const DEFAULT_REGISTRY_SERVICE: &str = "registry.docker.io";

/// Namespace prepended to single-component repository names.
pub const DEFAULT_REPOSITORY_NAMESPACE: &str = "library";

/// Tag used when an image reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// Per-request timeout for registry calls, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Connection establishment timeout for registry calls, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Number of concurrent blob downloads; `1` streams layers one by one.
pub const DEFAULT_FETCH_WORKERS: usize = 1;

/// Upper bound accepted for `fetch_workers`.
pub const MAX_FETCH_WORKERS: usize = 16;

/// Maximum number of layers accepted in a manifest.
pub const MAX_IMAGE_LAYERS: usize = 128;

/// Prefix of every extraction target directory.
pub const ROOTFS_DIR_PREFIX: &str = "burrow-";

/// Docker v2 schema 2 single-platform manifest.
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// OCI single-platform image manifest.
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Docker multi-platform manifest list.
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// OCI multi-platform image index.
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Exit code for configuration and host setup failures.
pub const EXIT_SETUP: u8 = 2;
/// Exit code for registry authentication failures.
pub const EXIT_AUTH: u8 = 10;
/// Exit code for manifest resolution failures.
pub const EXIT_MANIFEST: u8 = 11;
/// Exit code for blob download and integrity failures.
pub const EXIT_BLOB_FETCH: u8 = 12;
/// Exit code for layer extraction failures.
pub const EXIT_EXTRACTION: u8 = 13;
/// Exit code for executable staging failures.
pub const EXIT_STAGING: u8 = 14;
/// Exit code for namespace, root-change, or exec setup failures.
pub const EXIT_ISOLATION: u8 = 15;
/// Exit code for runs interrupted by the user.
pub const EXIT_CANCELLED: u8 = 130;

/// Offset added to a signal number when the child was killed by it.
pub const SIGNAL_EXIT_BASE: i32 = 128;

/// Application name used in log output.
pub const APP_NAME: &str = "burrow";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "burrow";
