//! # burrow-image
//!
//! Image resolution and root filesystem assembly for Burrow.
//!
//! Handles:
//! - **Registry**: anonymous token exchange, manifest resolution, blob streams.
//! - **Manifests**: single-platform manifest decoding; manifest lists are rejected.
//! - **Layers**: streamed decompression and tar unpacking with overlay semantics.
//! - **Paths**: containment of entry names, symlink walks and link targets.
//! - **Hashing**: SHA-256 verification of layer blobs while they stream.
//! - **Prefetch**: concurrent blob download with in-order extraction.
//! - **Rootfs**: the per-run extraction target and executable staging.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod hash;
pub mod layer;
pub mod manifest;
pub mod path;
pub mod prefetch;
pub mod registry;
pub mod rootfs;
pub mod stream;
