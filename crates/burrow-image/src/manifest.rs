//! Image manifest model and decoding.
//!
//! Only single-platform manifests are accepted. Manifest lists and OCI
//! indexes are rejected with `BurrowError::UnsupportedManifest` instead of
//! guessing a platform.

use burrow_common::constants::{
    MAX_IMAGE_LAYERS, MEDIA_TYPE_DOCKER_MANIFEST_LIST, MEDIA_TYPE_OCI_INDEX,
};
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::ImageReference;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// A content descriptor: the media type and digest of a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced blob.
    pub media_type: String,
    /// Content digest of the referenced blob.
    pub digest: String,
    /// Size in bytes, when the registry reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A single-platform image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Manifest schema version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    /// Media type declared inside the body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Image configuration blob.
    pub config: Descriptor,
    /// Filesystem layers, bottom to top.
    pub layers: Vec<Descriptor>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestProbe {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Option<IgnoredAny>,
}

fn is_index_media_type(media_type: &str) -> bool {
    media_type == MEDIA_TYPE_DOCKER_MANIFEST_LIST || media_type == MEDIA_TYPE_OCI_INDEX
}

impl Manifest {
    /// Decodes a manifest body.
    ///
    /// `content_type` is the response `Content-Type`, if any; parameters
    /// after `;` are ignored.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::UnsupportedManifest` for manifest lists and
    /// image indexes, and `BurrowError::Manifest` for bodies that do not
    /// decode or exceed the layer limit.
    pub fn decode(reference: &ImageReference, body: &[u8], content_type: Option<&str>) -> Result<Self> {
        let decode_error = |message: String| BurrowError::Manifest {
            repository: reference.repository(),
            tag: reference.tag().to_string(),
            message,
        };

        if let Some(header) = content_type {
            let media_type = header.split(';').next().unwrap_or_default().trim();
            if is_index_media_type(media_type) {
                return Err(BurrowError::UnsupportedManifest {
                    media_type: media_type.to_string(),
                });
            }
        }

        let probe: ManifestProbe = serde_json::from_slice(body)
            .map_err(|e| decode_error(format!("undecodable manifest body: {e}")))?;
        match probe.media_type {
            Some(media_type) if is_index_media_type(&media_type) => {
                return Err(BurrowError::UnsupportedManifest { media_type });
            }
            media_type if probe.manifests.is_some() => {
                return Err(BurrowError::UnsupportedManifest {
                    media_type: media_type.unwrap_or_else(|| "manifest list".into()),
                });
            }
            _ => {}
        }

        let manifest: Self = serde_json::from_slice(body)
            .map_err(|e| decode_error(format!("undecodable manifest body: {e}")))?;
        if manifest.layers.len() > MAX_IMAGE_LAYERS {
            return Err(decode_error(format!(
                "manifest lists {} layers, limit is {MAX_IMAGE_LAYERS}",
                manifest.layers.len()
            )));
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> ImageReference {
        ImageReference::parse("busybox:latest").unwrap()
    }

    const DOCKER_MANIFEST: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 1457,
            "digest": "sha256:6fd955f66c231c1a946653170d096a28ac2b2052a02080c0b84ec082a07f7d12"
        },
        "layers": [
            {
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": 2152262,
                "digest": "sha256:9ad63333ebc97e32b987ae66aa3cff81300e4c2e6d2f2395cef8a3ae18b249fe"
            },
            {
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": 12,
                "digest": "sha256:1111111111111111111111111111111111111111111111111111111111111111"
            }
        ]
    }"#;

    #[test]
    fn decode_docker_manifest_keeps_layer_order() {
        let manifest = Manifest::decode(
            &reference(),
            DOCKER_MANIFEST.as_bytes(),
            Some("application/vnd.docker.distribution.manifest.v2+json"),
        )
        .unwrap();
        assert_eq!(manifest.schema_version, Some(2));
        assert_eq!(manifest.layers.len(), 2);
        assert!(manifest.layers[0].digest.starts_with("sha256:9ad6"));
        assert!(manifest.layers[1].digest.starts_with("sha256:1111"));
        assert_eq!(manifest.layers[0].size, Some(2_152_262));
        assert_eq!(
            manifest.config.media_type,
            "application/vnd.docker.container.image.v1+json"
        );
    }

    #[test]
    fn decode_rejects_list_content_type() {
        let err = Manifest::decode(
            &reference(),
            DOCKER_MANIFEST.as_bytes(),
            Some("application/vnd.docker.distribution.manifest.list.v2+json; charset=utf-8"),
        )
        .unwrap_err();
        assert!(matches!(err, BurrowError::UnsupportedManifest { .. }));
    }

    #[test]
    fn decode_rejects_oci_index_body() {
        let body = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.index.v1+json",
            "manifests": [
                {"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:ab", "size": 1}
            ]
        }"#;
        let err = Manifest::decode(&reference(), body.as_bytes(), None).unwrap_err();
        assert!(matches!(
            err,
            BurrowError::UnsupportedManifest { media_type } if media_type == MEDIA_TYPE_OCI_INDEX
        ));
    }

    #[test]
    fn decode_rejects_untyped_manifest_list() {
        let body = r#"{"schemaVersion": 2, "manifests": []}"#;
        let err = Manifest::decode(&reference(), body.as_bytes(), None).unwrap_err();
        assert!(matches!(err, BurrowError::UnsupportedManifest { .. }));
    }

    #[test]
    fn decode_garbage_is_manifest_error() {
        let err = Manifest::decode(&reference(), b"<html>rate limited</html>", None).unwrap_err();
        assert!(matches!(err, BurrowError::Manifest { .. }));
    }

    #[test]
    fn decode_missing_layers_is_manifest_error() {
        let body = r#"{"schemaVersion": 2, "config": {"mediaType": "x", "digest": "sha256:ab"}}"#;
        let err = Manifest::decode(&reference(), body.as_bytes(), None).unwrap_err();
        assert!(matches!(err, BurrowError::Manifest { .. }));
    }
}
