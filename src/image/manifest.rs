//! Manifest types and media-type negotiation
//!
//! Only the allowlisted manifest formats are accepted: Docker schema 2 manifests and
//! manifest lists, OCI image manifests and OCI indexes.

use crate::error::{MirrorError, Result};
use crate::image::digest::DigestUtils;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";

/// Manifest media types accepted from and pushed to registries
pub const ACCEPTED_MEDIA_TYPES: [&str; 4] = [
    DOCKER_MANIFEST_V2,
    DOCKER_MANIFEST_LIST_V2,
    OCI_MANIFEST_V1,
    OCI_INDEX_V1,
];

/// Value for the `Accept` header of manifest requests
pub fn accept_header() -> String {
    ACCEPTED_MEDIA_TYPES.join(", ")
}

pub fn is_manifest_list_type(media_type: &str) -> bool {
    media_type == DOCKER_MANIFEST_LIST_V2 || media_type == OCI_INDEX_V1
}

/// Content descriptor as found in manifests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    /// Zero when the size is not known yet
    #[serde(default)]
    pub size: u64,
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    pub fn new(digest: impl Into<String>, size: u64, media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            size,
            digest: digest.into(),
            platform: None,
        }
    }

    /// Descriptor whose size is not known
    pub fn placeholder(digest: impl Into<String>) -> Self {
        Self::new(digest, 0, "")
    }

    pub fn has_size(&self) -> bool {
        self.size > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    pub manifests: Vec<Descriptor>,
}

/// Decoded manifest
#[derive(Debug, Clone)]
pub enum Manifest {
    Image(ImageManifest),
    List(ManifestList),
}

impl Manifest {
    /// Blobs referenced by an image manifest, config first
    pub fn blobs(&self) -> Vec<Descriptor> {
        match self {
            Manifest::Image(image) => {
                let mut blobs = Vec::with_capacity(image.layers.len() + 1);
                blobs.push(image.config.clone());
                blobs.extend(image.layers.iter().cloned());
                blobs
            }
            Manifest::List(_) => Vec::new(),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Manifest::List(_))
    }
}

/// Raw manifest bytes with their media type and content digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPayload {
    pub media_type: String,
    pub digest: String,
    pub bytes: Bytes,
}

impl ManifestPayload {
    /// Build a payload, computing the digest over the exact bytes
    pub fn new(media_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            media_type: media_type.into(),
            digest: DigestUtils::compute_docker_digest(&bytes),
            bytes,
        }
    }

    /// Build a payload from a response, detecting the media type from the body when
    /// the server did not send a usable content type
    pub fn from_response(content_type: Option<&str>, bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        let media_type = match content_type.map(|c| c.split(';').next().unwrap_or("").trim()) {
            Some(media_type) if ACCEPTED_MEDIA_TYPES.contains(&media_type) => media_type.to_string(),
            _ => detect_media_type(&bytes)?,
        };
        Ok(Self::new(media_type, bytes))
    }

    /// Decode the payload; fails for media types outside the allowlist
    pub fn decode(&self) -> Result<Manifest> {
        if !ACCEPTED_MEDIA_TYPES.contains(&self.media_type.as_str()) {
            return Err(MirrorError::Manifest(format!(
                "unsupported manifest media type: {}",
                self.media_type
            )));
        }
        if is_manifest_list_type(&self.media_type) {
            let list: ManifestList = serde_json::from_slice(&self.bytes)
                .map_err(|e| MirrorError::Manifest(format!("invalid manifest list: {}", e)))?;
            Ok(Manifest::List(list))
        } else {
            let image: ImageManifest = serde_json::from_slice(&self.bytes)
                .map_err(|e| MirrorError::Manifest(format!("invalid image manifest: {}", e)))?;
            if image.schema_version != 2 {
                return Err(MirrorError::Manifest(format!(
                    "unsupported schema version {}",
                    image.schema_version
                )));
            }
            Ok(Manifest::Image(image))
        }
    }

    pub fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.digest.clone(), self.bytes.len() as u64, self.media_type.clone())
    }

    /// Keep only the children of a manifest list accepted by `keep`.
    ///
    /// Returns `None` when nothing is left. The payload is returned unchanged when every
    /// child is kept; otherwise the list is re-serialized and its digest recomputed over
    /// the filtered bytes.
    pub fn filter_list<F>(&self, keep: F) -> Result<Option<ManifestPayload>>
    where
        F: Fn(&Descriptor) -> bool,
    {
        let mut document: serde_json::Value = serde_json::from_slice(&self.bytes)
            .map_err(|e| MirrorError::Manifest(format!("invalid manifest list: {}", e)))?;
        let children = document
            .get_mut("manifests")
            .and_then(|m| m.as_array_mut())
            .ok_or_else(|| MirrorError::Manifest("manifest list has no manifests".to_string()))?;

        let original_len = children.len();
        let mut decode_error = None;
        children.retain(|child| match serde_json::from_value::<Descriptor>(child.clone()) {
            Ok(descriptor) => keep(&descriptor),
            Err(e) => {
                decode_error = Some(e);
                false
            }
        });
        if let Some(e) = decode_error {
            return Err(MirrorError::Manifest(format!("invalid manifest list entry: {}", e)));
        }

        if children.is_empty() {
            return Ok(None);
        }
        if children.len() == original_len {
            return Ok(Some(self.clone()));
        }

        let bytes = serde_json::to_vec_pretty(&document)?;
        Ok(Some(ManifestPayload::new(self.media_type.clone(), bytes)))
    }
}

fn detect_media_type(bytes: &[u8]) -> Result<String> {
    let document: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| MirrorError::Manifest(format!("manifest is not valid JSON: {}", e)))?;
    if let Some(media_type) = document.get("mediaType").and_then(|m| m.as_str()) {
        return Ok(media_type.to_string());
    }
    // OCI documents may omit mediaType
    if document.get("manifests").is_some() {
        Ok(OCI_INDEX_V1.to_string())
    } else if document.get("config").is_some() {
        Ok(OCI_MANIFEST_V1.to_string())
    } else {
        Err(MirrorError::Manifest(
            "unable to determine manifest media type".to_string(),
        ))
    }
}
