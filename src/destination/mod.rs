//! Destination backends
//!
//! The executor writes through one [`Destination`] contract regardless of where the
//! content lands. Two variants exist: a registry speaking the distribution protocol
//! ([`registry::RegistryDestination`]) and a flat object store emulating the registry
//! key layout ([`object_store::ObjectStoreDestination`]). The variant is chosen once per
//! destination repository by the connector, never switched on inside the executor.

pub mod object_store;
pub mod registry;
pub mod s3;

pub use object_store::{BucketLocation, ObjectStore, ObjectStoreDestination};
pub use registry::RegistryDestination;
pub use s3::S3ObjectStore;

use crate::error::{MirrorError, Result};
use crate::image::{Descriptor, ManifestPayload, RepositoryKey};
use crate::registry::{BlobStream, MountOutcome, Repository};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of storage a mapping writes to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DestinationKind {
    #[default]
    Registry,
    ObjectStore,
}

impl DestinationKind {
    /// Prefix used when printing references of this kind
    pub fn scheme_prefix(&self) -> &'static str {
        match self {
            DestinationKind::Registry => "",
            DestinationKind::ObjectStore => "s3://",
        }
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationKind::Registry => write!(f, "registry"),
            DestinationKind::ObjectStore => write!(f, "s3"),
        }
    }
}

/// Capability set the executor needs from a mirror target
#[async_trait]
pub trait Destination: Send + Sync {
    fn kind(&self) -> DestinationKind;

    fn key(&self) -> &RepositoryKey;

    /// Descriptor of the blob when it is already present
    async fn stat_blob(&self, digest: &str) -> Result<Option<Descriptor>>;

    /// Attach a blob from another repository without transferring bytes
    async fn mount_blob(&self, digest: &str, from: &RepositoryKey) -> Result<MountOutcome>;

    /// Make the blob present, pulling content from `source` only when needed
    async fn create_blob(&self, descriptor: &Descriptor, source: &dyn Repository) -> Result<Descriptor>;

    async fn open_blob(&self, digest: &str) -> Result<BlobStream>;

    async fn manifest_exists(&self, digest: &str) -> Result<bool>;

    /// Digest a tag currently points at, if the tag exists
    async fn resolve_tag(&self, tag: &str) -> Result<Option<String>>;

    async fn get_manifest(&self, reference: &str) -> Result<ManifestPayload>;

    /// Store a manifest under every tag, or under its digest only when `tags` is empty
    async fn put_manifest(&self, payload: &ManifestPayload, tags: &[String]) -> Result<String>;

    async fn list_tags(&self) -> Result<Vec<String>> {
        Err(MirrorError::Unsupported(format!("tag listing on {}", self.key())))
    }

    async fn delete_blob(&self, digest: &str) -> Result<()> {
        Err(MirrorError::Unsupported(format!(
            "deleting {} from {}",
            digest,
            self.key()
        )))
    }

    async fn resume_upload(&self, upload_id: &str) -> Result<()> {
        Err(MirrorError::Unsupported(format!(
            "resuming upload {} on {}",
            upload_id,
            self.key()
        )))
    }

    /// Printable destination reference for a tag or digest
    fn display_reference(&self, reference: &str) -> String {
        format_reference(self.kind(), self.key(), Some(reference))
    }
}

/// `[s3://]registry/repository[:tag|@digest]`
pub fn format_reference(kind: DestinationKind, key: &RepositoryKey, reference: Option<&str>) -> String {
    match reference {
        Some(reference) if reference.contains(':') => {
            format!("{}{}@{}", kind.scheme_prefix(), key, reference)
        }
        Some(reference) => format!("{}{}:{}", kind.scheme_prefix(), key, reference),
        None => format!("{}{}", kind.scheme_prefix(), key),
    }
}
