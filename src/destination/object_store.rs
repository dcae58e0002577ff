//! Object-store destination
//!
//! Emulates the destination contract over a flat bucket using the registry's key layout:
//!
//! ```text
//! /v2/                               sentinel written on first use
//! /v2/<repo>/manifests/<tag|digest>  manifest documents
//! /v2/<repo>/blobs/<digest>          blob content
//! ```
//!
//! Buckets have no content-addressed stat, so creating a blob HEADs the destination key,
//! then tries a server-side copy from each configured source location, and finally
//! streams the content from the source registry.

use crate::cli::config::S3SourceLocation;
use crate::destination::{Destination, DestinationKind};
use crate::error::{MirrorError, Result};
use crate::image::{Descriptor, DigestUtils, ManifestPayload, RepositoryKey};
use crate::logging::Logger;
use crate::registry::{BlobStream, MountOutcome, Repository};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;

pub const SENTINEL_KEY: &str = "/v2/";

/// Minimal bucket operations needed by the mirror
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Size of the object when it exists
    async fn head(&self, key: &str) -> Result<Option<u64>>;

    /// Server-side copy from `source` (`bucket/key`) to `key` in this bucket
    async fn copy(&self, source: &str, key: &str) -> Result<()>;

    /// Streamed write of an object
    async fn put(&self, key: &str, body: BlobStream, size: Option<u64>, content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Bytes>;
}

/// Endpoint, region and bucket of an object-store destination
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketLocation {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
}

impl fmt::Display for BucketLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}/{}", self.endpoint, self.region, self.bucket)
    }
}

impl BucketLocation {
    /// Split an object-store repository key (`<endpoint>/<region>/<bucket>/<repo...>`)
    /// into the bucket location and the repository path inside the bucket
    pub fn from_repository_key(key: &RepositoryKey) -> Result<(BucketLocation, String)> {
        let mut parts = key.repository.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(region), Some(bucket), Some(repository))
                if !region.is_empty() && !bucket.is_empty() && !repository.is_empty() =>
            {
                Ok((
                    BucketLocation {
                        endpoint: key.registry.clone(),
                        region: region.to_string(),
                        bucket: bucket.to_string(),
                    },
                    repository.to_string(),
                ))
            }
            _ => Err(MirrorError::Configuration(format!(
                "object store destinations must be s3://<endpoint>/<region>/<bucket>/<repository>, got s3://{}",
                key
            ))),
        }
    }
}

pub fn blob_key(repository: &str, digest: &str) -> String {
    format!("/v2/{}/blobs/{}", repository, digest)
}

pub fn manifest_key(repository: &str, reference: &str) -> String {
    format!("/v2/{}/manifests/{}", repository, reference)
}

pub struct ObjectStoreDestination {
    key: RepositoryKey,
    repository: String,
    store: Arc<dyn ObjectStore>,
    sources: Vec<S3SourceLocation>,
    output: Logger,
}

impl ObjectStoreDestination {
    /// Open a destination repository, writing the `/v2/` sentinel if the bucket lacks it
    pub async fn connect(
        key: RepositoryKey,
        store: Arc<dyn ObjectStore>,
        sources: Vec<S3SourceLocation>,
        output: Logger,
    ) -> Result<Self> {
        let (_, repository) = BucketLocation::from_repository_key(&key)?;
        if store.head(SENTINEL_KEY).await?.is_none() {
            output.detail(&format!("Initializing bucket {}", store.bucket()));
            store
                .put(SENTINEL_KEY, futures::stream::empty().boxed(), Some(0), "text/plain")
                .await?;
        }
        Ok(Self {
            key,
            repository,
            store,
            sources,
            output,
        })
    }

    fn candidate_key(location: &S3SourceLocation, digest: &str) -> Result<String> {
        if location.registry_layout {
            Ok(format!("{}/{}", location.path, DigestUtils::storage_path(digest)?))
        } else {
            Ok(format!("{}/{}", location.path, digest))
        }
    }

    /// Try each configured source location in order; true when one copy succeeded
    async fn attempt_copy(&self, digest: &str, key: &str) -> bool {
        for location in &self.sources {
            let source_key = match Self::candidate_key(location, digest) {
                Ok(source_key) => source_key,
                Err(e) => {
                    self.output.detail(&format!("Skipping copy source {}: {}", location.path, e));
                    continue;
                }
            };
            match self.store.copy(&source_key, key).await {
                Ok(()) => {
                    self.output.detail(&format!(
                        "Copied {} from {}",
                        self.output.short_digest(digest),
                        source_key
                    ));
                    return true;
                }
                Err(e) => {
                    self.output
                        .detail(&format!("Unable to copy from {}: {}", source_key, e));
                }
            }
        }
        false
    }
}

#[async_trait]
impl Destination for ObjectStoreDestination {
    fn kind(&self) -> DestinationKind {
        DestinationKind::ObjectStore
    }

    fn key(&self) -> &RepositoryKey {
        &self.key
    }

    async fn stat_blob(&self, digest: &str) -> Result<Option<Descriptor>> {
        let size = self.store.head(&blob_key(&self.repository, digest)).await?;
        Ok(size.map(|size| Descriptor::new(digest, size, "")))
    }

    async fn mount_blob(&self, digest: &str, _from: &RepositoryKey) -> Result<MountOutcome> {
        Err(MirrorError::Unsupported(format!(
            "mounting {} into object store {}",
            digest, self.key
        )))
    }

    async fn create_blob(&self, descriptor: &Descriptor, source: &dyn Repository) -> Result<Descriptor> {
        let key = blob_key(&self.repository, &descriptor.digest);
        if let Some(size) = self.store.head(&key).await? {
            return Ok(Descriptor::new(descriptor.digest.clone(), size, descriptor.media_type.clone()));
        }
        if self.attempt_copy(&descriptor.digest, &key).await {
            return Ok(descriptor.clone());
        }

        let content = source.open_blob(&descriptor.digest).await?;
        let size = descriptor.has_size().then_some(descriptor.size);
        self.store
            .put(&key, content, size, "application/octet-stream")
            .await
            .map_err(|e| e.in_stage(MirrorError::BlobTransfer))?;
        Ok(descriptor.clone())
    }

    async fn open_blob(&self, digest: &str) -> Result<BlobStream> {
        let data = self.store.get(&blob_key(&self.repository, digest)).await?;
        Ok(futures::stream::once(async move { Ok(data) }).boxed())
    }

    async fn manifest_exists(&self, digest: &str) -> Result<bool> {
        Ok(self
            .store
            .head(&manifest_key(&self.repository, digest))
            .await?
            .is_some())
    }

    async fn resolve_tag(&self, tag: &str) -> Result<Option<String>> {
        match self.store.get(&manifest_key(&self.repository, tag)).await {
            Ok(data) => Ok(Some(DigestUtils::compute_docker_digest(&data))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_manifest(&self, reference: &str) -> Result<ManifestPayload> {
        let data = self.store.get(&manifest_key(&self.repository, reference)).await?;
        ManifestPayload::from_response(None, data)
    }

    async fn put_manifest(&self, payload: &ManifestPayload, tags: &[String]) -> Result<String> {
        let mut references = Vec::with_capacity(tags.len() + 1);
        references.push(payload.digest.clone());
        references.extend(tags.iter().cloned());

        for reference in references {
            let data = payload.bytes.clone();
            self.store
                .put(
                    &manifest_key(&self.repository, &reference),
                    futures::stream::once(async move { Ok(data) }).boxed(),
                    Some(payload.bytes.len() as u64),
                    &payload.media_type,
                )
                .await
                .map_err(|e| e.in_stage(MirrorError::ManifestPush))?;
        }
        Ok(payload.digest.clone())
    }
}
