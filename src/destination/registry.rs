//! Registry destination: a thin pass-through to the distribution protocol

use crate::destination::{Destination, DestinationKind};
use crate::error::{MirrorError, Result};
use crate::image::{Descriptor, ManifestPayload, RepositoryKey};
use crate::logging::Logger;
use crate::registry::{BlobStream, MountOutcome, Repository};
use async_trait::async_trait;
use std::sync::Arc;

pub struct RegistryDestination {
    repository: Arc<dyn Repository>,
    output: Logger,
}

impl RegistryDestination {
    pub fn new(repository: Arc<dyn Repository>, output: Logger) -> Self {
        Self { repository, output }
    }
}

#[async_trait]
impl Destination for RegistryDestination {
    fn kind(&self) -> DestinationKind {
        DestinationKind::Registry
    }

    fn key(&self) -> &RepositoryKey {
        self.repository.key()
    }

    async fn stat_blob(&self, digest: &str) -> Result<Option<Descriptor>> {
        self.repository.stat_blob(digest).await
    }

    async fn mount_blob(&self, digest: &str, from: &RepositoryKey) -> Result<MountOutcome> {
        self.repository.mount_blob(digest, from).await
    }

    async fn create_blob(&self, descriptor: &Descriptor, source: &dyn Repository) -> Result<Descriptor> {
        if let Some(existing) = self.repository.stat_blob(&descriptor.digest).await? {
            self.output.detail(&format!(
                "Blob {} already present in {}",
                self.output.short_digest(&descriptor.digest),
                self.key()
            ));
            return Ok(existing);
        }
        let content = source.open_blob(&descriptor.digest).await?;
        self.repository.upload_blob(descriptor, content).await
    }

    async fn open_blob(&self, digest: &str) -> Result<BlobStream> {
        self.repository.open_blob(digest).await
    }

    async fn manifest_exists(&self, digest: &str) -> Result<bool> {
        self.repository.manifest_exists(digest).await
    }

    async fn resolve_tag(&self, tag: &str) -> Result<Option<String>> {
        match self.repository.resolve_tag(tag).await {
            Ok(descriptor) => Ok(Some(descriptor.digest)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_manifest(&self, reference: &str) -> Result<ManifestPayload> {
        self.repository.get_manifest(reference).await
    }

    async fn put_manifest(&self, payload: &ManifestPayload, tags: &[String]) -> Result<String> {
        if tags.is_empty() {
            return self
                .repository
                .put_manifest(payload, &payload.digest)
                .await
                .map_err(|e| e.in_stage(MirrorError::ManifestPush));
        }

        let mut digest = payload.digest.clone();
        for tag in tags {
            digest = self
                .repository
                .put_manifest(payload, tag)
                .await
                .map_err(|e| e.in_stage(MirrorError::ManifestPush))?;
        }
        Ok(digest)
    }
}
