//! Registry module for Docker Registry HTTP API v2 interactions
//!
//! [`Repository`] is the subset of the distribution protocol the mirror consumes:
//! manifest get/put, tag resolution, blob stat/get/upload and cross-repository mount.
//! [`client::RegistryClient`] implements it over HTTP; [`connector::Connector`] hands out
//! repositories and object-store buckets to the engine.

pub mod client;
pub mod connector;
pub mod operations;

pub use client::{RegistryClient, RegistryClientBuilder};
pub use connector::{Connector, DefaultConnector};

use crate::error::Result;
use crate::image::{Descriptor, ManifestPayload, RepositoryKey};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Streamed blob content
pub type BlobStream = BoxStream<'static, Result<Bytes>>;

/// Result of a cross-repository mount attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOutcome {
    /// The registry attached the blob; carries the descriptor it reported
    Mounted(Descriptor),
    /// The registry declined the mount and opened a regular upload instead
    NotMounted,
}

/// One repository on a registry, as seen through the distribution protocol
#[async_trait]
pub trait Repository: Send + Sync {
    fn key(&self) -> &RepositoryKey;

    /// Resolve a tag to the descriptor of the manifest it points at
    async fn resolve_tag(&self, tag: &str) -> Result<Descriptor>;

    /// Fetch a manifest by tag or digest
    async fn get_manifest(&self, reference: &str) -> Result<ManifestPayload>;

    async fn manifest_exists(&self, digest: &str) -> Result<bool>;

    /// Store a manifest under a tag or its digest, returning the stored digest
    async fn put_manifest(&self, payload: &ManifestPayload, reference: &str) -> Result<String>;

    /// Descriptor of a blob if the repository already has it
    async fn stat_blob(&self, digest: &str) -> Result<Option<Descriptor>>;

    async fn open_blob(&self, digest: &str) -> Result<BlobStream>;

    /// Attach a blob that lives in another repository of the same registry
    async fn mount_blob(&self, digest: &str, from: &RepositoryKey) -> Result<MountOutcome>;

    /// Upload blob content; the registry verifies it against `descriptor.digest`
    async fn upload_blob(&self, descriptor: &Descriptor, content: BlobStream) -> Result<Descriptor>;
}
