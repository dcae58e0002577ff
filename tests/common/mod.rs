//! In-memory registries and buckets shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use registry_mirror::cli::config::MirrorOptions;
use registry_mirror::destination::{BucketLocation, ObjectStore};
use registry_mirror::error::{MirrorError, Result};
use registry_mirror::image::manifest::{DOCKER_MANIFEST_LIST_V2, DOCKER_MANIFEST_V2};
use registry_mirror::image::{Descriptor, DigestUtils, ManifestPayload, Manifest, RepositoryKey};
use registry_mirror::logging::Logger;
use registry_mirror::mirror::{Mapping, MirrorContext, PlatformFilter};
use registry_mirror::registry::{BlobStream, Connector, MountOutcome, Repository};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";

/// A blob with its descriptor
#[derive(Debug, Clone)]
pub struct TestBlob {
    pub descriptor: Descriptor,
    pub data: Bytes,
}

impl TestBlob {
    pub fn new(data: impl Into<Bytes>, media_type: &str) -> Self {
        let data = data.into();
        Self {
            descriptor: Descriptor::new(
                DigestUtils::compute_docker_digest(&data),
                data.len() as u64,
                media_type,
            ),
            data,
        }
    }

    pub fn digest(&self) -> &str {
        &self.descriptor.digest
    }
}

/// An image manifest together with the blobs it references
#[derive(Debug, Clone)]
pub struct TestImage {
    pub manifest: ManifestPayload,
    pub blobs: Vec<TestBlob>,
}

impl TestImage {
    /// Image whose config and layer contents are derived from `name`
    pub fn new(name: &str, layers: &[&str]) -> Self {
        let config = TestBlob::new(format!("{{\"config\":\"{}\"}}", name), CONFIG_MEDIA_TYPE);
        let layers: Vec<TestBlob> = layers
            .iter()
            .map(|layer| TestBlob::new(format!("layer:{}", layer), LAYER_MEDIA_TYPE))
            .collect();
        let body = json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST_V2,
            "config": config.descriptor,
            "layers": layers.iter().map(|l| &l.descriptor).collect::<Vec<_>>(),
        });
        let manifest = ManifestPayload::new(
            DOCKER_MANIFEST_V2,
            serde_json::to_vec(&body).expect("serialize manifest"),
        );
        let mut blobs = vec![config];
        blobs.extend(layers);
        Self { manifest, blobs }
    }

    pub fn digest(&self) -> &str {
        &self.manifest.digest
    }
}

/// A manifest list over per-platform images
#[derive(Debug, Clone)]
pub struct TestIndex {
    pub manifest: ManifestPayload,
    pub children: Vec<TestImage>,
}

impl TestIndex {
    /// `children` pairs an image with `os/arch`
    pub fn new(children: Vec<(TestImage, &str)>) -> Self {
        let entries: Vec<_> = children
            .iter()
            .map(|(image, platform)| {
                let (os, architecture) = platform.split_once('/').expect("os/arch");
                json!({
                    "mediaType": DOCKER_MANIFEST_V2,
                    "size": image.manifest.bytes.len(),
                    "digest": image.digest(),
                    "platform": {"os": os, "architecture": architecture},
                })
            })
            .collect();
        let body = json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST_LIST_V2,
            "manifests": entries,
        });
        let manifest = ManifestPayload::new(
            DOCKER_MANIFEST_LIST_V2,
            serde_json::to_vec(&body).expect("serialize manifest list"),
        );
        Self {
            manifest,
            children: children.into_iter().map(|(image, _)| image).collect(),
        }
    }

    pub fn digest(&self) -> &str {
        &self.manifest.digest
    }
}

#[derive(Debug, Default)]
struct RepositoryState {
    blobs: HashMap<String, Bytes>,
    manifests: HashMap<String, ManifestPayload>,
    tags: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    repositories: HashMap<String, RepositoryState>,
    /// (repository, digest) of every completed upload
    uploads: Vec<(String, String)>,
    /// (repository, reference) of every manifest put
    manifest_puts: Vec<(String, String)>,
    mounts: Vec<(String, String)>,
    active_uploads: HashSet<(String, String)>,
    overlapping_uploads: usize,
    failing_blobs: HashSet<String>,
    mismatched_mounts: bool,
    mount_disabled: bool,
    mount_failure: Option<MirrorError>,
    active_stats: usize,
    peak_stats: usize,
}

/// A registry holding all of its repositories in memory
#[derive(Debug, Clone)]
pub struct MemoryRegistry {
    name: String,
    state: Arc<Mutex<RegistryState>>,
    upload_delay: Duration,
    stat_delay: Duration,
}

impl MemoryRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::default(),
            upload_delay: Duration::from_millis(5),
            stat_delay: Duration::ZERO,
        }
    }

    /// How long each upload takes to complete
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    /// How long each blob existence check takes
    pub fn with_stat_delay(mut self, delay: Duration) -> Self {
        self.stat_delay = delay;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Largest number of blob existence checks that were in progress at once
    pub fn peak_concurrent_stats(&self) -> usize {
        self.state.lock().unwrap().peak_stats
    }

    pub fn key(&self, repository: &str) -> RepositoryKey {
        RepositoryKey::new(self.name.clone(), repository)
    }

    pub fn add_blob(&self, repository: &str, blob: &TestBlob) {
        let mut state = self.state.lock().unwrap();
        state
            .repositories
            .entry(repository.to_string())
            .or_default()
            .blobs
            .insert(blob.digest().to_string(), blob.data.clone());
    }

    pub fn add_manifest(&self, repository: &str, manifest: &ManifestPayload, tag: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        let repo = state.repositories.entry(repository.to_string()).or_default();
        repo.manifests.insert(manifest.digest.clone(), manifest.clone());
        if let Some(tag) = tag {
            repo.tags.insert(tag.to_string(), manifest.digest.clone());
        }
    }

    /// Answer requests for `digest` with another manifest's bytes
    pub fn serve_manifest_as(&self, repository: &str, digest: &str, manifest: &ManifestPayload) {
        let mut state = self.state.lock().unwrap();
        let repo = state.repositories.entry(repository.to_string()).or_default();
        repo.manifests.insert(digest.to_string(), manifest.clone());
    }

    pub fn add_image(&self, repository: &str, image: &TestImage, tag: Option<&str>) {
        for blob in &image.blobs {
            self.add_blob(repository, blob);
        }
        self.add_manifest(repository, &image.manifest, tag);
    }

    pub fn add_index(&self, repository: &str, index: &TestIndex, tag: Option<&str>) {
        for child in &index.children {
            self.add_image(repository, child, None);
        }
        self.add_manifest(repository, &index.manifest, tag);
    }

    pub fn has_blob(&self, repository: &str, digest: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .repositories
            .get(repository)
            .is_some_and(|repo| repo.blobs.contains_key(digest))
    }

    pub fn has_manifest(&self, repository: &str, digest: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .repositories
            .get(repository)
            .is_some_and(|repo| repo.manifests.contains_key(digest))
    }

    pub fn tag(&self, repository: &str, tag: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .repositories
            .get(repository)
            .and_then(|repo| repo.tags.get(tag).cloned())
    }

    pub fn manifest(&self, repository: &str, digest: &str) -> Option<ManifestPayload> {
        let state = self.state.lock().unwrap();
        state
            .repositories
            .get(repository)
            .and_then(|repo| repo.manifests.get(digest).cloned())
    }

    pub fn upload_count(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    pub fn uploads_of(&self, repository: &str, digest: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .uploads
            .iter()
            .filter(|(repo, d)| repo == repository && d == digest)
            .count()
    }

    pub fn manifest_put_count(&self) -> usize {
        self.state.lock().unwrap().manifest_puts.len()
    }

    pub fn mount_count(&self) -> usize {
        self.state.lock().unwrap().mounts.len()
    }

    pub fn overlapping_uploads(&self) -> usize {
        self.state.lock().unwrap().overlapping_uploads
    }

    /// Uploads of `digest` fail
    pub fn fail_uploads_of(&self, digest: &str) {
        self.state.lock().unwrap().failing_blobs.insert(digest.to_string());
    }

    /// Mounts succeed but report a different digest
    pub fn mismatch_mounts(&self) {
        self.state.lock().unwrap().mismatched_mounts = true;
    }

    /// Mount requests are answered with a regular upload session
    pub fn decline_mounts(&self) {
        self.state.lock().unwrap().mount_disabled = true;
    }

    /// Mounts fail with `error`. An `AlreadyExists` failure still leaves the blob in
    /// the target repository, as when another writer created it first.
    pub fn fail_mounts(&self, error: MirrorError) {
        self.state.lock().unwrap().mount_failure = Some(error);
    }

    pub fn repository(&self, name: &str) -> MemoryRepository {
        MemoryRepository {
            key: self.key(name),
            registry: self.clone(),
        }
    }
}

pub struct MemoryRepository {
    key: RepositoryKey,
    registry: MemoryRegistry,
}

impl MemoryRepository {
    fn name(&self) -> &str {
        &self.key.repository
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut RegistryState) -> T) -> T {
        let mut state = self.registry.state.lock().unwrap();
        f(&mut state)
    }
}

fn not_found(what: &str) -> MirrorError {
    MirrorError::NotFound(what.to_string())
}

#[async_trait]
impl Repository for MemoryRepository {
    fn key(&self) -> &RepositoryKey {
        &self.key
    }

    async fn resolve_tag(&self, tag: &str) -> Result<Descriptor> {
        self.with_state(|state| {
            let repo = state
                .repositories
                .get(self.name())
                .ok_or_else(|| not_found(tag))?;
            let digest = repo.tags.get(tag).ok_or_else(|| not_found(tag))?;
            let manifest = repo.manifests.get(digest).ok_or_else(|| not_found(digest))?;
            Ok(manifest.descriptor())
        })
    }

    async fn get_manifest(&self, reference: &str) -> Result<ManifestPayload> {
        self.with_state(|state| {
            let repo = state
                .repositories
                .get(self.name())
                .ok_or_else(|| not_found(reference))?;
            let digest = match repo.tags.get(reference) {
                Some(digest) => digest.clone(),
                None => reference.to_string(),
            };
            repo.manifests
                .get(&digest)
                .cloned()
                .ok_or_else(|| not_found(reference))
        })
    }

    async fn manifest_exists(&self, digest: &str) -> Result<bool> {
        Ok(self.with_state(|state| {
            state
                .repositories
                .get(self.name())
                .is_some_and(|repo| repo.manifests.contains_key(digest))
        }))
    }

    async fn put_manifest(&self, payload: &ManifestPayload, reference: &str) -> Result<String> {
        let name = self.name().to_string();
        self.with_state(|state| {
            let repo = state.repositories.entry(name.clone()).or_default();
            match payload.decode()? {
                Manifest::Image(_) => {
                    let blobs = payload.decode()?.blobs();
                    if let Some(missing) = blobs.iter().find(|b| !repo.blobs.contains_key(&b.digest)) {
                        return Err(MirrorError::Http {
                            status: 400,
                            message: format!("BLOB_UNKNOWN {}", missing.digest),
                        });
                    }
                }
                Manifest::List(list) => {
                    if let Some(missing) = list
                        .manifests
                        .iter()
                        .find(|child| !repo.manifests.contains_key(&child.digest))
                    {
                        return Err(MirrorError::Http {
                            status: 400,
                            message: format!("MANIFEST_UNKNOWN {}", missing.digest),
                        });
                    }
                }
            }
            repo.manifests.insert(payload.digest.clone(), payload.clone());
            if reference != payload.digest {
                repo.tags.insert(reference.to_string(), payload.digest.clone());
            }
            state.manifest_puts.push((name.clone(), reference.to_string()));
            Ok(payload.digest.clone())
        })
    }

    async fn stat_blob(&self, digest: &str) -> Result<Option<Descriptor>> {
        if !self.registry.stat_delay.is_zero() {
            self.with_state(|state| {
                state.active_stats += 1;
                state.peak_stats = state.peak_stats.max(state.active_stats);
            });
            tokio::time::sleep(self.registry.stat_delay).await;
            self.with_state(|state| state.active_stats -= 1);
        }
        Ok(self.with_state(|state| {
            state
                .repositories
                .get(self.name())
                .and_then(|repo| repo.blobs.get(digest))
                .map(|data| Descriptor::new(digest, data.len() as u64, ""))
        }))
    }

    async fn open_blob(&self, digest: &str) -> Result<BlobStream> {
        let data = self.with_state(|state| {
            state
                .repositories
                .get(self.name())
                .and_then(|repo| repo.blobs.get(digest).cloned())
                .ok_or_else(|| not_found(digest))
        })?;
        // two chunks, so consumers have to reassemble
        let split = data.len() / 2;
        let chunks = vec![Ok(data.slice(..split)), Ok(data.slice(split..))];
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn mount_blob(&self, digest: &str, from: &RepositoryKey) -> Result<MountOutcome> {
        let name = self.name().to_string();
        self.with_state(|state| {
            if state.mount_disabled {
                return Ok(MountOutcome::NotMounted);
            }
            let data = match state
                .repositories
                .get(&from.repository)
                .and_then(|repo| repo.blobs.get(digest).cloned())
            {
                Some(data) => data,
                None => return Ok(MountOutcome::NotMounted),
            };
            if let Some(error) = state.mount_failure.clone() {
                if error.is_already_exists() {
                    state
                        .repositories
                        .entry(name.clone())
                        .or_default()
                        .blobs
                        .insert(digest.to_string(), data);
                }
                return Err(error);
            }
            let reported = if state.mismatched_mounts {
                DigestUtils::compute_docker_digest(b"something else")
            } else {
                digest.to_string()
            };
            let size = data.len() as u64;
            state
                .repositories
                .entry(name.clone())
                .or_default()
                .blobs
                .insert(digest.to_string(), data);
            state.mounts.push((name.clone(), digest.to_string()));
            Ok(MountOutcome::Mounted(Descriptor::new(reported, size, "")))
        })
    }

    async fn upload_blob(&self, descriptor: &Descriptor, mut content: BlobStream) -> Result<Descriptor> {
        let key = (self.name().to_string(), descriptor.digest.clone());
        self.with_state(|state| {
            if !state.active_uploads.insert(key.clone()) {
                state.overlapping_uploads += 1;
            }
        });

        let mut data = Vec::new();
        let mut read_error = None;
        while let Some(chunk) = content.next().await {
            match chunk {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            }
        }
        tokio::time::sleep(self.registry.upload_delay).await;

        self.with_state(|state| {
            state.active_uploads.remove(&key);
            if let Some(e) = read_error {
                return Err(e);
            }
            if state.failing_blobs.contains(&descriptor.digest) {
                return Err(MirrorError::Http {
                    status: 500,
                    message: format!("upload of {} failed", descriptor.digest),
                });
            }
            let actual = DigestUtils::compute_docker_digest(&data);
            if actual != descriptor.digest {
                return Err(MirrorError::Http {
                    status: 400,
                    message: format!("DIGEST_INVALID {}", actual),
                });
            }
            let size = data.len() as u64;
            state
                .repositories
                .entry(key.0.clone())
                .or_default()
                .blobs
                .insert(actual.clone(), Bytes::from(data));
            state.uploads.push(key.clone());
            Ok(Descriptor::new(actual, size, descriptor.media_type.clone()))
        })
    }
}

#[derive(Debug, Default)]
struct BucketState {
    objects: HashMap<String, Bytes>,
    puts: Vec<String>,
    copies: Vec<(String, String)>,
    copy_attempts: usize,
}

/// A bucket plus the foreign objects reachable through server-side copy
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    bucket: String,
    state: Arc<Mutex<BucketState>>,
    foreign: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            state: Arc::default(),
            foreign: Arc::default(),
        }
    }

    /// Make `data` available for copying as `bucket/key`
    pub fn add_foreign_object(&self, path: &str, data: Bytes) {
        self.foreign.lock().unwrap().insert(path.to_string(), data);
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.state.lock().unwrap().objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn put_count(&self) -> usize {
        self.state.lock().unwrap().puts.len()
    }

    pub fn puts(&self) -> Vec<String> {
        self.state.lock().unwrap().puts.clone()
    }

    pub fn copies(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().copies.clone()
    }

    pub fn copy_attempts(&self) -> usize {
        self.state.lock().unwrap().copy_attempts
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head(&self, key: &str) -> Result<Option<u64>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .objects
            .get(key)
            .map(|data| data.len() as u64))
    }

    async fn copy(&self, source: &str, key: &str) -> Result<()> {
        let found = self.foreign.lock().unwrap().get(source).cloned();
        let mut state = self.state.lock().unwrap();
        state.copy_attempts += 1;
        match found {
            Some(data) => {
                state.objects.insert(key.to_string(), data);
                state.copies.push((source.to_string(), key.to_string()));
                Ok(())
            }
            None => Err(not_found(source)),
        }
    }

    async fn put(&self, key: &str, mut body: BlobStream, _size: Option<u64>, _content_type: &str) -> Result<()> {
        let mut data = Vec::new();
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk?);
        }
        let mut state = self.state.lock().unwrap();
        state.objects.insert(key.to_string(), Bytes::from(data));
        state.puts.push(key.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| not_found(key))
    }
}

/// Hands out in-memory registries and buckets; unknown hosts are unreachable
#[derive(Default)]
pub struct MemoryConnector {
    registries: HashMap<String, MemoryRegistry>,
    buckets: HashMap<String, MemoryObjectStore>,
    connections: Mutex<usize>,
    connect_delay: Duration,
    /// (in progress, most seen at once)
    concurrent_connects: Mutex<(usize, usize)>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(mut self, registry: &MemoryRegistry) -> Self {
        self.registries
            .insert(registry.name().to_string(), registry.clone());
        self
    }

    pub fn with_bucket(mut self, store: &MemoryObjectStore) -> Self {
        self.buckets.insert(store.bucket.clone(), store.clone());
        self
    }

    /// Every repository connect takes `delay`
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn connections(&self) -> usize {
        *self.connections.lock().unwrap()
    }

    /// Largest number of repository connects that were in progress at once
    pub fn peak_concurrent_connects(&self) -> usize {
        self.concurrent_connects.lock().unwrap().1
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn repository(&self, key: &RepositoryKey) -> Result<Arc<dyn Repository>> {
        *self.connections.lock().unwrap() += 1;
        if !self.connect_delay.is_zero() {
            {
                let mut connects = self.concurrent_connects.lock().unwrap();
                connects.0 += 1;
                connects.1 = connects.1.max(connects.0);
            }
            tokio::time::sleep(self.connect_delay).await;
            self.concurrent_connects.lock().unwrap().0 -= 1;
        }
        match self.registries.get(&key.registry) {
            Some(registry) => Ok(Arc::new(registry.repository(&key.repository))),
            None => Err(MirrorError::Connection(format!(
                "{} is unreachable",
                key.registry
            ))),
        }
    }

    async fn object_store(&self, location: &BucketLocation) -> Result<Arc<dyn ObjectStore>> {
        match self.buckets.get(&location.bucket) {
            Some(store) => Ok(Arc::new(store.clone())),
            None => Err(MirrorError::Connection(format!(
                "bucket {} is unreachable",
                location
            ))),
        }
    }
}

pub fn options() -> MirrorOptions {
    MirrorOptions::default()
}

pub fn context(connector: MemoryConnector, options: MirrorOptions) -> MirrorContext {
    context_with(connector, options, PlatformFilter::all(), CancellationToken::new())
}

pub fn context_with(
    connector: MemoryConnector,
    options: MirrorOptions,
    filter: PlatformFilter,
    cancel: CancellationToken,
) -> MirrorContext {
    MirrorContext::new(Arc::new(connector), options, filter, Logger::new_quiet(), cancel)
}

/// Context over a connector the test keeps a handle to
pub fn shared_context(connector: Arc<MemoryConnector>, options: MirrorOptions) -> MirrorContext {
    MirrorContext::new(
        connector,
        options,
        PlatformFilter::all(),
        Logger::new_quiet(),
        CancellationToken::new(),
    )
}

pub fn mapping(source: &str, destination: &str) -> Mapping {
    Mapping::parse(source, destination).expect("valid mapping")
}
