//! Per-run shared state
//!
//! A [`MirrorContext`] is created for each run and passed by reference to every stage.
//! It owns the only state shared between concurrent units: the digest cache, the
//! mount-association table, the in-flight blob guards, per-registry concurrency
//! permits and run statistics. Nothing here is global, so runs can coexist.

use crate::cli::config::MirrorOptions;
use crate::destination::{
    BucketLocation, Destination, DestinationKind, ObjectStoreDestination, RegistryDestination,
};
use crate::error::{MirrorError, Result};
use crate::image::{Descriptor, ManifestPayload, RepositoryKey};
use crate::logging::Logger;
use crate::mirror::filter::PlatformFilter;
use crate::registry::{Connector, Repository};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as SyncMutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Descriptors and manifests observed during the run, keyed by digest
#[derive(Debug, Default)]
pub struct DigestCache {
    blobs: Mutex<HashMap<String, Descriptor>>,
    manifests: Mutex<HashMap<String, ManifestPayload>>,
}

impl DigestCache {
    /// First write wins, except that a sizeless placeholder is replaced by a
    /// descriptor carrying a size. Returns the stored descriptor.
    pub async fn record_blob(&self, descriptor: &Descriptor) -> Descriptor {
        let mut blobs = self.blobs.lock().await;
        match blobs.get(&descriptor.digest) {
            Some(existing) if existing.has_size() || !descriptor.has_size() => existing.clone(),
            _ => {
                blobs.insert(descriptor.digest.clone(), descriptor.clone());
                descriptor.clone()
            }
        }
    }

    pub async fn blob(&self, digest: &str) -> Option<Descriptor> {
        self.blobs.lock().await.get(digest).cloned()
    }

    pub async fn blob_snapshot(&self) -> HashMap<String, Descriptor> {
        self.blobs.lock().await.clone()
    }

    pub async fn record_manifest(&self, payload: &ManifestPayload) {
        self.manifests
            .lock()
            .await
            .entry(payload.digest.clone())
            .or_insert_with(|| payload.clone());
    }

    pub async fn manifest(&self, digest: &str) -> Option<ManifestPayload> {
        self.manifests.lock().await.get(digest).cloned()
    }
}

/// Registry → digest → a repository on that registry known to hold the blob
#[derive(Debug, Default)]
pub struct MountTable {
    entries: Mutex<HashMap<String, BTreeMap<String, RepositoryKey>>>,
}

impl MountTable {
    pub async fn record(&self, repository: &RepositoryKey, digest: &str) {
        self.entries
            .lock()
            .await
            .entry(repository.registry.clone())
            .or_default()
            .entry(digest.to_string())
            .or_insert_with(|| repository.clone());
    }

    /// A repository on `target`'s registry holding `digest`, other than `target` itself
    pub async fn candidate(&self, target: &RepositoryKey, digest: &str) -> Option<RepositoryKey> {
        self.entries
            .lock()
            .await
            .get(&target.registry)
            .and_then(|digests| digests.get(digest))
            .filter(|repository| *repository != target)
            .cloned()
    }
}

/// Counters for the end-of-run summary
#[derive(Debug, Default)]
pub struct RunStats {
    blobs_uploaded: AtomicUsize,
    blobs_mounted: AtomicUsize,
    blobs_present: AtomicUsize,
    blobs_failed: AtomicUsize,
    bytes_uploaded: AtomicU64,
    manifests_pushed: AtomicUsize,
    manifests_skipped: AtomicUsize,
}

/// Point-in-time copy of [`RunStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub blobs_uploaded: usize,
    pub blobs_mounted: usize,
    pub blobs_present: usize,
    pub blobs_failed: usize,
    pub bytes_uploaded: u64,
    pub manifests_pushed: usize,
    pub manifests_skipped: usize,
}

impl RunStats {
    pub fn blob_uploaded(&self, size: u64) {
        self.blobs_uploaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(size, Ordering::Relaxed);
    }

    pub fn blob_mounted(&self) {
        self.blobs_mounted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn blob_present(&self) {
        self.blobs_present.fetch_add(1, Ordering::Relaxed);
    }

    pub fn blob_failed(&self) {
        self.blobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn manifest_pushed(&self) {
        self.manifests_pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn manifest_skipped(&self) {
        self.manifests_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunSummary {
        RunSummary {
            blobs_uploaded: self.blobs_uploaded.load(Ordering::Relaxed),
            blobs_mounted: self.blobs_mounted.load(Ordering::Relaxed),
            blobs_present: self.blobs_present.load(Ordering::Relaxed),
            blobs_failed: self.blobs_failed.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            manifests_pushed: self.manifests_pushed.load(Ordering::Relaxed),
            manifests_skipped: self.manifests_skipped.load(Ordering::Relaxed),
        }
    }
}

type BlobKey = (RepositoryKey, String);

/// Per-(repository, digest) write locks. An entry lives only while someone holds
/// or waits for it.
#[derive(Debug, Default)]
pub struct InFlightBlobs {
    locks: SyncMutex<HashMap<BlobKey, Arc<Mutex<()>>>>,
}

impl InFlightBlobs {
    pub async fn lock(&self, repository: &RepositoryKey, digest: &str) -> InFlightBlob<'_> {
        let key = (repository.clone(), digest.to_string());
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key.clone())
            .or_default()
            .clone();
        InFlightBlob {
            owner: self,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held while one digest is being written to one repository
pub struct InFlightBlob<'a> {
    owner: &'a InFlightBlobs,
    key: BlobKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InFlightBlob<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self
            .owner
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // only the map still references the lock: nobody is waiting
        if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.key);
        }
    }
}

/// Connections keyed by repository. Each key has its own cell, so only callers
/// asking for the same repository wait on one connect.
type ConnectionCache<K, T> = Mutex<HashMap<K, Arc<OnceCell<T>>>>;

async fn connection_cell<K, T>(cache: &ConnectionCache<K, T>, key: &K) -> Arc<OnceCell<T>>
where
    K: std::hash::Hash + Eq + Clone,
{
    cache.lock().await.entry(key.clone()).or_default().clone()
}

pub struct MirrorContext {
    pub options: MirrorOptions,
    pub filter: PlatformFilter,
    pub output: Logger,
    pub cache: DigestCache,
    pub mounts: MountTable,
    pub stats: RunStats,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
    sources: ConnectionCache<RepositoryKey, Arc<dyn Repository>>,
    destinations: ConnectionCache<(DestinationKind, RepositoryKey), Arc<dyn Destination>>,
    in_flight: InFlightBlobs,
    registry_permits: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl MirrorContext {
    pub fn new(
        connector: Arc<dyn Connector>,
        options: MirrorOptions,
        filter: PlatformFilter,
        output: Logger,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            options,
            filter,
            output,
            cache: DigestCache::default(),
            mounts: MountTable::default(),
            stats: RunStats::default(),
            connector,
            cancel,
            sources: Mutex::new(HashMap::new()),
            destinations: Mutex::new(HashMap::new()),
            in_flight: InFlightBlobs::default(),
            registry_permits: Mutex::new(HashMap::new()),
        }
    }

    /// Run a blocking call, aborting it when the run is cancelled
    pub async fn guard<F, T>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MirrorError::Cancelled),
            result = operation => result,
        }
    }

    /// Source repository, connected once per run
    pub async fn source(&self, key: &RepositoryKey) -> Result<Arc<dyn Repository>> {
        let cell = connection_cell(&self.sources, key).await;
        let repository = cell
            .get_or_try_init(|| async {
                self.guard(self.connector.repository(key))
                    .await
                    .map_err(|e| e.in_stage(MirrorError::Connection))
            })
            .await?;
        Ok(repository.clone())
    }

    /// Destination backend for a repository, selected by kind once and cached
    pub async fn destination(&self, kind: DestinationKind, key: &RepositoryKey) -> Result<Arc<dyn Destination>> {
        let cell = connection_cell(&self.destinations, &(kind, key.clone())).await;
        let destination = cell
            .get_or_try_init(|| self.connect_destination(kind, key))
            .await?;
        Ok(destination.clone())
    }

    async fn connect_destination(&self, kind: DestinationKind, key: &RepositoryKey) -> Result<Arc<dyn Destination>> {
        match kind {
            DestinationKind::Registry => {
                let repository = self
                    .guard(self.connector.repository(key))
                    .await
                    .map_err(|e| e.in_stage(MirrorError::Connection))?;
                Ok(Arc::new(RegistryDestination::new(repository, self.output.clone())))
            }
            DestinationKind::ObjectStore => {
                let (location, _) = BucketLocation::from_repository_key(key)?;
                let opened = async {
                    let store = self.connector.object_store(&location).await?;
                    ObjectStoreDestination::connect(
                        key.clone(),
                        store,
                        self.options.s3_sources.clone(),
                        self.output.clone(),
                    )
                    .await
                };
                let destination = self
                    .guard(opened)
                    .await
                    .map_err(|e| e.in_stage(MirrorError::Connection))?;
                Ok(Arc::new(destination))
            }
        }
    }

    /// Exclusive right to create `digest` in `repository`. Held across the
    /// check-then-create sequence so one digest is never written twice concurrently.
    pub async fn lock_blob(&self, repository: &RepositoryKey, digest: &str) -> InFlightBlob<'_> {
        self.in_flight.lock(repository, digest).await
    }

    /// Repository and digest pairs currently being written
    pub fn blobs_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Bound on concurrent blob operations against one registry
    pub async fn registry_permit(&self, registry: &str) -> Result<OwnedSemaphorePermit> {
        let semaphore = self
            .registry_permits
            .lock()
            .await
            .entry(registry.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.options.limits.max_per_registry)))
            .clone();
        self.guard(async {
            semaphore
                .acquire_owned()
                .await
                .map_err(|e| MirrorError::BlobTransfer(format!("Failed to acquire permit: {}", e)))
        })
        .await
    }
}
