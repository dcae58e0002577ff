//! Plan: dedup bookkeeping for one run
//!
//! Organised as registry → repository. Each destination repository records which blobs
//! it already has, which are missing, the copy units that will fill it (one per source
//! repository) and the manifests to push with their tags. Entries are created lazily and
//! only ever grow. Sharing statistics are computed once, in [`Plan::finalize`], after all
//! copy intents are known.

use crate::destination::DestinationKind;
use crate::error::MappingFailure;
use crate::image::{Descriptor, ManifestPayload, RepositoryKey};
use crate::logging::Logger;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Blobs that one source repository must provide to one destination repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobCopyUnit {
    pub source: RepositoryKey,
    pub destination: RepositoryKey,
    pub kind: DestinationKind,
    /// Digests still missing at the destination
    pub pending: BTreeSet<String>,
}

impl BlobCopyUnit {
    pub fn new(source: RepositoryKey, destination: RepositoryKey, kind: DestinationKind) -> Self {
        Self {
            source,
            destination,
            kind,
            pending: BTreeSet::new(),
        }
    }

    /// Deterministic ordering key used to break ranking ties
    pub fn sort_key(&self) -> (&str, &str, &str, &str, DestinationKind) {
        (
            &self.destination.registry,
            &self.destination.repository,
            &self.source.registry,
            &self.source.repository,
            self.kind,
        )
    }

    /// Drop a digest confirmed present at the destination
    pub fn confirm(&mut self, digest: &str) {
        self.pending.remove(digest);
    }
}

/// A manifest that may be pushed to one destination repository
#[derive(Debug, Clone)]
pub struct PlannedManifest {
    pub payload: ManifestPayload,
    /// Display reference of the source the manifest came from
    pub source: String,
    /// Blobs that must be present before the push
    pub blobs: Vec<String>,
    /// Child manifests that must be pushed first (manifest lists only)
    pub children: Vec<String>,
}

/// Manifests to push into one repository: digest → tags, plus digest-only pushes
#[derive(Debug, Clone, Default)]
pub struct ManifestPlan {
    manifests: BTreeMap<String, PlannedManifest>,
    tags: BTreeMap<String, BTreeSet<String>>,
    /// Digest-only pushes; `true` when a mapping asked for it and it is reported
    digest_only: BTreeMap<String, bool>,
}

impl ManifestPlan {
    /// Register a manifest; the first registration of a digest wins
    pub fn add(&mut self, manifest: PlannedManifest) {
        self.manifests
            .entry(manifest.payload.digest.clone())
            .or_insert(manifest);
    }

    pub fn add_tags<I>(&mut self, digest: &str, tags: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.tags.entry(digest.to_string()).or_default().extend(tags);
    }

    /// Push by digest. `reported` marks pushes requested by a mapping rather than
    /// children pushed ahead of their list.
    pub fn add_digest_only(&mut self, digest: &str, reported: bool) {
        *self.digest_only.entry(digest.to_string()).or_default() |= reported;
    }

    /// Remove empty tag sets and manifests with nothing left to push
    pub fn trim(&mut self) {
        self.tags.retain(|_, tags| !tags.is_empty());
        let tags = &self.tags;
        let digest_only = &self.digest_only;
        self.manifests
            .retain(|digest, _| tags.contains_key(digest) || digest_only.contains_key(digest));
    }

    pub fn tags(&self, digest: &str) -> Vec<String> {
        self.tags
            .get(digest)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_reported_by_digest(&self, digest: &str) -> bool {
        self.digest_only.get(digest).copied().unwrap_or(false)
    }

    /// Digests in push order: image manifests before the lists that reference them
    pub fn push_order(&self) -> Vec<&PlannedManifest> {
        let (lists, images): (Vec<&PlannedManifest>, Vec<&PlannedManifest>) = self
            .manifests
            .values()
            .partition(|manifest| !manifest.children.is_empty());
        images.into_iter().chain(lists).collect()
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryStats {
    /// Blobs referenced by content copied into this repository
    pub blobs: usize,
    /// Of those, blobs also referenced by another repository in the same registry
    pub shared: usize,
    pub unique: usize,
    pub shared_bytes: u64,
    pub unique_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct RepositoryPlan {
    pub key: RepositoryKey,
    pub kind: DestinationKind,
    pub existing_blobs: BTreeSet<String>,
    pub absent_blobs: BTreeSet<String>,
    pub units: Vec<BlobCopyUnit>,
    pub manifests: ManifestPlan,
    pub errors: Vec<MappingFailure>,
    pub stats: RepositoryStats,
}

impl RepositoryPlan {
    fn new(key: RepositoryKey, kind: DestinationKind) -> Self {
        Self {
            key,
            kind,
            existing_blobs: BTreeSet::new(),
            absent_blobs: BTreeSet::new(),
            units: Vec::new(),
            manifests: ManifestPlan::default(),
            errors: Vec::new(),
            stats: RepositoryStats::default(),
        }
    }

    /// Record the outcome of a blob existence check; an existing blob is never pending
    pub fn record_blob(&mut self, source: &RepositoryKey, digest: &str, exists: bool) {
        if exists || self.existing_blobs.contains(digest) {
            self.absent_blobs.remove(digest);
            self.existing_blobs.insert(digest.to_string());
            for unit in &mut self.units {
                unit.confirm(digest);
            }
            return;
        }
        self.absent_blobs.insert(digest.to_string());
        self.unit_mut(source).pending.insert(digest.to_string());
    }

    /// Copy unit fed by `source`, created on first use
    pub fn unit_mut(&mut self, source: &RepositoryKey) -> &mut BlobCopyUnit {
        let position = match self.units.iter().position(|unit| &unit.source == source) {
            Some(position) => position,
            None => {
                self.units
                    .push(BlobCopyUnit::new(source.clone(), self.key.clone(), self.kind));
                self.units.len() - 1
            }
        };
        &mut self.units[position]
    }

    fn referenced_blobs(&self) -> impl Iterator<Item = &String> {
        self.existing_blobs.iter().chain(self.absent_blobs.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub repositories: usize,
    pub blobs: usize,
    pub shared_blobs: usize,
    pub bytes: u64,
    pub shared_bytes: u64,
    pub manifests: usize,
}

#[derive(Debug, Clone)]
pub struct RegistryPlan {
    pub name: String,
    pub kind: DestinationKind,
    pub repositories: BTreeMap<String, RepositoryPlan>,
    pub stats: RegistryStats,
}

#[derive(Debug, Default)]
pub struct Plan {
    registries: BTreeMap<(DestinationKind, String), RegistryPlan>,
    failures: Vec<MappingFailure>,
    finalized: bool,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repository_mut(&mut self, kind: DestinationKind, key: &RepositoryKey) -> &mut RepositoryPlan {
        let registry = self
            .registries
            .entry((kind, key.registry.clone()))
            .or_insert_with(|| RegistryPlan {
                name: key.registry.clone(),
                kind,
                repositories: BTreeMap::new(),
                stats: RegistryStats::default(),
            });
        registry
            .repositories
            .entry(key.repository.clone())
            .or_insert_with(|| RepositoryPlan::new(key.clone(), kind))
    }

    pub fn repository(&self, kind: DestinationKind, key: &RepositoryKey) -> Option<&RepositoryPlan> {
        self.registries
            .get(&(kind, key.registry.clone()))
            .and_then(|registry| registry.repositories.get(&key.repository))
    }

    /// Record a failure not tied to one destination repository
    pub fn record_failure(&mut self, failure: MappingFailure) {
        self.failures.push(failure);
    }

    pub fn registries(&self) -> impl Iterator<Item = &RegistryPlan> {
        self.registries.values()
    }

    pub fn repositories(&self) -> impl Iterator<Item = &RepositoryPlan> {
        self.registries
            .values()
            .flat_map(|registry| registry.repositories.values())
    }

    /// Every copy unit with pending blobs, in deterministic order
    pub fn copy_units(&self) -> Vec<BlobCopyUnit> {
        debug_assert!(self.finalized, "copy units requested before finalize");
        self.repositories()
            .flat_map(|repository| repository.units.iter())
            .filter(|unit| !unit.pending.is_empty())
            .cloned()
            .collect()
    }

    /// Run-level failures followed by per-repository errors
    pub fn failures(&self) -> Vec<MappingFailure> {
        let mut failures = self.failures.clone();
        failures.extend(self.repositories().flat_map(|r| r.errors.iter().cloned()));
        failures
    }

    /// Trim manifest plans and compute sharing statistics. `descriptors` supplies
    /// blob sizes; unknown sizes count as zero.
    pub fn finalize(&mut self, descriptors: &HashMap<String, Descriptor>) {
        let size_of = |digest: &str| descriptors.get(digest).map(|d| d.size).unwrap_or(0);

        for registry in self.registries.values_mut() {
            let mut references: HashMap<&str, usize> = HashMap::new();
            for repository in registry.repositories.values() {
                for digest in repository.referenced_blobs() {
                    *references.entry(digest.as_str()).or_default() += 1;
                }
            }

            let mut stats = RegistryStats {
                repositories: registry.repositories.len(),
                blobs: references.len(),
                ..RegistryStats::default()
            };
            for (digest, count) in &references {
                stats.bytes += size_of(digest);
                if *count > 1 {
                    stats.shared_blobs += 1;
                    stats.shared_bytes += size_of(digest);
                }
            }

            let mut repository_stats = Vec::with_capacity(registry.repositories.len());
            for repository in registry.repositories.values() {
                let mut repo = RepositoryStats::default();
                for digest in repository.referenced_blobs() {
                    repo.blobs += 1;
                    if references.get(digest.as_str()).copied().unwrap_or(0) > 1 {
                        repo.shared += 1;
                        repo.shared_bytes += size_of(digest);
                    } else {
                        repo.unique += 1;
                        repo.unique_bytes += size_of(digest);
                    }
                }
                repository_stats.push(repo);
            }

            for (repository, repo_stats) in registry.repositories.values_mut().zip(repository_stats) {
                repository.manifests.trim();
                repository.stats = repo_stats;
                stats.manifests += repository.manifests.len();
            }
            registry.stats = stats;
        }
        self.finalized = true;
    }

    /// Print the plan tree to the log
    pub fn print(&self, output: &Logger, phases: usize) {
        output.section("Mirror plan");
        for registry in self.registries() {
            output.subsection(&format!(
                "{}{} ({} repositories)",
                registry.kind.scheme_prefix(),
                registry.name,
                registry.stats.repositories
            ));
            output.info(&format!(
                "{} blobs ({}), {} shared ({})",
                registry.stats.blobs,
                output.format_size(registry.stats.bytes),
                registry.stats.shared_blobs,
                output.format_size(registry.stats.shared_bytes)
            ));
            for repository in registry.repositories.values() {
                output.step(&repository.key.repository);
                output.detail(&format!(
                    "blobs: {} to copy, {} present, {} shared ({}), {} unique ({})",
                    repository.absent_blobs.len(),
                    repository.existing_blobs.len(),
                    repository.stats.shared,
                    output.format_size(repository.stats.shared_bytes),
                    repository.stats.unique,
                    output.format_size(repository.stats.unique_bytes)
                ));
                for manifest in repository.manifests.push_order() {
                    let digest = &manifest.payload.digest;
                    let tags = repository.manifests.tags(digest);
                    let target = if tags.is_empty() {
                        "(by digest)".to_string()
                    } else {
                        tags.join(", ")
                    };
                    output.detail(&format!("manifest {} -> {}", output.short_digest(digest), target));
                }
            }
        }
        output.info(&format!("{} transfer phase(s)", phases));
    }
}
