//! Target tree: mappings grouped by source repository
//!
//! ```text
//! source repository
//!   ├─ tag "latest"       → { (kind, destination repository) → {tags} }
//!   └─ digest "sha256:…"  → { (kind, destination repository) → {tags} }
//! ```
//!
//! Every level is an ordered map or set, so the tree built from any permutation of
//! the same mappings is identical.

use crate::destination::DestinationKind;
use crate::image::RepositoryKey;
use crate::mirror::mapping::Mapping;
use std::collections::{BTreeMap, BTreeSet};

/// Destination repositories of one source tag or digest, with the tags to push there.
/// An empty tag set means a digest-only push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationSet {
    entries: BTreeMap<(DestinationKind, RepositoryKey), BTreeSet<String>>,
}

impl DestinationSet {
    /// Idempotent: re-inserting a known destination or tag changes nothing
    pub fn insert(&mut self, kind: DestinationKind, key: RepositoryKey, tag: Option<&str>) {
        let tags = self.entries.entry((kind, key)).or_default();
        if let Some(tag) = tag {
            tags.insert(tag.to_string());
        }
    }

    /// Fold another set into this one
    pub fn merge(&mut self, other: &DestinationSet) {
        for ((kind, key), tags) in &other.entries {
            self.entries
                .entry((*kind, key.clone()))
                .or_default()
                .extend(tags.iter().cloned());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (DestinationKind, &RepositoryKey, &BTreeSet<String>)> {
        self.entries.iter().map(|((kind, key), tags)| (*kind, key, tags))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All requested copies out of one source repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub source: RepositoryKey,
    pub tags: BTreeMap<String, DestinationSet>,
    pub digests: BTreeMap<String, DestinationSet>,
}

impl SourceUnit {
    fn new(source: RepositoryKey) -> Self {
        Self {
            source,
            tags: BTreeMap::new(),
            digests: BTreeMap::new(),
        }
    }

    /// Display form of a reference inside the source repository
    pub fn reference(&self, tag_or_digest: &str) -> String {
        let separator = if tag_or_digest.contains(':') { "@" } else { ":" };
        format!("{}{}{}", self.source, separator, tag_or_digest)
    }

    pub fn destination_count(&self) -> usize {
        self.tags
            .values()
            .chain(self.digests.values())
            .map(DestinationSet::len)
            .sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetTree {
    units: BTreeMap<RepositoryKey, SourceUnit>,
}

impl TargetTree {
    pub fn build(mappings: &[Mapping]) -> Self {
        let mut units: BTreeMap<RepositoryKey, SourceUnit> = BTreeMap::new();
        for mapping in mappings {
            let source = mapping.source.repository_key();
            let unit = units
                .entry(source.clone())
                .or_insert_with(|| SourceUnit::new(source));

            let destinations = match (&mapping.source.digest, &mapping.source.tag) {
                (Some(digest), _) => unit.digests.entry(digest.clone()).or_default(),
                (None, Some(tag)) => unit.tags.entry(tag.clone()).or_default(),
                // rejected when the mapping was built
                (None, None) => continue,
            };
            destinations.insert(
                mapping.kind,
                mapping.destination.repository_key(),
                mapping.effective_tag(),
            );
        }
        Self { units }
    }

    pub fn units(&self) -> impl Iterator<Item = &SourceUnit> {
        self.units.values()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
