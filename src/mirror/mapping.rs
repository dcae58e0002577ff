//! Mapping model: source → destination pairs handed to the engine
//!
//! Mappings are validated when they are built, so configuration mistakes surface
//! before any network activity.

use crate::destination::{BucketLocation, DestinationKind};
use crate::error::{MirrorError, Result};
use crate::image::ImageReference;
use std::collections::HashMap;
use std::fmt;

const OBJECT_STORE_SCHEME: &str = "s3://";

/// An immutable (source, destination, destination kind) triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub source: ImageReference,
    pub destination: ImageReference,
    pub kind: DestinationKind,
}

impl Mapping {
    pub fn new(source: ImageReference, destination: ImageReference, kind: DestinationKind) -> Result<Self> {
        if source.tag.is_none() && source.digest.is_none() {
            return Err(MirrorError::Configuration(format!(
                "source {} must specify a tag or a digest",
                source
            )));
        }
        if destination.digest.is_some() {
            let hint = if destination.tag.is_some() {
                "not both a tag and a digest"
            } else {
                "a tag, or be left blank to push by digest"
            };
            return Err(MirrorError::Configuration(format!(
                "destination {} must specify {}",
                destination, hint
            )));
        }
        if kind == DestinationKind::ObjectStore {
            BucketLocation::from_repository_key(&destination.repository_key())?;
        }
        Ok(Self {
            source,
            destination,
            kind,
        })
    }

    /// Parse a pair of references; an `s3://` destination selects the object store
    pub fn parse(source: &str, destination: &str) -> Result<Self> {
        let source = ImageReference::parse(source)?;
        let (kind, destination) = match destination.trim().strip_prefix(OBJECT_STORE_SCHEME) {
            Some(rest) => (DestinationKind::ObjectStore, rest),
            None => (DestinationKind::Registry, destination),
        };
        Self::new(source, ImageReference::parse(destination)?, kind)
    }

    /// Destination tag after inheritance: explicit tag, else the source tag unless the
    /// source is addressed by digest
    pub fn effective_tag(&self) -> Option<&str> {
        match (&self.destination.tag, &self.source.digest) {
            (Some(tag), _) => Some(tag),
            (None, Some(_)) => None,
            (None, None) => self.source.tag.as_deref(),
        }
    }

    /// Destination reference this mapping claims
    pub fn claimed_destination(&self) -> String {
        let key = self.destination.repository_key();
        match (self.effective_tag(), &self.source.digest) {
            (Some(tag), _) => format!("{}{}:{}", self.kind.scheme_prefix(), key, tag),
            (None, Some(digest)) => format!("{}{}@{}", self.kind.scheme_prefix(), key, digest),
            (None, None) => format!("{}{}", self.kind.scheme_prefix(), key),
        }
    }
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.claimed_destination())
    }
}

/// Ordered mapping list that refuses a second claim on the same destination
#[derive(Debug, Default)]
pub struct MappingSet {
    mappings: Vec<Mapping>,
    claims: HashMap<String, ImageReference>,
}

impl MappingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping. A repeated identical mapping is ignored and returns `false`;
    /// another source claiming the same destination is a configuration error.
    pub fn add(&mut self, mapping: Mapping) -> Result<bool> {
        let claimed = mapping.claimed_destination();
        if let Some(existing) = self.claims.get(&claimed) {
            if *existing == mapping.source {
                return Ok(false);
            }
            return Err(MirrorError::Configuration(format!(
                "destination {} is the target of both {} and {}",
                claimed, existing, mapping.source
            )));
        }
        self.claims.insert(claimed, mapping.source.clone());
        self.mappings.push(mapping);
        Ok(true)
    }

    /// Parse a `SRC=DST` argument and add it
    pub fn add_argument(&mut self, argument: &str) -> Result<bool> {
        let (source, destination) = argument.split_once('=').ok_or_else(|| {
            MirrorError::Configuration(format!(
                "mapping {:?} must be of the form SRC=DST",
                argument
            ))
        })?;
        self.add(Mapping::parse(source, destination)?)
    }

    /// Parse a mapping file: one `SRC=DST` or `SRC DST` per line, `#` starts a comment
    pub fn add_file_contents(&mut self, name: &str, contents: &str) -> Result<usize> {
        let mut added = 0;
        for (number, line) in contents.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let result = match fields.as_slice() {
                [single] => self.add_argument(single),
                [source, destination] => Mapping::parse(source, destination).and_then(|m| self.add(m)),
                _ => Err(MirrorError::Configuration(
                    "expected SRC DST or SRC=DST".to_string(),
                )),
            };
            match result {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => {
                    return Err(MirrorError::Configuration(format!(
                        "{}:{}: {}",
                        name,
                        number + 1,
                        e
                    )));
                }
            }
        }
        Ok(added)
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
