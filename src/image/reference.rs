//! Image reference parsing
//!
//! Handles Docker-style image references:
//! - `ubuntu` → `docker.io/library/ubuntu`
//! - `ghcr.io/org/app:v1` → registry `ghcr.io`, repository `org/app`, tag `v1`
//! - `quay.io/org/app@sha256:…` → digest reference
//!
//! Unlike a pull reference, no default tag is filled in: whether a tag is present
//! matters to the mapping rules.

use crate::error::{MirrorError, Result};
use crate::image::digest::DigestUtils;
use std::fmt;

const DEFAULT_REGISTRY: &str = "docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library";

/// The unit of content namespace identity: (registry, repository path)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepositoryKey {
    pub registry: String,
    pub repository: String,
}

impl RepositoryKey {
    pub fn new(registry: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
        }
    }
}

impl fmt::Display for RepositoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)
    }
}

/// A parsed image reference: registry host, repository path, tag and/or digest
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parses an image reference string.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(MirrorError::Configuration("empty image reference".into()));
        }

        let (name, digest) = match trimmed.split_once('@') {
            Some((name, digest)) => {
                if !DigestUtils::is_valid_docker_digest(digest) {
                    return Err(MirrorError::Configuration(format!(
                        "invalid digest in reference {}: {}",
                        trimmed, digest
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (trimmed, None),
        };

        let (registry, remainder) = match name.split_once('/') {
            Some((first, rest)) if is_registry_host(first) => (first.to_string(), rest.to_string()),
            _ => {
                let repo = if name.contains('/') {
                    name.to_string()
                } else {
                    format!("{}/{}", OFFICIAL_REPO_PREFIX, name)
                };
                (DEFAULT_REGISTRY.to_string(), repo)
            }
        };

        // A colon after the last slash separates the tag
        let (repository, tag) = match remainder.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), Some(tag.to_string())),
            _ => (remainder, None),
        };

        if repository.is_empty() {
            return Err(MirrorError::Configuration(format!(
                "missing repository in reference {}",
                trimmed
            )));
        }
        if let Some(tag) = &tag {
            if !is_valid_tag(tag) {
                return Err(MirrorError::Configuration(format!(
                    "invalid tag in reference {}: {}",
                    trimmed, tag
                )));
            }
        }
        if repository
            .chars()
            .any(|c| c.is_ascii_uppercase() || c.is_whitespace())
        {
            return Err(MirrorError::Configuration(format!(
                "repository name must be lowercase: {}",
                repository
            )));
        }

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    pub fn repository_key(&self) -> RepositoryKey {
        RepositoryKey::new(self.registry.clone(), self.repository.clone())
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= 128
        && tag
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}
