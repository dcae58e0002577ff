//! Platform predicate applied to manifest-list children

use crate::error::Result;
use crate::image::{Descriptor, Platform};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&Platform) -> bool + Send + Sync>;

/// Decides which children of a manifest list are mirrored
#[derive(Clone)]
pub struct PlatformFilter {
    predicate: Option<Predicate>,
    description: String,
}

impl PlatformFilter {
    /// Keep every child
    pub fn all() -> Self {
        Self {
            predicate: None,
            description: "all platforms".to_string(),
        }
    }

    /// Keep children whose `os/arch[/variant]` fully matches `pattern`
    pub fn from_pattern(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(Self {
            predicate: Some(Arc::new(move |platform: &Platform| {
                regex.is_match(&platform.to_string())
            })),
            description: pattern.to_string(),
        })
    }

    pub fn from_fn<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Platform) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Some(Arc::new(predicate)),
            description: description.into(),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn accepts_all(&self) -> bool {
        self.predicate.is_none()
    }

    /// Children without platform information only pass the accept-all filter
    pub fn matches(&self, child: &Descriptor) -> bool {
        match (&self.predicate, &child.platform) {
            (None, _) => true,
            (Some(predicate), Some(platform)) => predicate(platform),
            (Some(_), None) => false,
        }
    }
}

impl Default for PlatformFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for PlatformFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformFilter")
            .field("description", &self.description)
            .finish()
    }
}
