//! Configuration management module

use crate::error::{MirrorError, Result};
use serde::{Deserialize, Serialize};

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl AuthConfig {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(MirrorError::Configuration(
                "Username cannot be empty".to_string(),
            ));
        }
        if self.password.is_empty() {
            return Err(MirrorError::Configuration(
                "Password cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Concurrency limits for a mirror run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyLimits {
    /// Source repositories planned and copy units transferred at the same time
    pub max_registry: usize,
    /// Blob operations in flight against a single destination registry
    pub max_per_registry: usize,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            max_registry: 4,
            max_per_registry: 6,
        }
    }
}

impl ConcurrencyLimits {
    pub fn validate(&self) -> Result<()> {
        if self.max_registry == 0 || self.max_per_registry == 0 {
            return Err(MirrorError::Configuration(
                "Concurrency limits must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A bucket location that may already hold blobs, used as server-side copy source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3SourceLocation {
    /// `bucket/prefix` without leading slash
    pub path: String,
    /// Blobs are stored using the registry's filesystem layout under `path`
    pub registry_layout: bool,
}

impl S3SourceLocation {
    const STORE_SUFFIX: &'static str = "[store]";

    /// Parse `bucket/prefix` or `bucket/prefix[store]`
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let (path, registry_layout) = match value.strip_suffix(Self::STORE_SUFFIX) {
            Some(path) => (path, true),
            None => (value, false),
        };
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Err(MirrorError::Configuration(format!(
                "invalid S3 source location: {:?}",
                value
            )));
        }
        Ok(Self {
            path: path.to_string(),
            registry_layout,
        })
    }
}

/// Object store client settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// Region used when a destination does not name one
    pub region: Option<String>,
    /// Custom endpoint (MinIO, Ceph, LocalStack)
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub timeout_seconds: u64,
}

/// Options driving a mirror run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorOptions {
    /// Never attempt cross-repository mounts
    pub skip_mount: bool,
    /// Copy even when the destination already has the content
    pub force: bool,
    /// Plan only
    pub dry_run: bool,
    /// Tags missing at the source are skipped instead of failing
    pub skip_missing: bool,
    pub insecure: bool,
    pub timeout: u64,
    pub limits: ConcurrencyLimits,
    pub s3_sources: Vec<S3SourceLocation>,
    pub object_store: ObjectStoreConfig,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            skip_mount: false,
            force: false,
            dry_run: false,
            skip_missing: false,
            insecure: false,
            timeout: 300,
            limits: ConcurrencyLimits::default(),
            s3_sources: Vec::new(),
            object_store: ObjectStoreConfig::default(),
        }
    }
}

impl MirrorOptions {
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;
        if self.timeout == 0 {
            return Err(MirrorError::Configuration(
                "Timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
