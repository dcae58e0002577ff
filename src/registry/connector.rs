//! Connection factory for registries and object stores
//!
//! The engine never builds clients itself. It asks a [`Connector`] for a repository
//! or a bucket, which keeps the executor testable against in-memory fakes.

use crate::cli::config::{AuthConfig, ObjectStoreConfig};
use crate::destination::{BucketLocation, ObjectStore, S3ObjectStore};
use crate::error::{MirrorError, Result};
use crate::image::RepositoryKey;
use crate::logging::Logger;
use crate::registry::{RegistryClient, Repository};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a repository on a registry, failing with a connection error if unreachable
    async fn repository(&self, key: &RepositoryKey) -> Result<Arc<dyn Repository>>;

    /// Open the bucket backing an object-store destination
    async fn object_store(&self, location: &BucketLocation) -> Result<Arc<dyn ObjectStore>>;
}

type ClientCell<T> = Arc<OnceCell<T>>;

/// Connector over HTTP registries and S3 buckets, caching one client per host.
/// Hosts connect independently; only callers for the same host wait on each other.
pub struct DefaultConnector {
    auth: Option<AuthConfig>,
    insecure: bool,
    timeout: u64,
    object_store_config: ObjectStoreConfig,
    output: Logger,
    registries: Mutex<HashMap<String, ClientCell<RegistryClient>>>,
    buckets: Mutex<HashMap<BucketLocation, ClientCell<Arc<S3ObjectStore>>>>,
}

impl DefaultConnector {
    pub fn new(
        auth: Option<AuthConfig>,
        insecure: bool,
        timeout: u64,
        object_store_config: ObjectStoreConfig,
        output: Logger,
    ) -> Self {
        Self {
            auth,
            insecure,
            timeout,
            object_store_config,
            output,
            registries: Mutex::new(HashMap::new()),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, registry: &str) -> Result<RegistryClient> {
        let cell = self
            .registries
            .lock()
            .await
            .entry(registry.to_string())
            .or_default()
            .clone();
        let client = cell
            .get_or_try_init(|| async {
                self.output.verbose(&format!("Connecting to registry {}", registry));
                let client = RegistryClient::builder(registry.to_string())
                    .with_auth(self.auth.clone())
                    .with_insecure(self.insecure)
                    .with_timeout(self.timeout)
                    .with_output(self.output.clone())
                    .build()?;
                client.check_registry_version().await?;
                Ok::<_, MirrorError>(client)
            })
            .await?;
        Ok(client.clone())
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn repository(&self, key: &RepositoryKey) -> Result<Arc<dyn Repository>> {
        let client = self.client(&key.registry).await?;
        Ok(Arc::new(client.repository(&key.repository)))
    }

    async fn object_store(&self, location: &BucketLocation) -> Result<Arc<dyn ObjectStore>> {
        let cell = self
            .buckets
            .lock()
            .await
            .entry(location.clone())
            .or_default()
            .clone();
        let store = cell
            .get_or_try_init(|| async {
                self.output.verbose(&format!("Connecting to {}", location));
                let store =
                    S3ObjectStore::connect(location, &self.object_store_config, self.output.clone()).await?;
                Ok::<_, MirrorError>(Arc::new(store))
            })
            .await?;
        Ok(store.clone())
    }
}
