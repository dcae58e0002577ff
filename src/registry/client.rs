// This file contains the HTTP registry client: a builder producing one
// `RegistryClient` per registry host, and `HttpRepository`, the per-repository
// view implementing the distribution protocol subset used by the mirror.

use crate::cli::config::AuthConfig;
use crate::error::handlers::NetworkErrorHandler;
use crate::error::{MirrorError, Result};
use crate::image::{Descriptor, ManifestPayload, RepositoryKey};
use crate::logging::Logger;
use crate::registry::operations::{BlobOperations, ManifestOperations};
use crate::registry::{BlobStream, MountOutcome, Repository};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;

/// Credentials attached to every request sent to one registry
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    auth: Option<AuthConfig>,
}

impl Credentials {
    pub fn new(auth: Option<AuthConfig>) -> Self {
        Self { auth }
    }

    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(auth) => request.basic_auth(&auth.username, Some(&auth.password)),
            None => request,
        }
    }
}

pub struct RegistryClientBuilder {
    registry: String,
    auth_config: Option<AuthConfig>,
    insecure: bool,
    timeout: u64,
    output: Logger,
}

impl RegistryClientBuilder {
    pub fn new(registry: String) -> Self {
        Self {
            registry,
            auth_config: None,
            insecure: false,
            timeout: 300,
            output: Logger::default(),
        }
    }

    pub fn with_auth(mut self, auth_config: Option<AuthConfig>) -> Self {
        self.auth_config = auth_config;
        self
    }

    /// Use plain HTTP and accept invalid certificates
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output(mut self, output: Logger) -> Self {
        self.output = output;
        self
    }

    pub fn build(self) -> Result<RegistryClient> {
        let client = Client::builder()
            .danger_accept_invalid_certs(self.insecure)
            .timeout(Duration::from_secs(self.timeout))
            .build()
            .map_err(|e| MirrorError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        let scheme = if self.insecure { "http" } else { "https" };
        let address = format!("{}://{}", scheme, self.registry);
        let credentials = Credentials::new(self.auth_config);

        Ok(RegistryClient {
            blobs: BlobOperations::new(client.clone(), address.clone(), self.output.clone(), credentials.clone()),
            manifests: ManifestOperations::new(client.clone(), address.clone(), self.output.clone(), credentials.clone()),
            client,
            address,
            registry: self.registry,
            credentials,
            output: self.output,
        })
    }
}

#[derive(Clone)]
pub struct RegistryClient {
    client: Client,
    address: String,
    registry: String,
    credentials: Credentials,
    blobs: BlobOperations,
    manifests: ManifestOperations,
    output: Logger,
}

impl RegistryClient {
    pub fn builder(registry: String) -> RegistryClientBuilder {
        RegistryClientBuilder::new(registry)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Query `/v2/` to make sure the registry speaks the v2 API
    pub async fn check_registry_version(&self) -> Result<()> {
        let url = format!("{}/v2/", self.address);
        let response = self
            .credentials
            .apply(self.client.get(&url))
            .send()
            .await
            .map_err(|e| {
                MirrorError::Connection(
                    NetworkErrorHandler::handle_network_error(&e, &format!("connecting to {}", self.registry))
                        .to_string(),
                )
            })?;

        match response.status().as_u16() {
            200 => Ok(()),
            401 => {
                self.output
                    .detail(&format!("Registry {} requires authentication", self.registry));
                Ok(())
            }
            status => Err(MirrorError::Connection(format!(
                "Registry API v2 not available at {} (status {})",
                self.address, status
            ))),
        }
    }

    pub fn repository(&self, name: &str) -> HttpRepository {
        HttpRepository {
            key: RepositoryKey::new(self.registry.clone(), name),
            client: self.clone(),
        }
    }
}

/// One repository reached over HTTP
pub struct HttpRepository {
    key: RepositoryKey,
    client: RegistryClient,
}

#[async_trait]
impl Repository for HttpRepository {
    fn key(&self) -> &RepositoryKey {
        &self.key
    }

    async fn resolve_tag(&self, tag: &str) -> Result<Descriptor> {
        self.client
            .manifests
            .head_manifest(&self.key.repository, tag)
            .await?
            .ok_or_else(|| MirrorError::NotFound(format!("tag {} in {}", tag, self.key)))
    }

    async fn get_manifest(&self, reference: &str) -> Result<ManifestPayload> {
        self.client
            .manifests
            .pull_manifest(&self.key.repository, reference)
            .await
    }

    async fn manifest_exists(&self, digest: &str) -> Result<bool> {
        Ok(self
            .client
            .manifests
            .head_manifest(&self.key.repository, digest)
            .await?
            .is_some())
    }

    async fn put_manifest(&self, payload: &ManifestPayload, reference: &str) -> Result<String> {
        self.client
            .manifests
            .push_manifest(&self.key.repository, reference, payload)
            .await
    }

    async fn stat_blob(&self, digest: &str) -> Result<Option<Descriptor>> {
        self.client.blobs.stat_blob(&self.key.repository, digest).await
    }

    async fn open_blob(&self, digest: &str) -> Result<BlobStream> {
        self.client.blobs.open_blob(&self.key.repository, digest).await
    }

    async fn mount_blob(&self, digest: &str, from: &RepositoryKey) -> Result<MountOutcome> {
        if from.registry != self.key.registry {
            return Err(MirrorError::Unsupported(format!(
                "cannot mount across registries ({} into {})",
                from, self.key
            )));
        }
        self.client
            .blobs
            .mount_blob(&self.key.repository, digest, from)
            .await
    }

    async fn upload_blob(&self, descriptor: &Descriptor, content: BlobStream) -> Result<Descriptor> {
        self.client
            .blobs
            .upload_blob(&self.key.repository, descriptor, content)
            .await
    }
}
