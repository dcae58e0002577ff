//! Manifest operations for registry client
//!
//! Implements Docker Registry v2 and OCI manifest operations:
//! - Manifest download (GET /v2/{name}/manifests/{reference})
//! - Tag resolution and existence checks (HEAD /v2/{name}/manifests/{reference})
//! - Manifest upload (PUT /v2/{name}/manifests/{reference})
//! - Accept headers restricted to the supported manifest formats

use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{MirrorError, Result};
use crate::image::manifest::accept_header;
use crate::image::{Descriptor, DigestUtils, ManifestPayload};
use crate::logging::Logger;
use crate::registry::client::Credentials;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, StatusCode};

const DIGEST_HEADER: &str = "Docker-Content-Digest";

#[derive(Clone)]
pub struct ManifestOperations {
    client: Client,
    address: String,
    output: Logger,
    credentials: Credentials,
}

impl ManifestOperations {
    pub fn new(client: Client, address: String, output: Logger, credentials: Credentials) -> Self {
        Self {
            client,
            address,
            output,
            credentials,
        }
    }

    /// Download a manifest by tag or digest
    pub async fn pull_manifest(&self, repository: &str, reference: &str) -> Result<ManifestPayload> {
        self.output
            .verbose(&format!("Pulling manifest for {}:{}", repository, reference));

        let url = format!("{}/v2/{}/manifests/{}", self.address, repository, reference);
        let response = self
            .credentials
            .apply(self.client.get(&url))
            .header(ACCEPT, accept_header())
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "manifest pull"))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_registry_error(
                status,
                &error_text,
                &format!("manifest get {}:{}", repository, reference),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = response
            .bytes()
            .await
            .map_err(|e| MirrorError::Network(format!("Failed to read manifest response: {}", e)))?;

        let payload = ManifestPayload::from_response(content_type.as_deref(), data)?;
        if DigestUtils::is_valid_docker_digest(reference) && payload.digest != reference {
            return Err(MirrorError::Manifest(format!(
                "manifest content for {} hashes to {}",
                reference, payload.digest
            )));
        }

        self.output.detail(&format!("Manifest type: {}", payload.media_type));
        Ok(payload)
    }

    /// HEAD a manifest; `None` when the registry does not know the reference
    pub async fn head_manifest(&self, repository: &str, reference: &str) -> Result<Option<Descriptor>> {
        let url = format!("{}/v2/{}/manifests/{}", self.address, repository, reference);
        let response = self
            .credentials
            .apply(self.client.head(&url))
            .header(ACCEPT, accept_header())
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "manifest head"))?;

        match response.status() {
            StatusCode::OK => {
                let headers = response.headers();
                let digest = headers
                    .get(DIGEST_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let size = headers
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0);
                let media_type = headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();

                match digest {
                    Some(digest) => Ok(Some(Descriptor::new(digest, size, media_type))),
                    // Some registries omit the digest header on HEAD
                    None => {
                        let payload = self.pull_manifest(repository, reference).await?;
                        Ok(Some(payload.descriptor()))
                    }
                }
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(HttpErrorHandler::handle_registry_error(
                status,
                "",
                &format!("manifest head {}:{}", repository, reference),
            )),
        }
    }

    /// Upload a manifest with its own media type as content type
    pub async fn push_manifest(
        &self,
        repository: &str,
        reference: &str,
        payload: &ManifestPayload,
    ) -> Result<String> {
        let url = format!("{}/v2/{}/manifests/{}", self.address, repository, reference);
        self.output.verbose(&format!(
            "Uploading manifest {} to {}:{} ({})",
            self.output.short_digest(&payload.digest),
            repository,
            reference,
            payload.media_type
        ));

        let response = self
            .credentials
            .apply(self.client.put(&url))
            .header(CONTENT_TYPE, payload.media_type.as_str())
            .body(payload.bytes.clone())
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "manifest push"))?;

        let status = response.status();
        if status.is_success() {
            let digest = response
                .headers()
                .get(DIGEST_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(&payload.digest)
                .to_string();
            Ok(digest)
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(HttpErrorHandler::handle_registry_error(
                status,
                &error_text,
                &format!("manifest put {}:{}", repository, reference),
            )
            .in_stage(MirrorError::ManifestPush))
        }
    }
}
