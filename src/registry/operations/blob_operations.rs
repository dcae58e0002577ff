//! Blob operations for registry client
//!
//! Implements Docker Registry v2 blob operations:
//! - Blob existence checks (HEAD /v2/{name}/blobs/{digest})
//! - Cross-repository mount (POST /v2/{name}/blobs/uploads/?mount={digest}&from={repo})
//! - Blob upload with staged upload pattern (/v2/{name}/blobs/uploads/)
//! - Blob download (GET /v2/{name}/blobs/{digest})

use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{MirrorError, Result};
use crate::image::{Descriptor, RepositoryKey};
use crate::logging::Logger;
use crate::registry::client::Credentials;
use crate::registry::{BlobStream, MountOutcome};
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Body, Client, StatusCode};
use url::Url;

const DIGEST_HEADER: &str = "Docker-Content-Digest";

#[derive(Clone)]
pub struct BlobOperations {
    client: Client,
    address: String,
    output: Logger,
    credentials: Credentials,
}

impl BlobOperations {
    pub fn new(client: Client, address: String, output: Logger, credentials: Credentials) -> Self {
        Self {
            client,
            address,
            output,
            credentials,
        }
    }

    /// Check blob existence using a HEAD request
    pub async fn stat_blob(&self, repository: &str, digest: &str) -> Result<Option<Descriptor>> {
        let url = format!("{}/v2/{}/blobs/{}", self.address, repository, digest);
        let response = self
            .credentials
            .apply(self.client.head(&url))
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "blob existence check"))?;

        match response.status() {
            StatusCode::OK => {
                let size = response
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0);
                let media_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                self.output
                    .detail(&format!("Blob {} exists in {}", self.output.short_digest(digest), repository));
                Ok(Some(Descriptor::new(digest, size, media_type)))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(HttpErrorHandler::handle_registry_error(
                status,
                "",
                &format!("blob stat {}", digest),
            )),
        }
    }

    /// Open a blob for streaming read
    pub async fn open_blob(&self, repository: &str, digest: &str) -> Result<BlobStream> {
        let url = format!("{}/v2/{}/blobs/{}", self.address, repository, digest);
        let response = self
            .credentials
            .apply(self.client.get(&url))
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "blob download"))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_registry_error(
                status,
                &error_text,
                &format!("blob get {}", digest),
            ));
        }

        Ok(response.bytes_stream().map_err(MirrorError::from).boxed())
    }

    /// Ask the registry to attach `digest` from another repository without moving bytes
    pub async fn mount_blob(
        &self,
        repository: &str,
        digest: &str,
        from: &RepositoryKey,
    ) -> Result<MountOutcome> {
        let base_url = format!("{}/v2/{}/blobs/uploads/", self.address, repository);
        let url = Url::parse_with_params(&base_url, &[("mount", digest), ("from", from.repository.as_str())])?;

        let response = self
            .credentials
            .apply(self.client.post(url))
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "blob mount"))?;

        match response.status() {
            StatusCode::CREATED => {
                let mounted = response
                    .headers()
                    .get(DIGEST_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or(digest)
                    .to_string();
                if mounted != digest {
                    return Err(MirrorError::DigestMismatch {
                        expected: digest.to_string(),
                        actual: mounted,
                    });
                }
                self.output.detail(&format!(
                    "Mounted {} from {} into {}",
                    self.output.short_digest(digest),
                    from.repository,
                    repository
                ));
                Ok(MountOutcome::Mounted(Descriptor::placeholder(mounted)))
            }
            StatusCode::ACCEPTED => Ok(MountOutcome::NotMounted),
            status => {
                let error_text = response.text().await.unwrap_or_default();
                Err(HttpErrorHandler::handle_upload_error(status, &error_text, "blob mount"))
            }
        }
    }

    /// Upload blob content with a monolithic PUT after opening an upload session
    pub async fn upload_blob(
        &self,
        repository: &str,
        descriptor: &Descriptor,
        content: BlobStream,
    ) -> Result<Descriptor> {
        let location = self.start_upload(repository).await?;
        let mut url = Url::parse(&location)?;
        url.query_pairs_mut().append_pair("digest", &descriptor.digest);

        self.output.detail(&format!(
            "Uploading blob {} ({}) to {}",
            self.output.short_digest(&descriptor.digest),
            self.output.format_size(descriptor.size),
            repository
        ));

        let mut request = self
            .credentials
            .apply(self.client.put(url))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Body::wrap_stream(content));
        if descriptor.has_size() {
            request = request.header(CONTENT_LENGTH, descriptor.size.to_string());
        }

        let response = request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "blob upload"))?;

        let status = response.status();
        if status.is_success() {
            Ok(descriptor.clone())
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(HttpErrorHandler::handle_upload_error(status, &error_text, "blob upload"))
        }
    }

    async fn start_upload(&self, repository: &str) -> Result<String> {
        let url = format!("{}/v2/{}/blobs/uploads/", self.address, repository);
        let response = self
            .credentials
            .apply(self.client.post(&url))
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "upload session"))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_upload_error(status, &error_text, "upload session"));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .ok_or_else(|| MirrorError::BlobTransfer("Missing Location header in upload response".to_string()))?
            .to_str()
            .map_err(|e| MirrorError::BlobTransfer(format!("Invalid Location header: {}", e)))?;

        Ok(self.resolve_location(repository, location))
    }

    fn resolve_location(&self, repository: &str, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else if location.starts_with('/') {
            format!("{}{}", self.address, location)
        } else {
            format!("{}/v2/{}/blobs/uploads/{}", self.address, repository, location)
        }
    }
}
