//! S3 implementation of [`ObjectStore`] on top of the AWS SDK

use crate::cli::config::ObjectStoreConfig;
use crate::destination::object_store::{BucketLocation, ObjectStore};
use crate::error::{MirrorError, Result};
use crate::logging::Logger;
use crate::registry::BlobStream;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::Client as AwsS3Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use std::future::Future;
use std::time::Duration;

/// Objects at least this large are written with multipart uploads
const PART_SIZE: usize = 8 * 1024 * 1024;

const DEFAULT_ENDPOINT: &str = "s3.amazonaws.com";

fn s3_error(operation: &str, key: &str, e: impl std::error::Error) -> MirrorError {
    MirrorError::Network(format!("S3 {} {}: {}", operation, key, DisplayErrorContext(e)))
}

async fn abort_upload(client: AwsS3Client, bucket: String, key: String, upload_id: String, output: Logger) {
    if let Err(e) = client
        .abort_multipart_upload()
        .bucket(&bucket)
        .key(&key)
        .upload_id(&upload_id)
        .send()
        .await
    {
        output.warning(&format!("Failed to abort upload of {}: {}", key, DisplayErrorContext(e)));
    }
}

/// Cleanup that runs unless disarmed. Dropping it while armed (for example when a
/// cancelled upload future is dropped) spawns the cleanup on the current runtime.
struct AbortOnDrop {
    cleanup: Option<BoxFuture<'static, ()>>,
}

impl AbortOnDrop {
    fn new(cleanup: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            cleanup: Some(cleanup.boxed()),
        }
    }

    /// Run the cleanup in place
    async fn run(mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.await;
        }
    }

    fn disarm(mut self) {
        self.cleanup = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(cleanup);
            }
        }
    }
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: AwsS3Client,
    bucket: String,
    output: Logger,
}

impl S3ObjectStore {
    pub async fn connect(location: &BucketLocation, config: &ObjectStoreConfig, output: Logger) -> Result<Self> {
        let region = if location.region.is_empty() {
            config.region.clone()
        } else {
            Some(location.region.clone())
        };
        let region_provider = match region {
            Some(region) => RegionProviderChain::first_try(Region::new(region)),
            None => RegionProviderChain::default_provider(),
        };
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&aws_config);
        let endpoint = config.endpoint.clone().or_else(|| {
            (location.endpoint != DEFAULT_ENDPOINT).then(|| format!("https://{}", location.endpoint))
        });
        if let Some(endpoint) = endpoint {
            output.detail(&format!("Using S3 endpoint {}", endpoint));
            builder = builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }
        if config.timeout_seconds > 0 {
            let timeout_config = aws_sdk_s3::config::timeout::TimeoutConfig::builder()
                .operation_timeout(Duration::from_secs(config.timeout_seconds))
                .build();
            builder = builder.timeout_config(timeout_config);
        }

        Ok(Self {
            client: AwsS3Client::from_conf(builder.build()),
            bucket: location.bucket.clone(),
            output,
        })
    }

    async fn put_single(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| s3_error("put", key, e))?;
        Ok(())
    }

    async fn upload_part(&self, key: &str, upload_id: &str, part_number: i32, data: Bytes) -> Result<CompletedPart> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| s3_error("upload part", key, e))?;
        let etag = response
            .e_tag()
            .ok_or_else(|| MirrorError::BlobTransfer(format!("no ETag returned for part {} of {}", part_number, key)))?;
        Ok(CompletedPart::builder()
            .part_number(part_number)
            .e_tag(etag)
            .build())
    }

    async fn put_multipart(&self, key: &str, first: Bytes, mut body: BlobStream, content_type: &str) -> Result<()> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| s3_error("create multipart upload", key, e))?;
        let upload_id = response
            .upload_id()
            .ok_or_else(|| MirrorError::BlobTransfer(format!("no upload ID returned for {}", key)))?
            .to_string();
        let abort = AbortOnDrop::new(abort_upload(
            self.client.clone(),
            self.bucket.clone(),
            key.to_string(),
            upload_id.clone(),
            self.output.clone(),
        ));

        let result = async {
            let mut parts = vec![self.upload_part(key, &upload_id, 1, first).await?];
            let mut buffer = BytesMut::with_capacity(PART_SIZE);
            while let Some(chunk) = body.next().await {
                buffer.extend_from_slice(&chunk?);
                if buffer.len() >= PART_SIZE {
                    let part_number = parts.len() as i32 + 1;
                    let data = buffer.split().freeze();
                    parts.push(self.upload_part(key, &upload_id, part_number, data).await?);
                }
            }
            if !buffer.is_empty() {
                let part_number = parts.len() as i32 + 1;
                parts.push(self.upload_part(key, &upload_id, part_number, buffer.freeze()).await?);
            }

            self.client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .multipart_upload(
                    CompletedMultipartUpload::builder()
                        .set_parts(Some(parts))
                        .build(),
                )
                .send()
                .await
                .map_err(|e| s3_error("complete multipart upload", key, e))?;
            Ok(())
        }
        .await;

        match &result {
            Ok(()) => abort.disarm(),
            Err(_) => abort.run().await,
        }
        result
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head(&self, key: &str) -> Result<Option<u64>> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(response) => Ok(Some(response.content_length().unwrap_or(0).max(0) as u64)),
            Err(e) if e.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(None),
            Err(e) => Err(s3_error("head", key, e)),
        }
    }

    async fn copy(&self, source: &str, key: &str) -> Result<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(source)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_error("copy", source, e))?;
        Ok(())
    }

    async fn put(&self, key: &str, mut body: BlobStream, size: Option<u64>, content_type: &str) -> Result<()> {
        if let Some(size) = size {
            self.output.detail(&format!(
                "Writing {} ({}) to bucket {}",
                key,
                self.output.format_size(size),
                self.bucket
            ));
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
            if buffer.len() >= PART_SIZE {
                return self.put_multipart(key, buffer.freeze(), body, content_type).await;
            }
        }
        self.put_single(key, buffer.freeze(), content_type).await
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let response = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(response) => response,
            Err(e) if e.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(MirrorError::NotFound(format!("{}/{}", self.bucket, key)));
            }
            Err(e) => return Err(s3_error("get", key, e)),
        };
        let body = response
            .body
            .collect()
            .await
            .map_err(|e| MirrorError::Network(format!("Failed to read {}: {}", key, e)))?;
        Ok(body.into_bytes())
    }
}
