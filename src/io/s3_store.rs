use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use super::{ObjectStore, StoredObject};
use crate::error::IoError;

/// S3-backed implementation of [`ObjectStore`].
///
/// Keys map directly to object keys inside a single bucket, optionally under a
/// prefix. Works with S3-compatible services (MinIO, R2, etc.) when the client
/// is built with a custom endpoint.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    identifier: String,
}

impl S3ObjectStore {
    /// Create a store for the given bucket.
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let identifier = format!("s3://{}", bucket);
        Self {
            client,
            bucket,
            prefix: None,
            identifier,
        }
    }

    /// Place every key under `prefix/`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        if prefix.is_empty() {
            self.prefix = None;
            self.identifier = format!("s3://{}", self.bucket);
        } else {
            self.identifier = format!("s3://{}/{}", self.bucket, prefix);
            self.prefix = Some(prefix);
        }
        self
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Resolve a store key to the S3 object key.
    pub fn object_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, key),
            None => key.to_string(),
        }
    }

    fn location(&self, object_key: &str) -> String {
        format!("s3://{}/{}", self.bucket, object_key)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, key: &str) -> Result<StoredObject, IoError> {
        let object_key = self.object_key(key);

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| {
                let is_no_such_key = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if is_no_such_key {
                    return IoError::NotFound(self.location(&object_key));
                }

                // Some S3-compatible services answer 403 instead of 404 when
                // the caller lacks ListBucket permission.
                match e.raw_response().map(|r| r.status().as_u16()) {
                    Some(404) => IoError::NotFound(self.location(&object_key)),
                    Some(403) => IoError::Forbidden(self.location(&object_key)),
                    Some(503) => IoError::Connection(e.to_string()),
                    _ => IoError::S3(e.to_string()),
                }
            })?;

        let content_type = resp.content_type().map(str::to_string);
        let cache_control = resp.cache_control().map(str::to_string);

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .into_bytes();

        Ok(StoredObject {
            data,
            content_type,
            cache_control,
        })
    }

    async fn put(&self, key: &str, object: StoredObject) -> Result<(), IoError> {
        let object_key = self.object_key(key);

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .content_length(object.data.len() as i64)
            .body(ByteStream::from(object.data));

        if let Some(content_type) = object.content_type {
            request = request.content_type(content_type);
        }
        if let Some(cache_control) = object.cache_control {
            request = request.cache_control(cache_control);
        }

        request.send().await.map_err(|e| {
            match e.raw_response().map(|r| r.status().as_u16()) {
                Some(403) => IoError::Forbidden(self.location(&object_key)),
                _ => IoError::S3(e.to_string()),
            }
        })?;

        Ok(())
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services usually need path-style addressing
    let s3_config = if endpoint_url.is_some() {
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build()
    } else {
        aws_sdk_s3::config::Builder::from(&sdk_config).build()
    };

    Client::from_conf(s3_config)
}
