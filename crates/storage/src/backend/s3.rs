//! S3-compatible storage backend.
//!
//! Storage backend implementation for S3-compatible services including AWS
//! S3, Backblaze B2, MinIO, and others.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration file. The
//! credential chain is inherently single-account which doesn't fit well with
//! heterogeneous non-AWS endpoints, so profiles are not supported.

use crate::{
    FileInfo, StorageBackend,
    backend::FileInfoStream,
    error::{ErrorKind, Result},
    validate_path,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig, timeout::TimeoutConfig},
    primitives::{ByteStream, DateTime},
};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;

/// Upper bound on any single S3 operation. A publish or reconciliation pass
/// must never hang on a stalled connection.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// S3-compatible storage backend.
///
/// Stores files in an S3 bucket, optionally under a key prefix. All paths are
/// relative to the configured prefix (if any).
///
/// # Examples
///
/// ```no_run
/// use corral_storage::backend::S3Backend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "cores-bucket",
///     "my-bucket",
///     Some("cores/".to_string()),
///     "us-west-004",
///     Some("https://s3.us-west-004.backblazeb2.com".to_string()),
///     "access_key_id",
///     "secret_access_key",
/// ).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 storage backend.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in display/logging)
    /// * `bucket` - S3 bucket name
    /// * `prefix` - Optional key prefix (acts as virtual directory)
    /// * `region` - AWS region or provider-specific region
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - AWS/provider access key ID
    /// * `key_secret` - AWS/provider secret access key
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix
            .map(validate_path)
            .transpose()?
            .map(|p| p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidPath(p)))
            .transpose()?;
        let name = name.into();
        let bucket = bucket.into();
        let region = Region::new(region.into());
        let credentials = Credentials::new(key_id, key_secret, None, None, "corral-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(region)
            // Exponential back-off: 1 initial attempt + 3 retries
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // A stalled connection must not wedge a publish or reconciliation.
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(DEFAULT_OPERATION_TIMEOUT)
                    .build(),
            )
            // Path-style addressing for better compatibility with
            // S3-compatible services (Backblaze, MinIO, etc.)
            .force_path_style(true);
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        let client = Client::from_conf(config_builder.build());
        let rate_limiter = Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS));
        Ok(Self {
            name,
            client,
            bucket,
            prefix,
            rate_limiter,
        })
    }

    /// Construct the full S3 key from a relative path.
    fn full_key(&self, path: &Path) -> Result<String> {
        let validated = validate_path(path)?;
        let path_str = validated.to_str().ok_or_raise(|| ErrorKind::InvalidPath(validated.clone()))?;
        Ok(match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), path_str),
            None => path_str.to_string(),
        })
    }

    /// Strip the configured prefix from an S3 key to get a relative path.
    fn relative_path(&self, key: &str) -> Result<PathBuf> {
        let relative = match &self.prefix {
            Some(prefix) => {
                let prefix_normalized = prefix.trim_end_matches('/');
                key.strip_prefix(prefix_normalized).and_then(|s| s.strip_prefix('/')).unwrap_or(key)
            },
            None => key,
        };
        validate_path(relative)
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> OwnedSemaphorePermit {
        // unwrap is safe: the semaphore is never closed
        self.rate_limiter.clone().acquire_owned().await.unwrap()
    }

    /// Convert an AWS DateTime to OffsetDateTime.
    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }

    fn network_error(context: &str, err: impl std::fmt::Display) -> ErrorKind {
        ErrorKind::Network(format!("{context}: {err}"))
    }

    async fn get_object_bytes(&self, path: &Path, range: Option<String>) -> Result<Vec<u8>> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await;
        let mut request = self.client.get_object().bucket(&self.bucket).key(&key);
        if let Some(range) = range {
            request = request.range(range);
        }
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
                }
                exn::bail!(Self::network_error("get_object", service_err));
            },
        };
        let data = response.body.collect().await.or_raise(|| {
            ErrorKind::Network(format!("streaming object body for `{key}` failed"))
        })?;
        Ok(data.into_bytes().to_vec())
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let list_prefix = match prefix {
            Some(p) => match self.full_key(p) {
                Ok(key) => Some(key),
                Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
            },
            None => self.prefix.clone(),
        };

        Box::pin(stream! {
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(list_prefix)
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = match page {
                    Ok(page) => page,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::network_error("list_objects_v2", err)));
                        return;
                    },
                };
                for object in page.contents() {
                    let Some(key) = object.key() else { continue };
                    // Directory placeholder objects have no content to index.
                    if key.ends_with('/') {
                        continue;
                    }
                    let path = match self.relative_path(key) {
                        Ok(path) => path,
                        Err(e) => { yield Err(e); continue; },
                    };
                    let size = object.size().unwrap_or(0).max(0) as u64;
                    let modified = match object.last_modified() {
                        Some(dt) => match Self::parse_datetime(dt) {
                            Ok(modified) => modified,
                            Err(e) => { yield Err(e); continue; },
                        },
                        None => OffsetDateTime::UNIX_EPOCH,
                    };
                    yield Ok(FileInfo::new(path, size, modified));
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await;
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    return Ok(false);
                }
                exn::bail!(Self::network_error("head_object", service_err));
            },
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.get_object_bytes(path, None).await
    }

    async fn read_head(&self, path: &Path, bytes: usize) -> Result<Vec<u8>> {
        if bytes == 0 {
            return Ok(Vec::new());
        }
        // Ranges are inclusive. S3 happily returns a short body when the
        // range exceeds the object size.
        self.get_object_bytes(path, Some(format!("bytes=0-{}", bytes - 1))).await
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|err| Self::network_error("put_object", err.into_service_error()))?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        // S3 DeleteObject is a silent no-op for missing keys; check first so
        // that delete semantics match the other backends.
        if !self.exists(path).await? {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|err| Self::network_error("delete_object", err.into_service_error()))?;
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_key = self.full_key(from)?;
        let to_key = self.full_key(to)?;
        {
            let _permit = self.acquire_permit().await;
            self.client
                .copy_object()
                .bucket(&self.bucket)
                .copy_source(format!("{}/{}", self.bucket, from_key))
                .key(&to_key)
                .send()
                .await
                .map_err(|err| Self::network_error("copy_object", err.into_service_error()))?;
        }
        // Copy-then-delete is not atomic; warn but don't fail when only the
        // delete half goes wrong, the content is safe at the new key.
        if let Err(err) = self.delete(from).await {
            tracing::warn!(backend = %self.name, from = %from.display(), error = %err, "rename left source object behind");
        }
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await;
        let response = match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(response) => response,
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
                }
                exn::bail!(Self::network_error("head_object", service_err));
            },
        };
        let size = response.content_length().unwrap_or(0).max(0) as u64;
        let modified = match response.last_modified() {
            Some(dt) => Self::parse_datetime(dt)?,
            None => OffsetDateTime::UNIX_EPOCH,
        };
        Ok(FileInfo::new(path.to_path_buf(), size, modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping_without_prefix() {
        let prefix: Option<String> = None;
        let path = Path::new("cores/acme_lib_foo_1.0.0.core");
        let path_str = path.to_string_lossy();
        let result = match &prefix {
            Some(p) => format!("{}/{}", p.trim_end_matches('/'), path_str),
            None => path_str.into_owned(),
        };
        assert_eq!(result, "cores/acme_lib_foo_1.0.0.core");
    }

    #[test]
    fn test_key_mapping_with_prefix() {
        let prefix = Some("registry".to_string());
        let path = Path::new("acme_lib_foo_1.0.0.core");
        let path_str = path.to_string_lossy();
        let result = match &prefix {
            Some(p) => format!("{}/{}", p.trim_end_matches('/'), path_str),
            None => path_str.into_owned(),
        };
        assert_eq!(result, "registry/acme_lib_foo_1.0.0.core");
    }

    #[test]
    fn test_relative_path_strips_prefix() {
        let prefix = Some("registry/".to_string());
        let key = "registry/acme_lib_foo_1.0.0.core";
        let relative = match &prefix {
            Some(p) => {
                let prefix_normalized = p.trim_end_matches('/');
                key.strip_prefix(prefix_normalized).and_then(|s| s.strip_prefix('/')).unwrap_or(key)
            },
            None => key,
        };
        assert_eq!(relative, "acme_lib_foo_1.0.0.core");
    }
}
