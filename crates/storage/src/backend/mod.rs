//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for storage operations across different backends (local
//! filesystem, S3-compatible services, etc.). The catalog core depends only
//! on this trait; backends are interchangeable.

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::Result;
use crate::file::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// Unified interface for storage backends.
///
/// All storage operations are asynchronous to efficiently handle network
/// operations and concurrent access. The canonical store for published core
/// descriptors may be a plain directory, an object store, or a hosted
/// repository; the catalog never assumes which.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations should
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use corral_storage::{FileInfo, backend::StorageBackend, error::Result};
///
/// async fn size_of_descriptor(backend: &dyn StorageBackend) -> Result<u64> {
///     let path = PathBuf::from("acme_lib_foo_1.0.0.core");
///     if backend.exists(&path).await? {
///         let data = backend.read(&path).await?;
///         Ok(data.len() as u64)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend (name taken from the configuration
    /// object key). Used for logging only.
    fn name(&self) -> &str;

    /// List all files matching an optional prefix.
    ///
    /// Default implementation collects all results from
    /// [`list_stream()`](Self::list_stream) into a [`Vec`] before returning.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream file metadata matching an optional prefix.
    ///
    /// Returns metadata for all files in the storage backend as a
    /// [`Stream`], yielding results incrementally. If a prefix is provided,
    /// only files whose paths start with the prefix are returned.
    ///
    /// # Notes
    /// - the `prefix` argument may have varying behaviour depending
    ///   on the storage backend implementation used.
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns the complete file contents as a [`Vec<u8>`].
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Read only the first N bytes (e.g. for header detection).
    ///
    /// If the file is smaller than `bytes`, returns the entire file.
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read_head(&self, path: &Path, bytes: usize) -> Result<Vec<u8>>;

    /// Write file contents.
    ///
    /// Creates a new file or overwrites an existing file with the provided
    /// data.
    ///
    /// # Notes
    /// - Implementations should create parent directories as needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Rename/move a file within the same backend.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the source
    /// file does not exist.
    ///
    /// # Notes
    /// - Implementations should create parent directories as needed
    /// - If the destination already exists, it will be overwritten
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Get file metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;

    /// Record pending writes with a descriptive message.
    ///
    /// Version-controlled backends persist the message alongside the written
    /// files. Backends without a commit notion (local filesystem, object
    /// storage) accept and discard it.
    async fn commit(&self, message: &str) -> Result<()> {
        tracing::debug!(backend = self.name(), message, "commit is a no-op for this backend");
        Ok(())
    }

    /// Bulk-fetch hook invoked before a full reconciliation pass.
    ///
    /// Backends with a remote round-trip cost may pre-populate a local cache
    /// here so that the per-file reads issued by the reconciler stay cheap.
    /// The default implementation does nothing.
    async fn prefill_cache(&self) -> Result<()> {
        Ok(())
    }
}
