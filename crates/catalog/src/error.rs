//! Catalog Error Types
//!
//! Structured errors using `exn` for automatic location tracking. Error kinds
//! map one-to-one onto the statuses of the service's REST surface.

use corral_descriptor::Issues;
use derive_more::{Display, Error};

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The submitted descriptor failed validation. Carries every collected
    /// field-level issue.
    #[display("{_0}")]
    Rejected(Issues),
    /// The VLNV is already published; published versions are immutable.
    #[display("core '{_0}' already exists in the directory")]
    Duplicate(#[error(not(source))] String),
    /// No indexed package matches the requested VLNV.
    #[display("core '{_0}' not found")]
    NotFound(#[error(not(source))] String),
    /// The storage backend could not be reached; the caller may retry.
    #[display("storage backend unavailable")]
    StorageUnavailable,
    /// The index database failed.
    #[display("index database error")]
    Index,
    /// Bundling the download archive failed.
    #[display("archive bundling failed")]
    Archive,
    /// The SPDX license list could not be reloaded.
    #[display("license list refresh failed: {_0}")]
    Licenses(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable)
    }

    /// The HTTP status an out-of-process routing layer should map this
    /// error to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Rejected(_) => 400,
            Self::NotFound(_) => 404,
            Self::Duplicate(_) => 409,
            Self::StorageUnavailable => 503,
            Self::Index | Self::Archive | Self::Licenses(_) => 500,
        }
    }
}
