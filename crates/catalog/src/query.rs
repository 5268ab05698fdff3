//! Read-only queries over the package index.
//!
//! Every read here is served from the index database alone - never from the
//! storage backend - so listing and retrieval latency is bounded and remote
//! rate limits are never consumed by browsing traffic.

use crate::error::{ErrorKind, Result};
use corral_index::{PackageRecord, PackageSummary, Repository, VendorSummary};
use exn::ResultExt;
use std::io::{Cursor, Write};
use tracing::instrument;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Filename of the bulk-download archive.
pub const ARCHIVE_FILENAME: &str = "core_directory_archive.zip";

/// List indexed packages, optionally filtered by a case-insensitive
/// substring of the VLNV.
pub async fn list(repo: &Repository, filter: Option<&str>) -> Result<Vec<PackageSummary>> {
    repo.list(filter).await.or_raise(|| ErrorKind::Index)
}

/// Fetch one package by its VLNV string.
pub async fn get(repo: &Repository, vlnv: &str) -> Result<PackageRecord> {
    repo.get_by_vlnv(vlnv)
        .await
        .or_raise(|| ErrorKind::Index)?
        .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(vlnv.to_string())))
}

/// Derived vendor listing (library and package counts per vendor).
pub async fn vendors(repo: &Repository) -> Result<Vec<VendorSummary>> {
    repo.list_vendors().await.or_raise(|| ErrorKind::Index)
}

/// Bundle every indexed descriptor (and signature) into a zip archive.
///
/// Entries are named by sanitized VLNV, so the archive unpacks into the same
/// flat layout the canonical store uses.
#[instrument(skip_all)]
pub async fn archive(repo: &Repository) -> Result<Vec<u8>> {
    let records = repo.list_all().await.or_raise(|| ErrorKind::Index)?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for record in &records {
        writer
            .start_file(record.vlnv.descriptor_filename(), options)
            .or_raise(|| ErrorKind::Archive)?;
        writer.write_all(record.content.as_bytes()).or_raise(|| ErrorKind::Archive)?;
        if let Some(signature) = &record.signature_content {
            writer
                .start_file(record.vlnv.signature_filename(), options)
                .or_raise(|| ErrorKind::Archive)?;
            writer.write_all(signature.as_bytes()).or_raise(|| ErrorKind::Archive)?;
        }
    }
    let cursor = writer.finish().or_raise(|| ErrorKind::Archive)?;
    tracing::debug!(packages = records.len(), bytes = cursor.get_ref().len(), "built download archive");
    Ok(cursor.into_inner())
}
