//! Full index reconciliation against the canonical store.
//!
//! Rebuilds the package index from the descriptor files currently in
//! storage. One malformed file never blocks the rest: it is skipped and
//! reported. The store being unreachable aborts the entire pass with the
//! index left untouched; the swap to the reconciled state happens in a
//! single index transaction.

use crate::error::{ErrorKind, Result};
use corral_descriptor::{DESCRIPTOR_EXTENSION, SIGNATURE_EXTENSION, TrustStore, parse, sign};
use corral_index::{PackageRecord, Repository, SignatureState};
use corral_storage::BackendHandle;
use exn::ResultExt;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing::instrument;

/// Operator-facing summary of a reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Packages present in the reconciled index.
    pub indexed: u64,
    /// Rows removed because their descriptor left storage.
    pub pruned: u64,
    /// Files that could not be indexed, with the reason. Non-fatal.
    pub skipped: Vec<(PathBuf, String)>,
    /// VLNV collisions: (vlnv, losing path). The lexicographically first
    /// path won.
    pub ambiguous: Vec<(String, PathBuf)>,
}

/// Run a reconciliation only when the index is empty.
///
/// This is the startup trigger policy: populate a fresh index once, but
/// never override an existing one without an explicit administrative call.
pub async fn reconcile_if_empty(
    backend: &BackendHandle,
    repo: &Repository,
    trust: &TrustStore,
) -> Result<Option<ReconcileReport>> {
    let count = repo.count().await.or_raise(|| ErrorKind::Index)?;
    if count > 0 {
        tracing::debug!(count, "index already populated; skipping startup reconciliation");
        return Ok(None);
    }
    reconcile(backend, repo, trust).await.map(Some)
}

/// Rebuild the index from storage. Idempotent and safe to re-run at any
/// time.
#[instrument(skip_all, fields(backend = backend.name()))]
pub async fn reconcile(
    backend: &BackendHandle,
    repo: &Repository,
    trust: &TrustStore,
) -> Result<ReconcileReport> {
    // Give remote backends a chance to bulk-fetch before the per-file reads.
    backend.prefill_cache().await.or_raise(|| ErrorKind::StorageUnavailable)?;

    let files = backend.list(None).await.or_raise(|| ErrorKind::StorageUnavailable)?;
    let mut descriptor_paths = Vec::new();
    let mut signature_paths = HashSet::new();
    for file in files {
        match file.path.extension().and_then(|ext| ext.to_str()) {
            Some(DESCRIPTOR_EXTENSION) => descriptor_paths.push(file.path),
            Some(SIGNATURE_EXTENSION) => {
                signature_paths.insert(file.path);
            },
            _ => {},
        }
    }
    // Deterministic processing order; doubles as the VLNV-collision
    // tie-break (first path in byte order wins).
    descriptor_paths.sort();

    let mut report = ReconcileReport::default();
    let mut records: Vec<PackageRecord> = Vec::new();
    let mut claimed: HashMap<String, PathBuf> = HashMap::new();

    for path in descriptor_paths {
        let bytes = match backend.read(&path).await {
            Ok(bytes) => bytes,
            // The file vanished between listing and reading; skip it. Any
            // other storage failure means the store is unreachable and the
            // pass must abort without touching the index.
            Err(err) if matches!(&*err, corral_storage::error::ErrorKind::NotFound(_)) => {
                tracing::warn!(path = %path.display(), "descriptor disappeared during reconciliation");
                report.skipped.push((path, "file disappeared during reconciliation".to_string()));
                continue;
            },
            Err(_) => exn::bail!(ErrorKind::StorageUnavailable),
        };

        let descriptor = match parse::parse_bytes(&bytes) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping malformed descriptor");
                report.skipped.push((path, (*err).to_string()));
                continue;
            },
        };

        let vlnv = descriptor.vlnv.to_string();
        if let Some(winner) = claimed.get(&vlnv) {
            tracing::warn!(
                %vlnv,
                winner = %winner.display(),
                loser = %path.display(),
                "ambiguous index entry: two descriptors resolve to the same VLNV",
            );
            report.ambiguous.push((vlnv, path));
            continue;
        }
        claimed.insert(vlnv, path.clone());

        // Pair the descriptor with its sibling signature, when present.
        // Signature problems are metadata, never a blocking condition for
        // indexing.
        let expected_signature = PathBuf::from(format!("{}.{SIGNATURE_EXTENSION}", path.display()));
        let (signature_path, signature_content, signature_state) = match signature_paths
            .contains(&expected_signature)
        {
            false => (None, None, SignatureState::Unsigned),
            true => match backend.read(&expected_signature).await {
                Err(err) if matches!(&*err, corral_storage::error::ErrorKind::NotFound(_)) => {
                    (None, None, SignatureState::Unsigned)
                },
                Err(_) => exn::bail!(ErrorKind::StorageUnavailable),
                Ok(signature_bytes) => {
                    let state = match sign::parse_signature_bytes(&signature_bytes) {
                        Ok(signature_file) if signature_file.vlnv != descriptor.vlnv => {
                            tracing::warn!(path = %expected_signature.display(), "signature names a different VLNV");
                            SignatureState::Invalid
                        },
                        Ok(signature_file) => sign::verify(&bytes, &signature_file, trust).into(),
                        Err(err) => {
                            tracing::warn!(path = %expected_signature.display(), error = %err, "unparseable signature file");
                            SignatureState::Unverified
                        },
                    };
                    let content = String::from_utf8_lossy(&signature_bytes).into_owned();
                    (Some(expected_signature), Some(content), state)
                },
            },
        };

        records.push(PackageRecord {
            vlnv: descriptor.vlnv.clone(),
            description: descriptor.description.clone(),
            license: descriptor.license.clone(),
            descriptor_path: path,
            signature_path,
            content_hash: blake3::hash(&bytes).to_string(),
            // parse_bytes already established the content is valid UTF-8.
            content: String::from_utf8_lossy(&bytes).into_owned(),
            signature_content,
            signature: signature_state,
            provider: descriptor.provider.as_ref().map(|p| p.name.clone()),
            filesets: descriptor.filesets.clone(),
            indexed_at: OffsetDateTime::now_utc(),
        });
    }

    let stats = repo.replace_snapshot(&records).await.or_raise(|| ErrorKind::Index)?;
    report.indexed = stats.indexed;
    report.pruned = stats.pruned;
    tracing::info!(
        indexed = report.indexed,
        pruned = report.pruned,
        skipped = report.skipped.len(),
        ambiguous = report.ambiguous.len(),
        "reconciliation complete",
    );
    Ok(report)
}
