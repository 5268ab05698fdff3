//! The catalog service facade.
//!
//! Owns the storage handle, index repository, trust material, license set
//! and publish policy, and exposes the operation surface an HTTP layer (or
//! the CLI) routes to. Error kinds carry their HTTP status via
//! [`ErrorKind::http_status`](crate::error::ErrorKind::http_status).

use crate::error::{ErrorKind, Result};
use crate::lock::KeyedLock;
use crate::pipeline::{self, Policy, Published, Submission, Validated};
use crate::query;
use crate::reconcile::{self, ReconcileReport};
use corral_descriptor::{SpdxLicenses, TrustStore};
use corral_index::{PackageRecord, PackageSummary, Repository, VendorSummary};
use corral_storage::BackendHandle;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// The catalog service.
pub struct Catalog {
    backend: BackendHandle,
    repo: Repository,
    trust: TrustStore,
    /// Reloadable via [`refresh_licenses`](Self::refresh_licenses).
    spdx: RwLock<SpdxLicenses>,
    spdx_path: Option<PathBuf>,
    policy: Policy,
    publish_locks: KeyedLock,
}

impl Catalog {
    pub fn new(backend: BackendHandle, repo: Repository) -> Self {
        Self {
            backend,
            repo,
            trust: TrustStore::default(),
            spdx: RwLock::new(SpdxLicenses::default()),
            spdx_path: None,
            policy: Policy::default(),
            publish_locks: KeyedLock::new(),
        }
    }

    pub fn with_trust(mut self, trust: TrustStore) -> Self {
        self.trust = trust;
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_licenses(mut self, spdx: SpdxLicenses) -> Self {
        self.spdx = RwLock::new(spdx);
        self
    }

    /// Configure the on-disk SPDX list location used by
    /// [`refresh_licenses`](Self::refresh_licenses).
    pub fn with_licenses_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.spdx_path = Some(path.into());
        self
    }

    /// Liveness check.
    pub fn health(&self) -> &'static str {
        "ok"
    }

    /// List indexed packages, optionally filtered by a case-insensitive
    /// VLNV substring.
    pub async fn list(&self, filter: Option<&str>) -> Result<Vec<PackageSummary>> {
        query::list(&self.repo, filter).await
    }

    /// Fetch one package record (including its raw descriptor content).
    pub async fn get(&self, vlnv: &str) -> Result<PackageRecord> {
        query::get(&self.repo, vlnv).await
    }

    /// Derived vendor listing.
    pub async fn vendors(&self) -> Result<Vec<VendorSummary>> {
        query::vendors(&self.repo).await
    }

    /// Zip bundle of every indexed descriptor and signature.
    pub async fn archive(&self) -> Result<Vec<u8>> {
        query::archive(&self.repo).await
    }

    /// Run the validation pipeline without touching storage or the index.
    pub async fn validate(&self, submission: &Submission) -> Result<Validated> {
        let spdx = self.spdx.read().await;
        pipeline::validate(submission, &self.trust, &spdx, &self.policy)
    }

    /// Validate, write through storage, and index the new package.
    pub async fn publish(&self, submission: &Submission) -> Result<Published> {
        let spdx = self.spdx.read().await;
        pipeline::publish(
            &self.backend,
            &self.repo,
            &self.publish_locks,
            submission,
            &self.trust,
            &spdx,
            &self.policy,
        )
        .await
    }

    /// Administrative trigger: full index rebuild from storage.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        reconcile::reconcile(&self.backend, &self.repo, &self.trust).await
    }

    /// Startup trigger: rebuild only when the index is empty.
    pub async fn reconcile_if_empty(&self) -> Result<Option<ReconcileReport>> {
        reconcile::reconcile_if_empty(&self.backend, &self.repo, &self.trust).await
    }

    /// Administrative trigger: reload the SPDX license list from disk.
    ///
    /// Idempotent; returns the number of known license identifiers.
    pub async fn refresh_licenses(&self) -> Result<usize> {
        let Some(path) = &self.spdx_path else {
            exn::bail!(ErrorKind::Licenses("no SPDX license list path configured".to_string()));
        };
        let reloaded =
            SpdxLicenses::load(path).map_err(|err| exn::Exn::from(ErrorKind::Licenses((*err).to_string())))?;
        let count = reloaded.len();
        *self.spdx.write().await = reloaded;
        Ok(count)
    }
}
