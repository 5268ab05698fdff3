//! Repository for package rows in the index database.
//!
//! The index is a cache over the canonical store: rows are created by the
//! reconciler (bulk) or the publish pipeline (incremental), and removed only
//! by reconciliation pruning. Nothing here talks to the storage backend.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{PackageRecord, PackageRow, PackageSummary, SummaryRow, VendorSummary};
use exn::ResultExt;
use sqlx::{Sqlite, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use tracing::instrument;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// Outcome of a transactional snapshot replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotStats {
    /// Rows inserted or updated from the snapshot.
    pub indexed: u64,
    /// Rows removed because their descriptor path left the snapshot.
    pub pruned: u64,
}

/// Repository for managing package entries in the index database.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn path_str(path: impl AsRef<Path>) -> Result<String> {
        Ok(path
            .as_ref()
            .to_str()
            .ok_or_else(|| exn::Exn::from(ErrorKind::InvalidData("path")))?
            .to_string())
    }

    /// Bind the full column tuple for an insert or upsert.
    fn bind_record<'q>(query: SqliteQuery<'q>, record: &PackageRecord) -> Result<SqliteQuery<'q>> {
        let row = PackageRow::try_from(record)?;
        let version = &record.vlnv.version;
        let major = i64::try_from(version.major).or_raise(|| ErrorKind::InvalidData("version major"))?;
        let minor = i64::try_from(version.minor).or_raise(|| ErrorKind::InvalidData("version minor"))?;
        let patch = i64::try_from(version.patch).or_raise(|| ErrorKind::InvalidData("version patch"))?;
        Ok(query
            .bind(row.vlnv)
            .bind(record.vlnv.vendor.clone())
            .bind(record.vlnv.library.clone())
            .bind(record.vlnv.name.clone())
            .bind(version.to_string())
            .bind(major)
            .bind(minor)
            .bind(patch)
            .bind(version.pre.to_string())
            .bind(row.description)
            .bind(row.license)
            .bind(row.descriptor_path)
            .bind(row.signature_path)
            .bind(row.content)
            .bind(row.content_hash)
            .bind(row.signature_content)
            .bind(row.signature_state)
            .bind(row.provider)
            .bind(row.filesets)
            .bind(row.indexed_at))
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Insert a package record, failing if the VLNV is already indexed.
    ///
    /// This is the publish path: published versions are immutable, so the
    /// unique constraint doubles as the loser-detection for two racing
    /// publishes of the same VLNV.
    pub async fn insert_new(&self, record: &PackageRecord) -> Result<()> {
        let query = Self::bind_record(sqlx::query(include_str!("../queries/insert_package.sql")), record)?;
        query.execute(&self.pool).await.map_err(|err| match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                exn::Exn::from(ErrorKind::Duplicate(record.vlnv.to_string()))
            },
            _ => exn::Exn::from(ErrorKind::Database),
        })?;
        Ok(())
    }

    /// Insert or update a package record, keyed by VLNV.
    ///
    /// Used by the reconciler and by overwrite-enabled publishes.
    pub async fn upsert(&self, record: &PackageRecord) -> Result<()> {
        let query = Self::bind_record(sqlx::query(include_str!("../queries/upsert_package.sql")), record)?;
        query.execute(&self.pool).await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    // =========================================================================
    // Get/Fetch
    // =========================================================================

    /// Get a package by its VLNV string.
    pub async fn get_by_vlnv(&self, vlnv: impl AsRef<str>) -> Result<Option<PackageRecord>> {
        let row: Option<PackageRow> = sqlx::query_as(include_str!("../queries/get_by_vlnv.sql"))
            .bind(vlnv.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(PackageRecord::try_from).transpose()
    }

    /// Get a package by its descriptor path in storage.
    pub async fn get_by_path(&self, path: impl AsRef<Path>) -> Result<Option<PackageRecord>> {
        let row: Option<PackageRow> = sqlx::query_as(include_str!("../queries/get_by_path.sql"))
            .bind(Self::path_str(path)?)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(PackageRecord::try_from).transpose()
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// List package summaries, optionally filtered by a case-insensitive
    /// substring of the VLNV. Ordered by lowercased VLNV.
    pub async fn list(&self, filter: Option<&str>) -> Result<Vec<PackageSummary>> {
        let rows: Vec<SummaryRow> = sqlx::query_as(include_str!("../queries/list_summaries.sql"))
            .bind(filter.unwrap_or(""))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(PackageSummary::try_from).collect()
    }

    /// List every indexed package with its full content.
    ///
    /// Used by the archive bundler; ordered by lowercased VLNV.
    pub async fn list_all(&self) -> Result<Vec<PackageRecord>> {
        let rows: Vec<PackageRow> = sqlx::query_as(include_str!("../queries/list_all.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(PackageRecord::try_from).collect()
    }

    /// List all indexed descriptor paths.
    pub async fn list_paths(&self) -> Result<Vec<String>> {
        let paths: Vec<String> = sqlx::query_scalar(include_str!("../queries/list_paths.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(paths)
    }

    /// Count indexed packages. Zero means a reconciliation has never run
    /// (or the store really is empty).
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(include_str!("../queries/count.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Derived vendor aggregation: library and package counts per vendor.
    pub async fn list_vendors(&self) -> Result<Vec<VendorSummary>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(include_str!("../queries/list_vendors.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows
            .into_iter()
            .map(|(vendor, libraries, packages)| VendorSummary {
                vendor,
                libraries: u64::try_from(libraries).unwrap_or(0),
                packages: u64::try_from(packages).unwrap_or(0),
            })
            .collect())
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a package row by its descriptor path.
    ///
    /// Returns `true` if a row was deleted.
    pub async fn delete_by_path(&self, path: impl AsRef<Path>) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_by_path.sql"))
            .bind(Self::path_str(path)?)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Replace the index content with a reconciled snapshot, atomically.
    ///
    /// Every record in the snapshot is upserted and every row whose
    /// descriptor path is absent from the snapshot is pruned, all inside one
    /// transaction: the swap either fully commits or leaves the previous
    /// index state entirely untouched.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn replace_snapshot(&self, records: &[PackageRecord]) -> Result<SnapshotStats> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        for record in records {
            // A descriptor file may have changed its VLNV since the last
            // pass; clear any row still holding this path under another key
            // so the path uniqueness constraint can't reject the upsert.
            sqlx::query(include_str!("../queries/delete_conflicting_path.sql"))
                .bind(Self::path_str(&record.descriptor_path)?)
                .bind(record.vlnv.to_string())
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            let query = Self::bind_record(sqlx::query(include_str!("../queries/upsert_package.sql")), record)?;
            query.execute(&mut *tx).await.or_raise(|| ErrorKind::Database)?;
        }

        let keep: HashSet<String> =
            records.iter().map(|r| Self::path_str(&r.descriptor_path)).collect::<Result<_>>()?;
        let existing: Vec<String> = sqlx::query_scalar(include_str!("../queries/list_paths.sql"))
            .fetch_all(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let mut pruned = 0u64;
        for path in existing.into_iter().filter(|path| !keep.contains(path)) {
            sqlx::query(include_str!("../queries/delete_by_path.sql"))
                .bind(&path)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            tracing::info!(path, "pruned package whose descriptor left storage");
            pruned += 1;
        }

        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(SnapshotStats { indexed: records.len() as u64, pruned })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignatureState;
    use std::path::PathBuf;
    use time::OffsetDateTime;

    fn record(vlnv: &str, path: &str) -> PackageRecord {
        PackageRecord {
            vlnv: vlnv.parse().unwrap(),
            description: Some("test core".to_string()),
            license: Some("MIT".to_string()),
            descriptor_path: PathBuf::from(path),
            signature_path: None,
            content: format!("CAPI=2:\nname: {vlnv}\n"),
            content_hash: format!("hash-of-{path}"),
            signature_content: None,
            signature: SignatureState::Unsigned,
            provider: None,
            filesets: vec![],
            indexed_at: OffsetDateTime::now_utc(),
        }
    }

    async fn repo() -> Repository {
        let db = Database::connect_in_memory().await.unwrap();
        Repository::from(&db)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = repo().await;
        repo.insert_new(&record("acme:lib1:foo:1.0.0", "acme_lib1_foo_1.0.0.core")).await.unwrap();
        let fetched = repo.get_by_vlnv("acme:lib1:foo:1.0.0").await.unwrap().unwrap();
        assert_eq!(fetched.vlnv.to_string(), "acme:lib1:foo:1.0.0");
        assert!(repo.get_by_vlnv("acme:lib1:bar:1.0.0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_duplicate_vlnv_rejected() {
        let repo = repo().await;
        repo.insert_new(&record("acme:lib1:foo:1.0.0", "a.core")).await.unwrap();
        let err = repo.insert_new(&record("acme:lib1:foo:1.0.0", "b.core")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Duplicate(vlnv) if vlnv == "acme:lib1:foo:1.0.0"));
        // Exactly one row for the VLNV remains.
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_updates_in_place() {
        let repo = repo().await;
        repo.upsert(&record("acme:lib1:foo:1.0.0", "a.core")).await.unwrap();
        let mut updated = record("acme:lib1:foo:1.0.0", "a.core");
        updated.description = Some("updated".to_string());
        repo.upsert(&updated).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);
        let fetched = repo.get_by_vlnv("acme:lib1:foo:1.0.0").await.unwrap().unwrap();
        assert_eq!(fetched.description.as_deref(), Some("updated"));
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let repo = repo().await;
        repo.insert_new(&record("acme:lib1:foo:1.0.0", "a.core")).await.unwrap();
        repo.insert_new(&record("acme:lib1:bar:1.0.0", "b.core")).await.unwrap();
        repo.insert_new(&record("other:lib2:baz:1.0.0", "c.core")).await.unwrap();
        let all = repo.list(None).await.unwrap();
        assert_eq!(all.len(), 3);
        // Sorted by lowercased vlnv
        assert_eq!(all[0].vlnv, "acme:lib1:bar:1.0.0");
        let filtered = repo.list(Some("ACME")).await.unwrap();
        assert_eq!(filtered.len(), 2);
        let filtered = repo.list(Some("baz")).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].vlnv, "other:lib2:baz:1.0.0");
    }

    #[tokio::test]
    async fn test_get_by_path_and_delete() {
        let repo = repo().await;
        repo.insert_new(&record("acme:lib1:foo:1.0.0", "a.core")).await.unwrap();
        assert!(repo.get_by_path("a.core").await.unwrap().is_some());
        assert!(repo.delete_by_path("a.core").await.unwrap());
        assert!(!repo.delete_by_path("a.core").await.unwrap());
        assert!(repo.get_by_path("a.core").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_snapshot_upserts_and_prunes() {
        let repo = repo().await;
        repo.insert_new(&record("acme:lib1:old:1.0.0", "old.core")).await.unwrap();
        let snapshot = vec![
            record("acme:lib1:foo:1.0.0", "foo.core"),
            record("acme:lib1:bar:1.0.0", "bar.core"),
        ];
        let stats = repo.replace_snapshot(&snapshot).await.unwrap();
        assert_eq!(stats.indexed, 2);
        assert_eq!(stats.pruned, 1);
        assert_eq!(repo.count().await.unwrap(), 2);
        assert!(repo.get_by_vlnv("acme:lib1:old:1.0.0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_snapshot_is_idempotent() {
        let repo = repo().await;
        let snapshot = vec![
            record("acme:lib1:foo:1.0.0", "foo.core"),
            record("acme:lib1:bar:1.0.0", "bar.core"),
        ];
        repo.replace_snapshot(&snapshot).await.unwrap();
        let first = repo.list_all().await.unwrap();
        let stats = repo.replace_snapshot(&snapshot).await.unwrap();
        assert_eq!(stats.pruned, 0);
        let second = repo.list_all().await.unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.vlnv, b.vlnv);
            assert_eq!(a.content_hash, b.content_hash);
        }
    }

    #[tokio::test]
    async fn test_replace_snapshot_handles_vlnv_change_at_same_path() {
        let repo = repo().await;
        repo.insert_new(&record("acme:lib1:foo:1.0.0", "same.core")).await.unwrap();
        // The file at `same.core` now declares a different VLNV.
        let snapshot = vec![record("acme:lib1:foo:2.0.0", "same.core")];
        repo.replace_snapshot(&snapshot).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);
        assert!(repo.get_by_vlnv("acme:lib1:foo:2.0.0").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_vendors_aggregation() {
        let repo = repo().await;
        repo.insert_new(&record("acme:lib1:foo:1.0.0", "a.core")).await.unwrap();
        repo.insert_new(&record("acme:lib2:bar:1.0.0", "b.core")).await.unwrap();
        repo.insert_new(&record("other:lib1:baz:1.0.0", "c.core")).await.unwrap();
        let vendors = repo.list_vendors().await.unwrap();
        assert_eq!(vendors.len(), 2);
        assert_eq!(vendors[0].vendor, "acme");
        assert_eq!(vendors[0].libraries, 2);
        assert_eq!(vendors[0].packages, 2);
        assert_eq!(vendors[1].vendor, "other");
        assert_eq!(vendors[1].packages, 1);
    }

    #[tokio::test]
    async fn test_count_empty() {
        let repo = repo().await;
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
