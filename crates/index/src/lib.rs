//! SQLite cache database for the core package index.
//!
//! This crate provides the ephemeral index that tracks the current known
//! state of the canonical store. The database is not the source of truth -
//! the descriptor files in the storage backend are. If the database is
//! deleted, it is rebuilt by a reconciliation pass.
//!
//! # Architecture
//! One denormalized row per published package version, keyed by VLNV.
//! Vendor and library listings are aggregation views over those rows, not
//! independent entities.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{PackageRecord, PackageSummary, SignatureState, VendorSummary};
pub use crate::repo::{Repository, SnapshotStats};
