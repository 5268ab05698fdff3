//! The catalog core: reconciliation, the validation/publish pipeline, and
//! the read-only query layer.
//!
//! The canonical source of truth is the storage backend; the index database
//! is a rebuildable cache over it. Uploads flow through schema validation,
//! the domain parser and (optionally) signature verification before anything
//! touches storage, and a successful publish performs an incremental index
//! upsert rather than a full rebuild.

pub mod error;
mod lock;
pub mod pipeline;
pub mod query;
pub mod reconcile;
mod service;

pub use crate::pipeline::{Channel, Policy, Published, Submission, Validated};
pub use crate::reconcile::ReconcileReport;
pub use crate::service::Catalog;
