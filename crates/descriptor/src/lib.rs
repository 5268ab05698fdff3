//! CAPI2 core descriptor handling.
//!
//! A descriptor is a YAML document starting with a `CAPI=2:` header line that
//! declares a package by its VLNV (Vendor:Library:Name:Version) plus
//! metadata: description, SPDX license, filesets, targets, and an optional
//! provider section delegating source retrieval to an external location.
//!
//! Validation happens twice, deliberately: the [`schema`] module checks the
//! raw document shape against a published JSON Schema, and [`parse`] applies
//! the domain grammar (VLNV decomposition, semver versions, dependency
//! syntax). Both passes collect every violation they find so a caller can
//! report them all at once.

pub mod error;
mod models;
pub mod parse;
mod sanitize;
pub mod schema;
pub mod sign;
pub mod spdx;
mod vlnv;

pub use crate::error::{Issue, IssueKind, Issues};
pub use crate::models::{Dependency, Descriptor, Fileset, Provider, Target};
pub use crate::sanitize::sanitize_string;
pub use crate::sign::{SignatureEntry, SignatureFile, TrustStore, Verification};
pub use crate::spdx::SpdxLicenses;
pub use crate::vlnv::Vlnv;

/// File extension for core descriptor files.
pub const DESCRIPTOR_EXTENSION: &str = "core";
/// File extension for detached signature files.
pub const SIGNATURE_EXTENSION: &str = "sig";
/// Required first-line header of every descriptor.
pub const DESCRIPTOR_HEADER: &str = "CAPI=2:";
