//! Index models and their database row conversions.

use crate::error::{Error, ErrorKind};
use corral_descriptor::{Fileset, Verification, Vlnv};
use derive_more::Display;
use exn::ResultExt;
use serde::Serialize;
use std::path::PathBuf;
use time::OffsetDateTime;

/// Signature status of an indexed package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureState {
    /// No signature file accompanies the descriptor.
    #[display("unsigned")]
    Unsigned,
    /// A signature file exists but no trusted key applies to it.
    #[display("unverified")]
    Unverified,
    /// A trusted key's signature verified over the descriptor bytes.
    #[display("verified")]
    Verified,
    /// A trusted key is named but its signature does not verify.
    #[display("invalid")]
    Invalid,
}

impl std::str::FromStr for SignatureState {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsigned" => Ok(Self::Unsigned),
            "unverified" => Ok(Self::Unverified),
            "verified" => Ok(Self::Verified),
            "invalid" => Ok(Self::Invalid),
            _ => Err(()),
        }
    }
}

impl From<Verification> for SignatureState {
    fn from(verification: Verification) -> Self {
        match verification {
            Verification::Verified => Self::Verified,
            Verification::Unverified => Self::Unverified,
            Verification::Invalid => Self::Invalid,
        }
    }
}

/// One published package version, as stored in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageRecord {
    pub vlnv: Vlnv,
    pub description: Option<String>,
    pub license: Option<String>,
    /// Canonical path of the descriptor file in the storage backend.
    pub descriptor_path: PathBuf,
    pub signature_path: Option<PathBuf>,
    /// Raw descriptor text; reads are served from the index alone.
    pub content: String,
    /// BLAKE3 hash of the raw descriptor bytes.
    pub content_hash: String,
    pub signature_content: Option<String>,
    pub signature: SignatureState,
    /// Provider name when the descriptor delegates source retrieval.
    pub provider: Option<String>,
    pub filesets: Vec<Fileset>,
    pub indexed_at: OffsetDateTime,
}

/// Listing row for the query layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSummary {
    pub vlnv: String,
    pub description: Option<String>,
    pub license: Option<String>,
    pub signature: SignatureState,
    pub provider: Option<String>,
}

/// Derived vendor aggregation over the package rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VendorSummary {
    pub vendor: String,
    pub libraries: u64,
    pub packages: u64,
}

#[derive(sqlx::FromRow)]
pub(crate) struct PackageRow {
    pub(crate) vlnv: String,
    pub(crate) description: Option<String>,
    pub(crate) license: Option<String>,
    pub(crate) descriptor_path: String,
    pub(crate) signature_path: Option<String>,
    pub(crate) content: String,
    pub(crate) content_hash: String,
    pub(crate) signature_content: Option<String>,
    pub(crate) signature_state: String,
    pub(crate) provider: Option<String>,
    pub(crate) filesets: String,
    pub(crate) indexed_at: i64,
}

impl TryFrom<&PackageRecord> for PackageRow {
    type Error = Error;
    fn try_from(record: &PackageRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            vlnv: record.vlnv.to_string(),
            description: record.description.clone(),
            license: record.license.clone(),
            descriptor_path: record
                .descriptor_path
                .to_str()
                .ok_or_else(|| exn::Exn::from(ErrorKind::InvalidData("descriptor path")))?
                .to_string(),
            signature_path: record
                .signature_path
                .as_ref()
                .map(|p| {
                    p.to_str()
                        .map(str::to_string)
                        .ok_or_else(|| exn::Exn::from(ErrorKind::InvalidData("signature path")))
                })
                .transpose()?,
            content: record.content.clone(),
            content_hash: record.content_hash.clone(),
            signature_content: record.signature_content.clone(),
            signature_state: record.signature.to_string(),
            provider: record.provider.clone(),
            filesets: serde_json::to_string(&record.filesets).or_raise(|| ErrorKind::InvalidData("filesets"))?,
            indexed_at: record.indexed_at.unix_timestamp(),
        })
    }
}

impl TryFrom<PackageRow> for PackageRecord {
    type Error = Error;
    fn try_from(row: PackageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            vlnv: row.vlnv.parse::<Vlnv>().map_err(|_| exn::Exn::from(ErrorKind::InvalidData("vlnv")))?,
            description: row.description,
            license: row.license,
            descriptor_path: PathBuf::from(row.descriptor_path),
            signature_path: row.signature_path.map(PathBuf::from),
            content: row.content,
            content_hash: row.content_hash,
            signature_content: row.signature_content,
            signature: row
                .signature_state
                .parse::<SignatureState>()
                .map_err(|_| exn::Exn::from(ErrorKind::InvalidData("signature state")))?,
            provider: row.provider,
            filesets: serde_json::from_str(&row.filesets).or_raise(|| ErrorKind::InvalidData("filesets"))?,
            indexed_at: OffsetDateTime::from_unix_timestamp(row.indexed_at)
                .or_raise(|| ErrorKind::InvalidData("indexed at"))?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct SummaryRow {
    pub(crate) vlnv: String,
    pub(crate) description: Option<String>,
    pub(crate) license: Option<String>,
    pub(crate) signature_state: String,
    pub(crate) provider: Option<String>,
}

impl TryFrom<SummaryRow> for PackageSummary {
    type Error = Error;
    fn try_from(row: SummaryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            vlnv: row.vlnv,
            description: row.description,
            license: row.license,
            signature: row
                .signature_state
                .parse::<SignatureState>()
                .map_err(|_| exn::Exn::from(ErrorKind::InvalidData("signature state")))?,
            provider: row.provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PackageRecord {
        PackageRecord {
            vlnv: "acme:lib1:foo:1.0.0".parse().unwrap(),
            description: Some("a core".to_string()),
            license: Some("MIT".to_string()),
            descriptor_path: PathBuf::from("acme_lib1_foo_1.0.0.core"),
            signature_path: None,
            content: "CAPI=2:\nname: acme:lib1:foo:1.0.0\n".to_string(),
            content_hash: "abc123".to_string(),
            signature_content: None,
            signature: SignatureState::Unsigned,
            provider: None,
            filesets: vec![],
            indexed_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_record_to_row_and_back() {
        let record = record();
        let row = PackageRow::try_from(&record).unwrap();
        assert_eq!(row.vlnv, "acme:lib1:foo:1.0.0");
        assert_eq!(row.signature_state, "unsigned");
        let restored = PackageRecord::try_from(row).unwrap();
        assert_eq!(restored.vlnv, record.vlnv);
        assert_eq!(restored.content, record.content);
        // Converting to a Unix timestamp (seconds) strips sub-second precision.
        assert_eq!(restored.indexed_at.unix_timestamp(), record.indexed_at.unix_timestamp());
    }

    #[test]
    fn test_signature_state_round_trip() {
        for state in [
            SignatureState::Unsigned,
            SignatureState::Unverified,
            SignatureState::Verified,
            SignatureState::Invalid,
        ] {
            assert_eq!(state.to_string().parse::<SignatureState>().unwrap(), state);
        }
        assert!("bogus".parse::<SignatureState>().is_err());
    }

    #[test]
    fn test_filesets_serialized_as_json() {
        let mut record = record();
        record.filesets = vec![Fileset {
            name: "rtl".to_string(),
            files: vec!["top.v".to_string()],
            file_type: Some("verilogSource".to_string()),
            depend: vec![],
        }];
        let row = PackageRow::try_from(&record).unwrap();
        assert!(row.filesets.contains("verilogSource"));
        let restored = PackageRecord::try_from(row).unwrap();
        assert_eq!(restored.filesets, record.filesets);
    }
}
