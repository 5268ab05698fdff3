//! The VLNV (Vendor:Library:Name:Version) package identifier.

use crate::error::{Issue, Issues};
use crate::sanitize::sanitize_string;
use std::str::FromStr;

/// A fully-qualified core identifier: `vendor:library:name:version`.
///
/// The library segment may be empty (some vendors publish cores without a
/// library grouping); vendor, name and version must not be. The version is a
/// full semantic version.
///
/// # Examples
///
/// ```
/// use corral_descriptor::Vlnv;
///
/// let vlnv: Vlnv = "acme:lib1:foo:1.2.3-rc1".parse().unwrap();
/// assert_eq!(vlnv.vendor, "acme");
/// assert_eq!(vlnv.version.major, 1);
/// assert_eq!(vlnv.to_string(), "acme:lib1:foo:1.2.3-rc1");
/// assert!("not-a-vlnv".parse::<Vlnv>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Vlnv {
    pub vendor: String,
    pub library: String,
    pub name: String,
    pub version: semver::Version,
}

impl Vlnv {
    /// A filesystem- and URL-safe rendition of this identifier, with colons
    /// and other problematic characters replaced by underscores.
    pub fn sanitized(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            sanitize_string(&self.vendor),
            sanitize_string(&self.library),
            sanitize_string(&self.name),
            sanitize_string(&self.version.to_string()),
        )
    }

    /// Canonical storage filename for this core's descriptor.
    pub fn descriptor_filename(&self) -> String {
        format!("{}.{}", self.sanitized(), crate::DESCRIPTOR_EXTENSION)
    }

    /// Canonical storage filename for this core's detached signature.
    pub fn signature_filename(&self) -> String {
        format!("{}.{}", self.descriptor_filename(), crate::SIGNATURE_EXTENSION)
    }
}

impl std::fmt::Display for Vlnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}:{}", self.vendor, self.library, self.name, self.version)
    }
}

impl FromStr for Vlnv {
    type Err = Issues;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 {
            return Err(Issue::parse(
                "name",
                format!("VLNV `{s}` must have exactly four colon-separated segments (vendor:library:name:version)"),
            )
            .into());
        }
        let mut issues = Vec::new();
        let (vendor, library, name, version) = (parts[0], parts[1], parts[2], parts[3]);
        if vendor.is_empty() {
            issues.push(Issue::parse("name", "VLNV vendor segment must not be empty"));
        }
        if name.is_empty() {
            issues.push(Issue::parse("name", "VLNV name segment must not be empty"));
        }
        let version = match semver::Version::parse(version) {
            Ok(version) => Some(version),
            Err(err) => {
                issues.push(Issue::parse("name", format!("invalid version `{version}`: {err}")));
                None
            },
        };
        match (version, issues.is_empty()) {
            (Some(version), true) => Ok(Self {
                vendor: vendor.to_string(),
                library: library.to_string(),
                name: name.to_string(),
                version,
            }),
            _ => Err(Issues(issues)),
        }
    }
}
