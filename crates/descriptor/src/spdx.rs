//! The SPDX license identifier set.
//!
//! Loaded from a `licenses.json` file in the official SPDX list format.
//! Fetching/refreshing that file is an operational concern outside this
//! crate; reloading an updated file is idempotent.

use crate::error::{ErrorKind, Issue, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::instrument;

#[derive(Deserialize)]
struct LicenseList {
    #[serde(default)]
    licenses: Vec<LicenseEntry>,
}

#[derive(Deserialize)]
struct LicenseEntry {
    #[serde(rename = "licenseId")]
    license_id: String,
    #[serde(default, rename = "seeAlso")]
    see_also: Vec<String>,
    #[serde(default)]
    reference: Option<String>,
}

/// The set of known SPDX license identifiers.
#[derive(Debug, Clone, Default)]
pub struct SpdxLicenses {
    /// License ID -> details URL (when the list provides one).
    licenses: HashMap<String, Option<String>>,
}

impl SpdxLicenses {
    /// Load the license set from a `licenses.json` file.
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| exn::Exn::from(ErrorKind::Spdx(format!("cannot read {}: {err}", path.display()))))?;
        let list: LicenseList = serde_json::from_str(&raw)
            .map_err(|err| exn::Exn::from(ErrorKind::Spdx(format!("cannot parse {}: {err}", path.display()))))?;
        let licenses = list
            .licenses
            .into_iter()
            .map(|entry| {
                let url = entry.see_also.into_iter().next().or(entry.reference);
                (entry.license_id, url)
            })
            .collect::<HashMap<_, _>>();
        tracing::info!(count = licenses.len(), "loaded SPDX license list");
        Ok(Self { licenses })
    }

    /// Build a set from bare identifiers (mainly for tests and defaults).
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            licenses: ids.into_iter().map(|id| (id.into(), None)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.licenses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.licenses.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.licenses.contains_key(id)
    }

    /// Details URL for a license ID, when the list provides one.
    pub fn reference_url(&self, id: &str) -> Option<&str> {
        self.licenses.get(id).and_then(|url| url.as_deref())
    }

    /// Check a declared license identifier.
    ///
    /// An empty set means no license data is available; validation is skipped
    /// with a warning instead of rejecting every submission that declares a
    /// license.
    pub fn check(&self, id: &str) -> Option<Issue> {
        if self.is_empty() {
            tracing::warn!(license = id, "SPDX license list is empty; skipping license validation");
            return None;
        }
        match self.contains(id) {
            true => None,
            false => Some(Issue::parse("license", format!("{id} is not a valid SPDX license identifier"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SpdxLicenses {
        SpdxLicenses::from_ids(["MIT", "Apache-2.0", "GPL-3.0-or-later"])
    }

    #[test]
    fn test_contains() {
        let spdx = sample();
        assert!(spdx.contains("MIT"));
        assert!(!spdx.contains("mit"));
        assert!(!spdx.contains("NotALicense"));
    }

    #[test]
    fn test_check() {
        let spdx = sample();
        assert!(spdx.check("MIT").is_none());
        let issue = spdx.check("NotALicense").unwrap();
        assert_eq!(issue.path, "license");
        assert!(issue.message.contains("NotALicense"));
    }

    #[test]
    fn test_empty_set_skips_validation() {
        let spdx = SpdxLicenses::default();
        assert!(spdx.check("AnythingGoes").is_none());
    }

    #[test]
    fn test_load_list_format() {
        let dir = std::env::temp_dir().join("corral-spdx-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("licenses.json");
        std::fs::write(
            &path,
            r#"{"licenses": [
                {"licenseId": "MIT", "seeAlso": ["https://opensource.org/license/mit/"]},
                {"licenseId": "0BSD", "reference": "https://spdx.org/licenses/0BSD.html"}
            ]}"#,
        )
        .unwrap();
        let spdx = SpdxLicenses::load(&path).unwrap();
        assert_eq!(spdx.len(), 2);
        assert_eq!(spdx.reference_url("MIT"), Some("https://opensource.org/license/mit/"));
        assert_eq!(spdx.reference_url("0BSD"), Some("https://spdx.org/licenses/0BSD.html"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_missing_file() {
        let err = SpdxLicenses::load(Path::new("/nonexistent/licenses.json")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Spdx(_)));
    }
}
