//! In-memory representation of a parsed core descriptor.

use crate::vlnv::Vlnv;
use serde::{Deserialize, Serialize};

/// A fully parsed core descriptor.
///
/// Section order from the source document is preserved in `filesets` and
/// `targets`.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub vlnv: Vlnv,
    pub description: Option<String>,
    /// SPDX license identifier, when declared. Membership in the SPDX set is
    /// checked by the pipeline, not the parser.
    pub license: Option<String>,
    pub filesets: Vec<Fileset>,
    pub targets: Vec<Target>,
    /// Present when the descriptor delegates source retrieval to an external
    /// provider instead of co-locating files with the descriptor.
    pub provider: Option<Provider>,
}

impl Descriptor {
    /// Whether the descriptor delegates source retrieval externally.
    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }
}

/// A named group of source/include files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fileset {
    pub name: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub depend: Vec<Dependency>,
}

/// A dependency of a fileset on another core, optionally conditioned on a
/// target parameter (`cond? (vendor:lib:name)` syntax).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub core: String,
    #[serde(default)]
    pub condition: Option<String>,
}

/// A build or simulation target configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub filesets: Vec<String>,
    #[serde(default)]
    pub default_tool: Option<String>,
    #[serde(default)]
    pub flow: Option<String>,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

/// An external provider section.
///
/// Anything beyond the provider name is provider-specific and carried
/// opaquely; the catalog only needs to know the delegation exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    #[serde(default)]
    pub options: serde_json::Value,
}
