//! Configuration loading and validation.
//!
//! Settings merge three layers, later layers overriding earlier ones:
//! serde defaults, an optional YAML file, and `CORRAL_`-prefixed environment
//! variables (nested keys separated by `__`, e.g. `CORRAL_INDEX__PATH`).

pub mod error;

use crate::error::{ErrorKind, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "CORRAL_";
const CONFIG_FILENAME: &str = "corral.yaml";

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub index: IndexSettings,
    pub publish: PublishSettings,
    pub trust: TrustSettings,
    pub spdx: SpdxSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage: StorageSettings::default(),
            index: IndexSettings::default(),
            publish: PublishSettings::default(),
            trust: TrustSettings::default(),
            spdx: SpdxSettings::default(),
        }
    }
}

/// Which storage backend holds the canonical store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageSettings {
    /// A directory on the local filesystem.
    Local { root: PathBuf },
    /// An S3-compatible bucket.
    S3 {
        bucket: String,
        region: String,
        #[serde(default)]
        prefix: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
        key_id: String,
        key_secret: String,
    },
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self::Local { root: data_dir().join("store") }
    }
}

/// Where the index database lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub path: PathBuf,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self { path: data_dir().join("index.db") }
    }
}

/// Publish policy knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    /// Allow re-publishing an existing VLNV. Published versions are
    /// immutable by default.
    pub allow_overwrite: bool,
    pub max_descriptor_bytes: usize,
    pub max_signature_bytes: usize,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            allow_overwrite: false,
            max_descriptor_bytes: 64 * 1024,
            max_signature_bytes: 10 * 1024,
        }
    }
}

/// Hex-encoded Ed25519 public keys trusted for signature verification.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustSettings {
    pub keys: Vec<String>,
}

/// SPDX license list location.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpdxSettings {
    pub licenses_path: Option<PathBuf>,
}

/// Platform data directory for corral, with a working-directory fallback.
fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "corral")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("corral-data"))
}

/// Default configuration file location.
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "corral")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILENAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME))
}

impl Settings {
    /// Load settings from defaults, an optional YAML file, and the
    /// environment.
    ///
    /// A missing configuration file is fine (defaults + environment apply);
    /// a file that exists but does not parse is an error.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let path = config_file.map(Path::to_path_buf).unwrap_or_else(default_config_path);
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if path.exists() {
            figment = figment.merge(Yaml::file(&path));
        } else if config_file.is_some() {
            // An explicitly named file must exist; silently ignoring a typo
            // in `--config` would load defaults the operator didn't ask for.
            exn::bail!(ErrorKind::Load(format!("configuration file not found: {}", path.display())));
        }
        let settings: Settings = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|err| exn::Exn::from(ErrorKind::Load(err.to_string())))?;
        settings.validate()?;
        tracing::debug!(config = %path.display(), "configuration loaded");
        Ok(settings)
    }

    /// Sanity-check the merged settings.
    pub fn validate(&self) -> Result<()> {
        if self.publish.max_descriptor_bytes == 0 {
            exn::bail!(ErrorKind::Invalid("publish.max_descriptor_bytes must be non-zero".to_string()));
        }
        if self.publish.max_signature_bytes == 0 {
            exn::bail!(ErrorKind::Invalid("publish.max_signature_bytes must be non-zero".to_string()));
        }
        if let StorageSettings::S3 { bucket, region, .. } = &self.storage {
            if bucket.is_empty() {
                exn::bail!(ErrorKind::Invalid("storage.bucket must not be empty".to_string()));
            }
            if region.is_empty() {
                exn::bail!(ErrorKind::Invalid("storage.region must not be empty".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(!settings.publish.allow_overwrite);
        assert_eq!(settings.publish.max_descriptor_bytes, 64 * 1024);
        assert_eq!(settings.publish.max_signature_bytes, 10 * 1024);
        assert!(settings.trust.keys.is_empty());
        assert!(matches!(settings.storage, StorageSettings::Local { .. }));
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corral.yaml");
        std::fs::write(
            &path,
            concat!(
                "storage:\n",
                "  kind: local\n",
                "  root: /srv/cores\n",
                "index:\n",
                "  path: /srv/index.db\n",
                "publish:\n",
                "  allow_overwrite: true\n",
            ),
        )
        .unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.storage, StorageSettings::Local { root: PathBuf::from("/srv/cores") });
        assert_eq!(settings.index.path, PathBuf::from("/srv/index.db"));
        assert!(settings.publish.allow_overwrite);
        // Untouched sections keep their defaults.
        assert_eq!(settings.publish.max_descriptor_bytes, 64 * 1024);
    }

    #[test]
    fn test_load_s3_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corral.yaml");
        std::fs::write(
            &path,
            concat!(
                "storage:\n",
                "  kind: s3\n",
                "  bucket: cores\n",
                "  region: us-east-1\n",
                "  key_id: AKIA123\n",
                "  key_secret: secret\n",
            ),
        )
        .unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert!(matches!(settings.storage, StorageSettings::S3 { ref bucket, .. } if bucket == "cores"));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let err = Settings::load(Some(Path::new("/nonexistent/corral.yaml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Load(_)));
    }

    #[rstest::rstest]
    #[case::descriptor_limit(true)]
    #[case::signature_limit(false)]
    fn test_zero_limits_rejected(#[case] descriptor: bool) {
        let mut settings = Settings::default();
        match descriptor {
            true => settings.publish.max_descriptor_bytes = 0,
            false => settings.publish.max_signature_bytes = 0,
        }
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_empty_bucket_rejected() {
        let mut settings = Settings::default();
        settings.storage = StorageSettings::S3 {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            prefix: None,
            endpoint: None,
            key_id: "k".to_string(),
            key_secret: "s".to_string(),
        };
        assert!(settings.validate().is_err());
    }
}
