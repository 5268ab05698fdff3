//! The validation/publish pipeline.
//!
//! Every submitted descriptor moves through the same stages:
//! `received → schema_checked → parsed → (signature_checked)? → accepted | rejected`.
//!
//! Schema validation and the domain parser BOTH always run, and their issues
//! are aggregated into one rejection, so a submission failing both reports
//! both. A `validate` run is side-effect free; a `publish` additionally
//! writes the descriptor (and signature) to the canonical path derived from
//! the VLNV, commits, and performs an incremental index insert for that
//! single VLNV. No partial writes: a storage failure aborts before any index
//! mutation.

use crate::error::{ErrorKind, Result};
use crate::lock::KeyedLock;
use corral_descriptor::{
    Descriptor, Issue, Issues, SpdxLicenses, TrustStore, Vlnv, parse, schema, sign,
};
use corral_index::{PackageRecord, Repository, SignatureState};
use corral_storage::BackendHandle;
use exn::ResultExt;
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing::instrument;

/// Where a submission came from.
///
/// Descriptors with a `provider` section delegate source retrieval to an
/// external location; accepting one through the anonymous web upload form
/// would let anybody point a published core at arbitrary sources. Such
/// descriptors are only accepted through direct API use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Api,
    WebUpload,
}

/// Publish policy knobs.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Allow re-publishing an existing VLNV (overwriting storage and index).
    /// Off by default: published versions are immutable.
    pub allow_overwrite: bool,
    /// Maximum accepted descriptor size in bytes.
    pub max_descriptor_bytes: usize,
    /// Maximum accepted signature file size in bytes.
    pub max_signature_bytes: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            allow_overwrite: false,
            max_descriptor_bytes: 64 * 1024,
            max_signature_bytes: 10 * 1024,
        }
    }
}

/// An uploaded descriptor with its optional detached signature.
#[derive(Debug, Clone)]
pub struct Submission {
    pub descriptor_name: String,
    pub descriptor: Vec<u8>,
    pub signature_name: Option<String>,
    pub signature: Option<Vec<u8>>,
    pub channel: Channel,
}

impl Submission {
    pub fn new(descriptor_name: impl Into<String>, descriptor: impl Into<Vec<u8>>) -> Self {
        Self {
            descriptor_name: descriptor_name.into(),
            descriptor: descriptor.into(),
            signature_name: None,
            signature: None,
            channel: Channel::Api,
        }
    }

    pub fn with_signature(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.signature_name = Some(name.into());
        self.signature = Some(bytes.into());
        self
    }

    pub fn via(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }
}

/// A submission that passed validation.
#[derive(Debug, Clone)]
pub struct Validated {
    pub vlnv: Vlnv,
    pub descriptor: Descriptor,
    /// The raw descriptor text exactly as submitted.
    pub content: String,
    pub signature_content: Option<String>,
    /// Signature trust result, surfaced as a flag: structural signature
    /// problems reject, a failed trust check does not.
    pub signature: SignatureState,
}

/// Result of a successful publish.
#[derive(Debug, Clone)]
pub struct Published {
    pub vlnv: Vlnv,
    pub descriptor_path: PathBuf,
    pub signature_path: Option<PathBuf>,
    pub signature: SignatureState,
}

/// Run the validation stages over a submission. Side-effect free and
/// arbitrarily repeatable.
#[instrument(skip_all, fields(name = %submission.descriptor_name, channel = ?submission.channel))]
pub fn validate(
    submission: &Submission,
    trust: &TrustStore,
    spdx: &SpdxLicenses,
    policy: &Policy,
) -> Result<Validated> {
    let mut issues = Vec::new();

    // Surface checks on the uploaded files themselves.
    if !submission.descriptor_name.ends_with(".core") {
        issues.push(Issue::policy("core_file", "only .core files are allowed"));
    }
    if submission.descriptor.len() > policy.max_descriptor_bytes {
        issues.push(Issue::policy("core_file", "core file is too large"));
    }
    if let Some(signature_name) = &submission.signature_name {
        if !signature_name.ends_with(".sig") {
            issues.push(Issue::policy("signature_file", "only .sig files are allowed for signatures"));
        }
        if submission.signature.as_ref().is_some_and(|s| s.len() > policy.max_signature_bytes) {
            issues.push(Issue::policy("signature_file", "signature file is too large"));
        }
    }

    let Ok(text) = std::str::from_utf8(&submission.descriptor) else {
        issues.push(Issue::parse("", "core file is not valid UTF-8"));
        exn::bail!(ErrorKind::Rejected(Issues(issues)));
    };
    if let Some(issue) = parse::check_header(text) {
        issues.push(issue);
    }
    let document = match parse::load(text) {
        Ok(document) => document,
        Err(err) => {
            issues.extend((*err).issues());
            exn::bail!(ErrorKind::Rejected(Issues(issues)));
        },
    };

    // Structural pass and domain pass both run; their issues aggregate.
    issues.extend(schema::validate_core(&document));
    let descriptor = match parse::from_value(&document) {
        Ok(descriptor) => Some(descriptor),
        Err(more) => {
            issues.extend(more);
            None
        },
    };

    if let Some(descriptor) = &descriptor {
        if let Some(license) = &descriptor.license
            && let Some(issue) = spdx.check(license)
        {
            issues.push(issue);
        }
        // Provider trust boundary: external source delegation cannot come in
        // through the anonymous upload form.
        if submission.channel == Channel::WebUpload && descriptor.has_provider() {
            issues.push(Issue::policy(
                "provider",
                "descriptors with a provider section cannot be published via the web upload; \
                 use the API and co-locate the sources with the descriptor",
            ));
        }
    }

    let mut signature_state = SignatureState::Unsigned;
    let mut signature_content = None;
    if let Some(signature_bytes) = &submission.signature {
        match check_signature(signature_bytes, descriptor.as_ref(), &submission.descriptor, trust) {
            Ok((state, content)) => {
                signature_state = state;
                signature_content = Some(content);
            },
            Err(more) => issues.extend(more),
        }
    }

    if !issues.is_empty() {
        exn::bail!(ErrorKind::Rejected(Issues(issues)));
    }
    // Unreachable fallback: `descriptor` is always Some when no issues were
    // collected, but avoid unwrap regardless.
    let Some(descriptor) = descriptor else {
        exn::bail!(ErrorKind::Rejected(Issues(vec![Issue::parse("", "descriptor could not be parsed")])));
    };
    Ok(Validated {
        vlnv: descriptor.vlnv.clone(),
        descriptor,
        content: text.to_string(),
        signature_content,
        signature: signature_state,
    })
}

/// Structural + trust checks for a submitted signature file.
///
/// Structural problems (bad YAML, schema violations, VLNV mismatch) are
/// rejection issues; the trust verdict is returned as a state flag.
fn check_signature(
    signature_bytes: &[u8],
    descriptor: Option<&Descriptor>,
    descriptor_bytes: &[u8],
    trust: &TrustStore,
) -> std::result::Result<(SignatureState, String), Vec<Issue>> {
    let Ok(signature_text) = std::str::from_utf8(signature_bytes) else {
        return Err(vec![Issue::signature("", "signature file is not valid UTF-8")]);
    };
    let document = match parse::load(signature_text) {
        Ok(document) => document,
        Err(err) => return Err((*err).issues().into_iter().map(reframe_as_signature).collect()),
    };
    let mut issues: Vec<Issue> = schema::validate_signature(&document).into_iter().map(reframe_as_signature).collect();

    let signature_file = match sign::parse_signature(signature_text) {
        Ok(signature_file) => Some(signature_file),
        Err(err) => {
            issues.extend((*err).issues());
            None
        },
    };

    if let (Some(signature_file), Some(descriptor)) = (&signature_file, descriptor)
        && signature_file.vlnv != descriptor.vlnv
    {
        issues.push(Issue::signature(
            "coresig::name",
            format!(
                "signature file not valid for {}; it was created for {}",
                descriptor.vlnv, signature_file.vlnv
            ),
        ));
    }

    if !issues.is_empty() {
        return Err(issues);
    }
    let state = match signature_file {
        Some(signature_file) => sign::verify(descriptor_bytes, &signature_file, trust).into(),
        None => SignatureState::Unverified,
    };
    Ok((state, signature_text.to_string()))
}

/// Signature-file schema/parse problems should render under the signature
/// category regardless of which layer found them.
fn reframe_as_signature(issue: Issue) -> Issue {
    Issue::signature(issue.path, issue.message)
}

/// Validate and, on success, write through storage and index the new
/// package. Reached through [`Catalog::publish`](crate::Catalog::publish).
///
/// Stage order is strict: schema-check → parse → signature-check → storage
/// write → commit → index insert. Concurrent publishes of the same VLNV are
/// serialized by `locks`; the loser sees the duplicate rejection.
#[instrument(skip_all, fields(name = %submission.descriptor_name))]
pub(crate) async fn publish(
    backend: &BackendHandle,
    repo: &Repository,
    locks: &KeyedLock,
    submission: &Submission,
    trust: &TrustStore,
    spdx: &SpdxLicenses,
    policy: &Policy,
) -> Result<Published> {
    let validated = validate(submission, trust, spdx, policy)?;
    let vlnv = validated.vlnv.clone();
    let _guard = locks.acquire(&vlnv.to_string()).await;

    let descriptor_path = PathBuf::from(vlnv.descriptor_filename());
    let signature_path = validated.signature_content.as_ref().map(|_| PathBuf::from(vlnv.signature_filename()));

    if !policy.allow_overwrite {
        // Reject before writing anything: the index is authoritative for
        // what's published, and the storage existence check also covers
        // files present in the store but not (yet) indexed.
        if repo.get_by_vlnv(vlnv.to_string()).await.or_raise(|| ErrorKind::Index)?.is_some() {
            exn::bail!(ErrorKind::Duplicate(vlnv.to_string()));
        }
        if backend.exists(&descriptor_path).await.or_raise(|| ErrorKind::StorageUnavailable)? {
            exn::bail!(ErrorKind::Duplicate(vlnv.to_string()));
        }
    }

    backend
        .write(&descriptor_path, &submission.descriptor)
        .await
        .or_raise(|| ErrorKind::StorageUnavailable)?;
    if let (Some(signature_path), Some(signature_bytes)) = (&signature_path, &submission.signature) {
        backend.write(signature_path, signature_bytes).await.or_raise(|| ErrorKind::StorageUnavailable)?;
    }
    backend.commit(&format!("Add core {vlnv}")).await.or_raise(|| ErrorKind::StorageUnavailable)?;

    let record = PackageRecord {
        vlnv: vlnv.clone(),
        description: validated.descriptor.description.clone(),
        license: validated.descriptor.license.clone(),
        descriptor_path: descriptor_path.clone(),
        signature_path: signature_path.clone(),
        content_hash: blake3::hash(submission.descriptor.as_slice()).to_string(),
        content: validated.content.clone(),
        signature_content: validated.signature_content.clone(),
        signature: validated.signature,
        provider: validated.descriptor.provider.as_ref().map(|p| p.name.clone()),
        filesets: validated.descriptor.filesets.clone(),
        indexed_at: OffsetDateTime::now_utc(),
    };
    let indexed = match policy.allow_overwrite {
        true => repo.upsert(&record).await,
        false => repo.insert_new(&record).await,
    };
    indexed.map_err(|err| match &*err {
        corral_index::error::ErrorKind::Duplicate(vlnv) => exn::Exn::from(ErrorKind::Duplicate(vlnv.clone())),
        _ => exn::Exn::from(ErrorKind::Index),
    })?;
    tracing::info!(%vlnv, path = %descriptor_path.display(), "published core");

    Ok(Published {
        vlnv,
        descriptor_path,
        signature_path,
        signature: validated.signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_descriptor::IssueKind;

    const VALID: &str = "CAPI=2:\nname: acme:lib1:foo:1.0.0\ndescription: a core\nlicense: MIT\n";

    fn spdx() -> SpdxLicenses {
        SpdxLicenses::from_ids(["MIT", "Apache-2.0"])
    }

    fn rejected_issues(err: crate::error::Error) -> Vec<Issue> {
        match &*err {
            ErrorKind::Rejected(issues) => issues.0.clone(),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_accepts_valid_descriptor() {
        let submission = Submission::new("foo.core", VALID);
        let validated = validate(&submission, &TrustStore::default(), &spdx(), &Policy::default()).unwrap();
        assert_eq!(validated.vlnv.to_string(), "acme:lib1:foo:1.0.0");
        assert_eq!(validated.signature, SignatureState::Unsigned);
        assert_eq!(validated.content, VALID);
    }

    #[test]
    fn test_validate_rejects_wrong_extension() {
        let submission = Submission::new("foo.txt", VALID);
        let issues = rejected_issues(
            validate(&submission, &TrustStore::default(), &spdx(), &Policy::default()).unwrap_err(),
        );
        assert!(issues.iter().any(|i| i.kind == IssueKind::Policy && i.path == "core_file"));
    }

    #[test]
    fn test_validate_rejects_oversized_descriptor() {
        let mut content = VALID.to_string();
        content.push_str(&"# padding\n".repeat(10_000));
        let submission = Submission::new("foo.core", content);
        let issues = rejected_issues(
            validate(&submission, &TrustStore::default(), &spdx(), &Policy::default()).unwrap_err(),
        );
        assert!(issues.iter().any(|i| i.message.contains("too large")));
    }

    #[test]
    fn test_schema_and_parse_issues_both_reported() {
        // The name violates the schema pattern AND the parser's VLNV
        // decomposition; both layers must report.
        let content = "CAPI=2:\nname: not-a-vlnv\nbogus: 1\n";
        let submission = Submission::new("foo.core", content);
        let issues = rejected_issues(
            validate(&submission, &TrustStore::default(), &spdx(), &Policy::default()).unwrap_err(),
        );
        assert!(issues.iter().any(|i| i.kind == IssueKind::Schema), "schema issue missing: {issues:?}");
        assert!(issues.iter().any(|i| i.kind == IssueKind::Parse), "parse issue missing: {issues:?}");
    }

    #[test]
    fn test_unknown_license_rejected() {
        let content = "CAPI=2:\nname: acme:lib1:foo:1.0.0\nlicense: NotALicense\n";
        let submission = Submission::new("foo.core", content);
        let issues = rejected_issues(
            validate(&submission, &TrustStore::default(), &spdx(), &Policy::default()).unwrap_err(),
        );
        assert!(issues.iter().any(|i| i.path == "license"));
    }

    #[test]
    fn test_provider_rejected_on_web_upload_only() {
        let content = "CAPI=2:\nname: acme:lib1:foo:1.0.0\nprovider:\n  name: github\n";
        let web = Submission::new("foo.core", content).via(Channel::WebUpload);
        let issues =
            rejected_issues(validate(&web, &TrustStore::default(), &spdx(), &Policy::default()).unwrap_err());
        assert!(issues.iter().any(|i| i.kind == IssueKind::Policy && i.path == "provider"));

        let api = Submission::new("foo.core", content).via(Channel::Api);
        let validated = validate(&api, &TrustStore::default(), &spdx(), &Policy::default()).unwrap();
        assert!(validated.descriptor.has_provider());
    }

    #[test]
    fn test_signature_vlnv_mismatch_rejected() {
        let signature = "coresig:\n  name: acme:lib1:other:1.0.0\n  signatures: []\n";
        let submission = Submission::new("foo.core", VALID).with_signature("foo.sig", signature);
        let issues = rejected_issues(
            validate(&submission, &TrustStore::default(), &spdx(), &Policy::default()).unwrap_err(),
        );
        assert!(issues.iter().any(|i| i.kind == IssueKind::Signature && i.message.contains("not valid for")));
    }

    #[test]
    fn test_unverifiable_signature_is_a_flag_not_a_rejection() {
        let signature = "coresig:\n  name: acme:lib1:foo:1.0.0\n  signatures: []\n";
        let submission = Submission::new("foo.core", VALID).with_signature("foo.sig", signature);
        let validated = validate(&submission, &TrustStore::default(), &spdx(), &Policy::default()).unwrap();
        assert_eq!(validated.signature, SignatureState::Unverified);
    }

    #[test]
    fn test_validate_is_repeatable() {
        let submission = Submission::new("foo.core", VALID);
        let first = validate(&submission, &TrustStore::default(), &spdx(), &Policy::default()).unwrap();
        let second = validate(&submission, &TrustStore::default(), &spdx(), &Policy::default()).unwrap();
        assert_eq!(first.vlnv, second.vlnv);
        assert_eq!(first.content, second.content);
    }
}
