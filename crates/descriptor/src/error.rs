//! Descriptor Error Types
//!
//! Structured errors using `exn` for automatic location tracking. Validation
//! failures carry a list of [`Issue`]s so that every field-level problem in a
//! submitted descriptor can be reported in one response.

use derive_more::{Display, Error};
use serde::Serialize;

/// A descriptor error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for descriptor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which validation layer produced an [`Issue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Structural violation reported by the JSON Schema validator.
    #[display("schema")]
    Schema,
    /// Domain-grammar or semantic violation reported by the parser.
    #[display("parse")]
    Parse,
    /// Problem with the detached signature file.
    #[display("signature")]
    Signature,
    /// Submission violates a catalog policy (trust boundary, size limit).
    #[display("policy")]
    Policy,
}

/// A single field-level validation problem.
///
/// `path` uses `::`-separated segments from the document root (empty for
/// whole-file problems), matching the error format of the original service.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize)]
#[display("[{kind}] {path}: {message}")]
pub struct Issue {
    pub kind: IssueKind,
    pub path: String,
    pub message: String,
}

impl Issue {
    pub fn new(kind: IssueKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind, path: path.into(), message: message.into() }
    }

    pub fn parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(IssueKind::Parse, path, message)
    }

    pub fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(IssueKind::Schema, path, message)
    }

    pub fn signature(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(IssueKind::Signature, path, message)
    }

    pub fn policy(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(IssueKind::Policy, path, message)
    }
}

/// A non-empty collection of [`Issue`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issues(pub Vec<Issue>);

impl std::error::Error for Issues {}

impl std::fmt::Display for Issues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_slice() {
            [only] => write!(f, "{only}"),
            many => write!(f, "{} validation issues", many.len()),
        }
    }
}

impl From<Issue> for Issues {
    fn from(issue: Issue) -> Self {
        Self(vec![issue])
    }
}

impl IntoIterator for Issues {
    type Item = Issue;
    type IntoIter = std::vec::IntoIter<Issue>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The file is not valid UTF-8.
    #[display("descriptor is not valid UTF-8")]
    Encoding,
    /// The document could not be parsed as YAML at all.
    #[display("YAML syntax error: {_0}")]
    Syntax(#[error(not(source))] String),
    /// The document parsed but violates the descriptor grammar.
    #[display("{_0}")]
    Invalid(Issues),
    /// The SPDX license list could not be loaded.
    #[display("SPDX license list unavailable: {_0}")]
    Spdx(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // The document is either valid or it's not.
        false
    }

    /// Flatten this error into the issue list a caller would render.
    pub fn issues(&self) -> Vec<Issue> {
        match self {
            Self::Encoding => vec![Issue::parse("", "file is not valid UTF-8")],
            Self::Syntax(message) => vec![Issue::parse("", message.clone())],
            Self::Invalid(issues) => issues.0.clone(),
            Self::Spdx(message) => vec![Issue::policy("license", message.clone())],
        }
    }
}
