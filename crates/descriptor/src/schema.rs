//! Structural validation of descriptor documents against embedded JSON
//! Schemas.
//!
//! Runs independently of the domain parser: the schema catches shape errors
//! (wrong types, missing required keys, unknown properties) with a
//! declarative contract that evolves separately from the parser code. All
//! violations are collected, never fail-fast.

use crate::error::Issue;
use jsonschema::Validator;
use serde_yaml::Value;
use std::sync::LazyLock;
use tracing::instrument;

static CORE_SCHEMA: LazyLock<Validator> = LazyLock::new(|| {
    let schema: serde_json::Value =
        serde_json::from_str(include_str!("../schemas/core.schema.json")).expect("embedded core schema is valid JSON");
    jsonschema::validator_for(&schema).expect("embedded core schema compiles")
});

static SIGNATURE_SCHEMA: LazyLock<Validator> = LazyLock::new(|| {
    let schema: serde_json::Value = serde_json::from_str(include_str!("../schemas/signature.schema.json"))
        .expect("embedded signature schema is valid JSON");
    jsonschema::validator_for(&schema).expect("embedded signature schema compiles")
});

/// Validate a loaded descriptor document against the core schema.
///
/// Returns an empty list when the document conforms.
#[instrument(skip(document))]
pub fn validate_core(document: &Value) -> Vec<Issue> {
    validate_with(&CORE_SCHEMA, document)
}

/// Validate a loaded signature document against the signature schema.
#[instrument(skip(document))]
pub fn validate_signature(document: &Value) -> Vec<Issue> {
    validate_with(&SIGNATURE_SCHEMA, document)
}

fn validate_with(validator: &Validator, document: &Value) -> Vec<Issue> {
    // jsonschema operates on JSON values; YAML documents with non-string
    // mapping keys (or other unrepresentable constructs) fail the conversion
    // and are reported as a single issue.
    let instance = match serde_json::to_value(document) {
        Ok(instance) => instance,
        Err(err) => return vec![Issue::schema("", format!("document is not representable as JSON: {err}"))],
    };
    validator
        .iter_errors(&instance)
        .map(|err| {
            let path = pointer_to_path(&err.instance_path.to_string());
            let message = friendly_message(&path, &err.to_string());
            Issue::schema(path, message)
        })
        .collect()
}

/// Convert a JSON pointer (`/filesets/rtl/files`) to the `::`-separated
/// path format used throughout validation responses.
fn pointer_to_path(pointer: &str) -> String {
    pointer.trim_start_matches('/').replace('/', "::")
}

/// Replace the generic schema wording with actionable guidance for the
/// violations users hit most.
fn friendly_message(path: &str, default: &str) -> String {
    match path {
        "name" => "core name does not match the vendor:library:name:version format".to_string(),
        "license" => "custom license objects are not supported; use an SPDX identifier string".to_string(),
        _ => default.to_string(),
    }
}
