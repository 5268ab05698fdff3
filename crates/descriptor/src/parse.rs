//! The domain parser for core descriptor documents.
//!
//! Runs after (and independently of) the JSON Schema check. The parser walks
//! the YAML mapping in document order, classifies every top-level section,
//! and applies the semantic rules a schema can't express: VLNV decomposition,
//! semver versions, conditional dependency syntax. Every violation found is
//! collected; the parser never stops at the first problem.

use crate::error::{ErrorKind, Issue, Issues, Result};
use crate::models::{Dependency, Descriptor, Fileset, Provider, Target};
use crate::vlnv::Vlnv;
use regex::Regex;
use serde_yaml::Value;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::instrument;

/// `cond? (core-name)` conditional dependency syntax.
static DEPENDENCY_CONDITION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*?)\?\s*\((.*?)\)$").unwrap());

/// Recognized top-level sections of a descriptor document.
///
/// Every key in the document maps to exactly one of these (or fails with an
/// unrecognized-section issue), so the assembly loop below is an exhaustive
/// match rather than a pile of ad-hoc lookups.
enum Section {
    Header,
    Name,
    Description,
    License,
    Filesets,
    Targets,
    Provider,
}

impl Section {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "CAPI=2" => Some(Self::Header),
            "name" => Some(Self::Name),
            "description" => Some(Self::Description),
            "license" => Some(Self::License),
            "filesets" => Some(Self::Filesets),
            "targets" => Some(Self::Targets),
            "provider" => Some(Self::Provider),
            _ => None,
        }
    }
}

/// Check the mandatory `CAPI=2:` first line.
///
/// Returns an [`Issue`] when the header is missing — callers decide whether
/// that is fatal on its own.
pub fn check_header(text: &str) -> Option<Issue> {
    let first_line = text.lines().next().unwrap_or("").trim();
    if first_line.starts_with(crate::DESCRIPTOR_HEADER) {
        None
    } else {
        Some(Issue::parse("", format!("descriptor does not start with \"{}\"", crate::DESCRIPTOR_HEADER)))
    }
}

/// Load descriptor text as a YAML document.
pub fn load(text: &str) -> Result<Value> {
    serde_yaml::from_str(text).map_err(|err| exn::Exn::from(ErrorKind::Syntax(err.to_string())))
}

/// Parse a complete descriptor from raw text.
///
/// Convenience wrapper over [`check_header`], [`load`] and [`from_value`]
/// used by callers that don't need to interleave schema validation.
#[instrument(skip(text), fields(size = text.len()))]
pub fn parse(text: &str) -> Result<Descriptor> {
    let mut issues = Vec::new();
    if let Some(issue) = check_header(text) {
        issues.push(issue);
    }
    let value = load(text)?;
    match from_value(&value) {
        Ok(descriptor) if issues.is_empty() => Ok(descriptor),
        Ok(_) => exn::bail!(ErrorKind::Invalid(Issues(issues))),
        Err(more) => {
            issues.extend(more);
            exn::bail!(ErrorKind::Invalid(Issues(issues)))
        },
    }
}

/// Parse a complete descriptor from raw bytes.
pub fn parse_bytes(bytes: &[u8]) -> Result<Descriptor> {
    let text = std::str::from_utf8(bytes).map_err(|_| exn::Exn::from(ErrorKind::Encoding))?;
    parse(text)
}

/// Assemble a [`Descriptor`] from an already-loaded YAML document,
/// collecting every semantic violation.
pub fn from_value(value: &Value) -> std::result::Result<Descriptor, Issues> {
    let mut issues = Vec::new();
    let Value::Mapping(mapping) = value else {
        return Err(Issue::parse("", "descriptor must be a mapping").into());
    };

    let mut vlnv = None;
    let mut saw_name = false;
    let mut description = None;
    let mut license = None;
    let mut filesets = Vec::new();
    let mut targets = Vec::new();
    let mut provider = None;

    for (key, entry) in mapping {
        let Some(key) = key.as_str() else {
            issues.push(Issue::parse("", format!("non-string top-level key: {key:?}")));
            continue;
        };
        match Section::from_key(key) {
            Some(Section::Header) => {
                if !entry.is_null() {
                    issues.push(Issue::parse(key, "header key must not carry a value"));
                }
            },
            Some(Section::Name) => {
                saw_name = true;
                match entry.as_str() {
                    Some(name) => match Vlnv::from_str(name) {
                        Ok(parsed) => vlnv = Some(parsed),
                        Err(more) => issues.extend(more),
                    },
                    None => issues.push(Issue::parse(key, "core name must be a string")),
                }
            },
            Some(Section::Description) => match entry.as_str() {
                Some(text) => description = Some(text.to_string()),
                None => issues.push(Issue::parse(key, "description must be a string")),
            },
            Some(Section::License) => match entry.as_str() {
                Some(id) => license = Some(id.to_string()),
                // Custom license objects are not supported; an SPDX
                // identifier string is required.
                None => issues.push(Issue::parse(key, "license must be an SPDX identifier string")),
            },
            Some(Section::Filesets) => filesets = parse_filesets(entry, &mut issues),
            Some(Section::Targets) => targets = parse_targets(entry, &mut issues),
            Some(Section::Provider) => provider = parse_provider(entry, &mut issues),
            None => issues.push(Issue::parse(key, "unrecognized section")),
        }
    }

    let Some(vlnv) = vlnv else {
        if !saw_name {
            issues.push(Issue::parse("name", "descriptor is missing the core name"));
        }
        return Err(Issues(issues));
    };
    if issues.is_empty() {
        Ok(Descriptor { vlnv, description, license, filesets, targets, provider })
    } else {
        Err(Issues(issues))
    }
}

fn parse_filesets(value: &Value, issues: &mut Vec<Issue>) -> Vec<Fileset> {
    let Value::Mapping(mapping) = value else {
        issues.push(Issue::parse("filesets", "filesets must be a mapping"));
        return Vec::new();
    };
    let mut filesets = Vec::new();
    for (name, body) in mapping {
        let Some(name) = name.as_str() else {
            issues.push(Issue::parse("filesets", format!("non-string fileset name: {name:?}")));
            continue;
        };
        let path = format!("filesets::{name}");
        let Value::Mapping(body) = body else {
            issues.push(Issue::parse(&path, "fileset must be a mapping"));
            continue;
        };
        let mut fileset = Fileset {
            name: name.to_string(),
            files: Vec::new(),
            file_type: None,
            depend: Vec::new(),
        };
        for (key, entry) in body {
            match key.as_str() {
                Some("files") => fileset.files = parse_files(entry, &path, issues),
                Some("file_type") => match entry.as_str() {
                    Some(ft) => fileset.file_type = Some(ft.to_string()),
                    None => issues.push(Issue::parse(format!("{path}::file_type"), "file type must be a string")),
                },
                Some("depend") => fileset.depend = parse_dependencies(entry, &path, issues),
                Some(other) => issues.push(Issue::parse(format!("{path}::{other}"), "unrecognized fileset key")),
                None => issues.push(Issue::parse(&path, format!("non-string fileset key: {key:?}"))),
            }
        }
        filesets.push(fileset);
    }
    filesets
}

fn parse_files(value: &Value, parent: &str, issues: &mut Vec<Issue>) -> Vec<String> {
    let path = format!("{parent}::files");
    let Value::Sequence(entries) = value else {
        issues.push(Issue::parse(path, "files must be a list"));
        return Vec::new();
    };
    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Value::String(file) => files.push(file.clone()),
            // A file may carry attributes as a single-entry mapping,
            // `- rtl/top.v: {is_include_file: true}`; only the filename is
            // indexed.
            Value::Mapping(attrs) if attrs.len() == 1 => {
                match attrs.iter().next().and_then(|(k, _)| k.as_str()) {
                    Some(file) => files.push(file.to_string()),
                    None => issues.push(Issue::parse(&path, "file attribute entry must be keyed by a filename")),
                }
            },
            other => issues.push(Issue::parse(&path, format!("unsupported file entry: {other:?}"))),
        }
    }
    files
}

fn parse_dependencies(value: &Value, parent: &str, issues: &mut Vec<Issue>) -> Vec<Dependency> {
    let path = format!("{parent}::depend");
    let Value::Sequence(entries) = value else {
        issues.push(Issue::parse(path, "depend must be a list"));
        return Vec::new();
    };
    let mut dependencies = Vec::new();
    for entry in entries {
        match entry.as_str() {
            Some(raw) => dependencies.push(parse_dependency(raw)),
            None => issues.push(Issue::parse(&path, format!("dependency must be a string, got {entry:?}"))),
        }
    }
    dependencies
}

/// Split a dependency entry into core name and optional condition.
///
/// `use_bram? (acme:lib:bram)` depends on `acme:lib:bram` only when the
/// `use_bram` parameter is set.
fn parse_dependency(raw: &str) -> Dependency {
    match DEPENDENCY_CONDITION.captures(raw) {
        Some(captures) => Dependency {
            condition: Some(captures[1].trim().to_string()),
            core: captures[2].trim().to_string(),
        },
        None => Dependency { core: raw.trim().to_string(), condition: None },
    }
}

fn parse_targets(value: &Value, issues: &mut Vec<Issue>) -> Vec<Target> {
    let Value::Mapping(mapping) = value else {
        issues.push(Issue::parse("targets", "targets must be a mapping"));
        return Vec::new();
    };
    let mut targets = Vec::new();
    for (name, body) in mapping {
        let Some(name) = name.as_str() else {
            issues.push(Issue::parse("targets", format!("non-string target name: {name:?}")));
            continue;
        };
        let path = format!("targets::{name}");
        let Value::Mapping(body) = body else {
            issues.push(Issue::parse(&path, "target must be a mapping"));
            continue;
        };
        let mut target = Target {
            name: name.to_string(),
            description: None,
            filesets: Vec::new(),
            default_tool: None,
            flow: None,
            parameters: None,
        };
        for (key, entry) in body {
            match key.as_str() {
                Some("description") => target.description = entry.as_str().map(str::to_string),
                Some("filesets") => match entry {
                    Value::Sequence(entries) => {
                        for fileset in entries {
                            match fileset.as_str() {
                                Some(fs) => target.filesets.push(fs.to_string()),
                                None => issues.push(Issue::parse(
                                    format!("{path}::filesets"),
                                    format!("fileset reference must be a string, got {fileset:?}"),
                                )),
                            }
                        }
                    },
                    _ => issues.push(Issue::parse(format!("{path}::filesets"), "filesets must be a list")),
                },
                Some("default_tool") => target.default_tool = entry.as_str().map(str::to_string),
                Some("flow") => target.flow = entry.as_str().map(str::to_string),
                Some("parameters") => match to_json(entry) {
                    Some(parameters) => target.parameters = Some(parameters),
                    None => issues.push(Issue::parse(format!("{path}::parameters"), "parameters are not representable")),
                },
                Some(other) => issues.push(Issue::parse(format!("{path}::{other}"), "unrecognized target key")),
                None => issues.push(Issue::parse(&path, format!("non-string target key: {key:?}"))),
            }
        }
        targets.push(target);
    }
    targets
}

fn parse_provider(value: &Value, issues: &mut Vec<Issue>) -> Option<Provider> {
    let Value::Mapping(mapping) = value else {
        issues.push(Issue::parse("provider", "provider must be a mapping"));
        return None;
    };
    let mut name = None;
    let mut options = serde_json::Map::new();
    for (key, entry) in mapping {
        let Some(key) = key.as_str() else {
            issues.push(Issue::parse("provider", format!("non-string provider key: {key:?}")));
            continue;
        };
        if key == "name" {
            match entry.as_str() {
                Some(provider_name) => name = Some(provider_name.to_string()),
                None => issues.push(Issue::parse("provider::name", "provider name must be a string")),
            }
        } else {
            match to_json(entry) {
                Some(json) => {
                    options.insert(key.to_string(), json);
                },
                None => issues.push(Issue::parse(format!("provider::{key}"), "provider option is not representable")),
            }
        }
    }
    match name {
        Some(name) => Some(Provider { name, options: serde_json::Value::Object(options) }),
        None => {
            issues.push(Issue::parse("provider::name", "provider section requires a name"));
            None
        },
    }
}

fn to_json(value: &Value) -> Option<serde_json::Value> {
    serde_json::to_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "CAPI=2:\nname: acme:lib1:foo:1.0.0\n";

    const FULL: &str = r#"CAPI=2:
name: acme:lib1:foo:1.0.0
description: A counter with AXI glue
license: MIT
filesets:
  rtl:
    files:
      - rtl/counter.v
      - rtl/pkg.sv: {is_include_file: true}
    file_type: verilogSource
    depend:
      - acme:lib1:axi
      - use_bram? (acme:lib1:bram)
  tb:
    files:
      - tb/counter_tb.v
    file_type: verilogSource
targets:
  default:
    filesets:
      - rtl
  sim:
    filesets:
      - rtl
      - tb
    default_tool: icarus
    parameters:
      WIDTH: 8
"#;

    #[test]
    fn test_minimal() {
        let descriptor = parse(MINIMAL).unwrap();
        assert_eq!(descriptor.vlnv.to_string(), "acme:lib1:foo:1.0.0");
        assert!(descriptor.filesets.is_empty());
        assert!(descriptor.provider.is_none());
    }

    #[test]
    fn test_full_descriptor() {
        let descriptor = parse(FULL).unwrap();
        assert_eq!(descriptor.description.as_deref(), Some("A counter with AXI glue"));
        assert_eq!(descriptor.license.as_deref(), Some("MIT"));
        // Order preserved from the document
        assert_eq!(descriptor.filesets.len(), 2);
        assert_eq!(descriptor.filesets[0].name, "rtl");
        assert_eq!(descriptor.filesets[0].files, vec!["rtl/counter.v", "rtl/pkg.sv"]);
        assert_eq!(descriptor.filesets[0].file_type.as_deref(), Some("verilogSource"));
        assert_eq!(descriptor.targets.len(), 2);
        assert_eq!(descriptor.targets[1].default_tool.as_deref(), Some("icarus"));
    }

    #[test]
    fn test_conditional_dependency() {
        let descriptor = parse(FULL).unwrap();
        let depend = &descriptor.filesets[0].depend;
        assert_eq!(depend[0], Dependency { core: "acme:lib1:axi".to_string(), condition: None });
        assert_eq!(
            depend[1],
            Dependency {
                core: "acme:lib1:bram".to_string(),
                condition: Some("use_bram".to_string()),
            }
        );
    }

    #[test]
    fn test_provider_section() {
        let text = "CAPI=2:\nname: acme:lib1:foo:1.0.0\nprovider:\n  name: github\n  user: acme\n  repo: foo\n";
        let descriptor = parse(text).unwrap();
        let provider = descriptor.provider.unwrap();
        assert_eq!(provider.name, "github");
        assert_eq!(provider.options["user"], "acme");
    }

    #[test]
    fn test_missing_header() {
        let err = parse("name: acme:lib1:foo:1.0.0\n").unwrap_err();
        let issues = (*err).issues();
        assert!(issues.iter().any(|i| i.message.contains("CAPI=2")));
    }

    #[test]
    fn test_missing_name() {
        let err = parse("CAPI=2:\ndescription: nameless\n").unwrap_err();
        let issues = (*err).issues();
        assert!(issues.iter().any(|i| i.path == "name"));
    }

    #[test]
    fn test_invalid_vlnv_and_unknown_section_both_reported() {
        let err = parse("CAPI=2:\nname: not-a-vlnv\nbogus: true\n").unwrap_err();
        let issues = (*err).issues();
        assert!(issues.iter().any(|i| i.message.contains("four colon-separated")));
        assert!(issues.iter().any(|i| i.path == "bogus"));
    }

    #[test]
    fn test_yaml_syntax_error() {
        let err = parse("CAPI=2:\nname: [unbalanced\n").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Syntax(_)));
    }

    #[test]
    fn test_not_utf8() {
        let err = parse_bytes(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Encoding));
    }

    #[test]
    fn test_header_with_value_rejected() {
        let err = parse("CAPI=2: 2\nname: acme:lib1:foo:1.0.0\n").unwrap_err();
        let issues = (*err).issues();
        assert!(issues.iter().any(|i| i.path == "CAPI=2"));
    }
}
