//! # Catalog Parsing and Validation
//!
//! A catalog manifest lives inside each source and lists the labs it offers:
//!
//! ```yaml
//! name: Community labs
//! description: Labs maintained by the community
//! labs:
//!   - name: intro
//!     path: path/a.yaml
//!     description: First steps
//! ```
//!
//! [`parse`] turns raw bytes into a [`Manifest`], preserving entry order, and
//! [`validate`] checks it without touching the filesystem. Entries only
//! reference their lab artifact; the artifact itself is read by the pipeline.
//!
//! This module also inspects single lab artifacts ([`inspect_lab_file`]) for
//! the local file apply path, which requires a `ConfigMap` carrying the lab
//! template label and an embedded `lab.yaml` document.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::defaults::LAB_TEMPLATE_LABEL;
use crate::error::{Error, Result, ValidationError};

/// A parsed catalog manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Entries in the order the catalog lists them.
    #[serde(default, rename = "labs")]
    pub entries: Vec<LabEntry>,
}

/// One lab listed by a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabEntry {
    #[serde(default)]
    pub name: String,
    /// Path of the lab artifact, relative to the source root.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub description: String,
}

impl LabEntry {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            description: String::new(),
        }
    }
}

impl Manifest {
    /// Finds the first entry called `name`.
    pub fn find_entry(&self, name: &str) -> Option<&LabEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }
}

/// Parses raw manifest bytes.
pub fn parse(bytes: &[u8]) -> Result<Manifest> {
    let manifest: Option<Manifest> =
        serde_yaml::from_slice(bytes).map_err(|e| Error::ManifestParse {
            message: e.to_string(),
        })?;
    // An empty document parses as null.
    Ok(manifest.unwrap_or_default())
}

/// Checks that a manifest is usable.
pub fn validate(manifest: &Manifest) -> std::result::Result<(), ValidationError> {
    if manifest.name.trim().is_empty() {
        return Err(ValidationError::MissingName);
    }
    if manifest.entries.is_empty() {
        return Err(ValidationError::NoEntries);
    }
    for (i, entry) in manifest.entries.iter().enumerate() {
        if entry.name.trim().is_empty() {
            return Err(ValidationError::EntryMissingName { index: i + 1 });
        }
        if entry.path.trim().is_empty() {
            return Err(ValidationError::EntryMissingPath {
                name: entry.name.clone(),
            });
        }
    }
    Ok(())
}

/// Parses and validates in one step.
pub fn load(bytes: &[u8]) -> Result<Manifest> {
    let manifest = parse(bytes)?;
    validate(&manifest)?;
    Ok(manifest)
}

/// Identity of a lab extracted from its artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabDefinition {
    pub id: String,
    pub title: String,
}

/// Checks that `bytes` hold a lab definition and extracts its id and title.
pub fn inspect_lab_file(path: &Path, bytes: &[u8]) -> Result<LabDefinition> {
    let invalid = |message: String| Error::InvalidLabFile {
        path: path.to_path_buf(),
        message,
    };

    let doc: Value = serde_yaml::from_slice(bytes).map_err(|e| invalid(e.to_string()))?;

    if doc.get("kind").and_then(Value::as_str) != Some("ConfigMap") {
        return Err(invalid("expected a ConfigMap".to_string()));
    }

    let (label_key, label_value) = LAB_TEMPLATE_LABEL;
    let labelled = doc
        .get("metadata")
        .and_then(|m| m.get("labels"))
        .and_then(|l| l.get(label_key))
        .and_then(Value::as_str)
        == Some(label_value);
    if !labelled {
        return Err(invalid(format!(
            "missing label {}: {}",
            label_key, label_value
        )));
    }

    let embedded = doc
        .get("data")
        .and_then(|d| d.get("lab.yaml"))
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing data.\"lab.yaml\"".to_string()))?;
    let lab: Value = serde_yaml::from_str(embedded)
        .map_err(|e| invalid(format!("embedded lab.yaml: {}", e)))?;

    let field = |key: &str| {
        lab.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };
    let id = field("name");
    if id.is_empty() {
        return Err(invalid("embedded lab.yaml has no name".to_string()));
    }
    let title = field("title");

    Ok(LabDefinition {
        title: if title.is_empty() { id.clone() } else { title },
        id,
    })
}
