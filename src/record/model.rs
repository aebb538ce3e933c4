//! Record Types
//!
//! A civic record is the unit everything else revolves around: one
//! document with a structured header and a markdown body, mirrored across
//! the metadata store, the working tree, and the commit log.
//!
//! All timestamps are carried as ISO-8601 strings. The header parser never
//! materializes native date values; whatever enters a `Record` is already
//! canonical text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::schema::Diagnostic;

/// One author descriptor. `username` is preferred for attribution; `name`
/// is the display form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Author {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Provenance of an imported record. `reference` is the only required
/// member; a legacy scalar `source` normalizes to `{reference: <scalar>}`
/// on read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceInfo {
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_by: Option<String>,
}

/// Linkage to the commit that last touched this record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommitInfo {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// A civic document.
///
/// Invariants: `id` and `record_type` are immutable after creation;
/// `created <= updated`; `author` is always present; `workflow_state` is
/// never written to the on-disk header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub status: String,
    /// Editorial workflow state; metadata store only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_state: Option<String>,
    /// Markdown body.
    #[serde(default)]
    pub content: String,
    /// Free-form header fields beyond the canonical set.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Primary author username.
    pub author: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    /// ISO-8601.
    pub created: String,
    /// ISO-8601.
    pub updated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitInfo>,
    /// Relative on-disk path, forward slashes.
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geography: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_records: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_geography_files: Option<Vec<String>>,
}

impl Record {
    /// Minimal valid record; timestamps are set to `now` and equal.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        record_type: impl Into<String>,
        status: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        let now = now_iso();
        Self {
            id: id.into(),
            title: title.into(),
            record_type: record_type.into(),
            status: status.into(),
            workflow_state: None,
            content: String::new(),
            metadata: serde_json::Map::new(),
            author: author.into(),
            authors: Vec::new(),
            created: now.clone(),
            updated: now,
            source: None,
            commit: None,
            path: String::new(),
            geography: None,
            attached_files: None,
            linked_records: None,
            linked_geography_files: None,
        }
    }

    /// Header view of the record as a JSON map, exactly the fields the
    /// serializer would emit. Used by the schema validator.
    pub fn header_map(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("id".into(), self.id.clone().into());
        map.insert("title".into(), self.title.clone().into());
        map.insert("type".into(), self.record_type.clone().into());
        map.insert("status".into(), self.status.clone().into());
        map.insert("author".into(), self.author.clone().into());
        if !self.authors.is_empty() {
            map.insert(
                "authors".into(),
                serde_json::to_value(&self.authors).unwrap_or_default(),
            );
        }
        map.insert("created".into(), self.created.clone().into());
        map.insert("updated".into(), self.updated.clone().into());
        if let Some(source) = &self.source {
            map.insert(
                "source".into(),
                serde_json::to_value(source).unwrap_or_default(),
            );
        }
        if let Some(commit) = &self.commit {
            map.insert(
                "commit".into(),
                serde_json::to_value(commit).unwrap_or_default(),
            );
        }
        if let Some(geography) = &self.geography {
            map.insert("geography".into(), geography.clone());
        }
        if let Some(files) = &self.attached_files {
            map.insert("attached_files".into(), serde_json::to_value(files).unwrap_or_default());
        }
        if let Some(links) = &self.linked_records {
            map.insert("linked_records".into(), serde_json::to_value(links).unwrap_or_default());
        }
        if let Some(links) = &self.linked_geography_files {
            map.insert(
                "linked_geography_files".into(),
                serde_json::to_value(links).unwrap_or_default(),
            );
        }
        for (key, value) in &self.metadata {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        map
    }
}

/// A pre-publication working copy. Same shape as a record, held only in
/// the metadata store until the publish saga promotes it.
pub type Draft = Record;

/// Errors from the record model, serializer, and schema validator.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("RECORD_VALIDATION_ERROR: {}", summarize(.diagnostics))]
    Validation { diagnostics: Vec<Diagnostic> },

    #[error("record parse error: {0}")]
    Parse(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("metadata store error: {0}")]
    Storage(#[source] anyhow::Error),
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| match &d.field {
            Some(field) => format!("{} ({field})", d.message),
            None => d.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Current time as an ISO-8601 string with second precision.
pub fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Lowercase, alphanumeric-and-dash form of a display string.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut last_dash = true;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}
