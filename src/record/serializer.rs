//! Canonical Record Serializer
//!
//! Maps a `Record` to its on-disk text form and back: a YAML header
//! between `---` delimiter lines, one blank line, then the markdown body.
//!
//! Header fields are emitted in a fixed section order, one blank line
//! between sections:
//! 1. core identification, 2. authorship, 3. timestamps,
//! 4. classification, 5. source, 6. commit linkage, 7. type-specific,
//! 8. relationships, 9. attachments, then any unknown fields.
//!
//! On read, field names are normalized (camelCase relation/attachment
//! variants, legacy scalar `source`), the primary author is derived when
//! absent, and dates are canonicalized to ISO-8601 strings before
//! anything else sees them. `workflow_state` never appears in a header in
//! either direction.

use serde_json::Value;

use super::model::{slugify, Author, CommitInfo, Record, RecordError, SourceInfo};
use super::schema::{Diagnostic, DiagnosticSeverity};

/// Metadata keys that belong to the classification section, in emission
/// order.
const CLASSIFICATION_KEYS: &[&str] =
    &["tags", "module", "slug", "version", "priority", "department"];

/// Metadata keys that belong to the type-specific section, in emission
/// order. `geography` itself is a first-class field.
const TYPE_SPECIFIC_KEYS: &[&str] = &[
    "category",
    "session_type",
    "date",
    "duration",
    "location",
    "attendees",
    "topics",
    "media",
];

const REQUIRED_HEADER_FIELDS: &[&str] =
    &["id", "title", "type", "status", "author", "created", "updated"];

fn to_yaml(value: &Value) -> serde_yaml::Value {
    serde_yaml::to_value(value).unwrap_or(serde_yaml::Value::Null)
}

fn insert<T: serde::Serialize>(mapping: &mut serde_yaml::Mapping, key: &str, value: &T) {
    if let Ok(value) = serde_yaml::to_value(value) {
        mapping.insert(serde_yaml::Value::String(key.to_string()), value);
    }
}

fn render_section(mapping: serde_yaml::Mapping) -> Option<String> {
    if mapping.is_empty() {
        return None;
    }
    serde_yaml::to_string(&mapping).ok()
}

/// Serialize a record to its canonical on-disk text.
pub fn serialize_record(record: &Record) -> String {
    let mut sections: Vec<String> = Vec::new();

    // 1. Core identification.
    let mut core = serde_yaml::Mapping::new();
    insert(&mut core, "id", &record.id);
    insert(&mut core, "title", &record.title);
    insert(&mut core, "type", &record.record_type);
    insert(&mut core, "status", &record.status);
    sections.extend(render_section(core));

    // 2. Authorship. An empty authors sequence is not emitted.
    let mut authorship = serde_yaml::Mapping::new();
    insert(&mut authorship, "author", &record.author);
    if !record.authors.is_empty() {
        insert(&mut authorship, "authors", &record.authors);
    }
    sections.extend(render_section(authorship));

    // 3. Timestamps.
    let mut timestamps = serde_yaml::Mapping::new();
    insert(&mut timestamps, "created", &record.created);
    insert(&mut timestamps, "updated", &record.updated);
    sections.extend(render_section(timestamps));

    // 4. Classification, from the metadata map.
    let mut classification = serde_yaml::Mapping::new();
    for key in CLASSIFICATION_KEYS {
        if let Some(value) = record.metadata.get(*key) {
            classification.insert(
                serde_yaml::Value::String((*key).to_string()),
                to_yaml(value),
            );
        }
    }
    sections.extend(render_section(classification));

    // 5. Source provenance.
    if let Some(source) = &record.source {
        let mut section = serde_yaml::Mapping::new();
        insert(&mut section, "source", source);
        sections.extend(render_section(section));
    }

    // 6. Commit linkage.
    if let Some(commit) = &record.commit {
        let mut section = serde_yaml::Mapping::new();
        insert(&mut section, "commit", commit);
        sections.extend(render_section(section));
    }

    // 7. Type-specific fields.
    let mut type_specific = serde_yaml::Mapping::new();
    if let Some(geography) = &record.geography {
        type_specific.insert(
            serde_yaml::Value::String("geography".to_string()),
            to_yaml(geography),
        );
    }
    for key in TYPE_SPECIFIC_KEYS {
        if let Some(value) = record.metadata.get(*key) {
            type_specific.insert(
                serde_yaml::Value::String((*key).to_string()),
                to_yaml(value),
            );
        }
    }
    sections.extend(render_section(type_specific));

    // 8. Relationships.
    let mut relationships = serde_yaml::Mapping::new();
    if let Some(links) = &record.linked_records {
        if !links.is_empty() {
            insert(&mut relationships, "linked_records", links);
        }
    }
    if let Some(links) = &record.linked_geography_files {
        if !links.is_empty() {
            insert(&mut relationships, "linked_geography_files", links);
        }
    }
    sections.extend(render_section(relationships));

    // 9. Attachments.
    if let Some(files) = &record.attached_files {
        if !files.is_empty() {
            let mut section = serde_yaml::Mapping::new();
            insert(&mut section, "attached_files", files);
            sections.extend(render_section(section));
        }
    }

    // Unknown metadata after the last recognized section.
    let mut unknown = serde_yaml::Mapping::new();
    for (key, value) in &record.metadata {
        if CLASSIFICATION_KEYS.contains(&key.as_str())
            || TYPE_SPECIFIC_KEYS.contains(&key.as_str())
        {
            continue;
        }
        unknown.insert(serde_yaml::Value::String(key.clone()), to_yaml(value));
    }
    sections.extend(render_section(unknown));

    let header = sections.join("\n");
    let body = record.content.trim_end_matches('\n');
    if body.is_empty() {
        format!("---\n{header}---\n")
    } else {
        format!("---\n{header}---\n\n{body}\n")
    }
}

fn split_document(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;
    let (end, delim_len) = rest
        .find("\n---")
        .map(|i| (i, 4))
        .or_else(|| rest.starts_with("---").then_some((0, 3)))?;
    let header = &rest[..end];
    let mut body = &rest[end + delim_len..];
    if let Some(nl) = body.find('\n') {
        body = &body[nl + 1..];
    } else {
        body = "";
    }
    Some((header, body))
}

/// Canonicalize a header date value to an ISO-8601 string.
fn canonical_date(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn take_string(map: &mut serde_json::Map<String, Value>, key: &str) -> Option<String> {
    map.remove(key).and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn take_string_list(
    map: &mut serde_json::Map<String, Value>,
    snake: &str,
    camel: &str,
) -> Option<Vec<String>> {
    let value = map.remove(snake).or_else(|| map.remove(camel))?;
    match value {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    other => serde_json::to_string(&other).ok(),
                })
                .collect(),
        ),
        Value::String(s) => Some(vec![s]),
        _ => None,
    }
}

/// Parse canonical on-disk text back into a record.
///
/// `path` becomes the record's relative on-disk path when given. Fails
/// with a validation error listing every missing required header field.
pub fn parse_record(text: &str, path: Option<&str>) -> Result<Record, RecordError> {
    let (header_text, body) = split_document(text).ok_or_else(|| {
        RecordError::Parse("missing '---' header delimiters".to_string())
    })?;

    let header_yaml: serde_yaml::Value = serde_yaml::from_str(header_text)
        .map_err(|e| RecordError::Parse(format!("invalid header: {e}")))?;
    let header_json: Value = serde_json::to_value(&header_yaml)
        .map_err(|e| RecordError::Parse(format!("header is not a mapping: {e}")))?;
    let mut header = match header_json {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        _ => return Err(RecordError::Parse("header is not a mapping".to_string())),
    };

    // Workflow state never lives in the header; drop it if a stray file
    // carries one.
    if header.remove("workflowState").is_some() || header.remove("workflow_state").is_some()
    {
        tracing::warn!("dropping workflow state found in on-disk header");
    }

    // Legacy scalar source normalizes to an object.
    let source = match header.remove("source") {
        Some(Value::String(reference)) => Some(SourceInfo {
            reference,
            ..Default::default()
        }),
        Some(value @ Value::Object(_)) => Some(
            serde_json::from_value::<SourceInfo>(value)
                .map_err(|e| RecordError::Parse(format!("invalid source: {e}")))?,
        ),
        Some(_) | None => None,
    };

    let commit = match header.remove("commit") {
        Some(value @ Value::Object(_)) => Some(
            serde_json::from_value::<CommitInfo>(value)
                .map_err(|e| RecordError::Parse(format!("invalid commit: {e}")))?,
        ),
        Some(Value::String(hash)) => Some(CommitInfo {
            hash,
            signature: None,
        }),
        _ => None,
    };

    let authors: Vec<Author> = match header.remove("authors") {
        Some(value @ Value::Array(_)) => serde_json::from_value(value)
            .map_err(|e| RecordError::Parse(format!("invalid authors: {e}")))?,
        _ => Vec::new(),
    };

    // Derive the primary author when absent.
    let author = take_string(&mut header, "author").unwrap_or_else(|| {
        authors
            .first()
            .and_then(|a| {
                a.username
                    .clone()
                    .or_else(|| a.name.as_deref().map(slugify))
            })
            .unwrap_or_else(|| "unknown".to_string())
    });

    let created = header.remove("created").as_ref().and_then(canonical_date);
    let updated = header.remove("updated").as_ref().and_then(canonical_date);

    let id = take_string(&mut header, "id");
    let title = take_string(&mut header, "title");
    let record_type = take_string(&mut header, "type");
    let status = take_string(&mut header, "status");

    let mut missing: Vec<&str> = Vec::new();
    for (field, present) in [
        ("id", id.is_some()),
        ("title", title.is_some()),
        ("type", record_type.is_some()),
        ("status", status.is_some()),
        ("author", !author.is_empty()),
        ("created", created.is_some()),
        ("updated", updated.is_some()),
    ] {
        if !present && REQUIRED_HEADER_FIELDS.contains(&field) {
            missing.push(field);
        }
    }
    if !missing.is_empty() {
        return Err(RecordError::Validation {
            diagnostics: missing
                .into_iter()
                .map(|field| Diagnostic {
                    severity: DiagnosticSeverity::Error,
                    code: "required".to_string(),
                    message: format!("required header field '{field}' is missing"),
                    field: Some(field.to_string()),
                    suggestion: None,
                })
                .collect(),
        });
    }

    let geography = header
        .remove("geography")
        .or_else(|| header.remove("geographyData"));
    let attached_files = take_string_list(&mut header, "attached_files", "attachedFiles");
    let linked_records = take_string_list(&mut header, "linked_records", "linkedRecords");
    let linked_geography_files =
        take_string_list(&mut header, "linked_geography_files", "linkedGeographyFiles");

    Ok(Record {
        id: id.unwrap_or_default(),
        title: title.unwrap_or_default(),
        record_type: record_type.unwrap_or_default(),
        status: status.unwrap_or_default(),
        workflow_state: None,
        content: body.trim_start_matches('\n').trim_end_matches('\n').to_string(),
        metadata: header,
        author,
        authors,
        created: created.unwrap_or_default(),
        updated: updated.unwrap_or_default(),
        source,
        commit,
        path: path.unwrap_or_default().to_string(),
        geography,
        attached_files,
        linked_records,
        linked_geography_files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> Record {
        let mut record = Record::new("policy-open-data", "Open Data", "policy", "active", "jdoe");
        record.created = "2024-01-15T09:00:00Z".to_string();
        record.updated = "2024-03-01T14:30:00Z".to_string();
        record.content = "# Open Data\n\nEveryone gets the data.".to_string();
        record.authors = vec![Author {
            username: Some("jdoe".to_string()),
            name: Some("Jane Doe".to_string()),
            role: Some("clerk".to_string()),
        }];
        record
            .metadata
            .insert("department".into(), serde_json::json!("Records"));
        record
            .metadata
            .insert("tags".into(), serde_json::json!(["transparency", "data"]));
        record
            .metadata
            .insert("custom_flag".into(), serde_json::json!(true));
        record.source = Some(SourceInfo {
            reference: "ORD-88".to_string(),
            url: Some("https://example.org/ord-88".to_string()),
            ..Default::default()
        });
        record.linked_records = Some(vec!["bylaw-records-act".to_string()]);
        record
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let record = sample_record();
        let text = serialize_record(&record);
        let parsed = parse_record(&text, Some("records/policy/policy-open-data.md")).unwrap();

        assert_eq!(parsed.id, record.id);
        assert_eq!(parsed.title, record.title);
        assert_eq!(parsed.record_type, record.record_type);
        assert_eq!(parsed.status, record.status);
        assert_eq!(parsed.author, record.author);
        assert_eq!(parsed.authors, record.authors);
        assert_eq!(parsed.created, record.created);
        assert_eq!(parsed.updated, record.updated);
        assert_eq!(parsed.source, record.source);
        assert_eq!(parsed.linked_records, record.linked_records);
        assert_eq!(parsed.metadata, record.metadata);
        assert_eq!(parsed.content, record.content);
    }

    #[test]
    fn test_parse_then_serialize_is_stable() {
        let text = serialize_record(&sample_record());
        let reparsed = parse_record(&text, None).unwrap();
        let text2 = serialize_record(&reparsed);
        assert_eq!(text.trim_end_matches('\n'), text2.trim_end_matches('\n'));
    }

    #[test]
    fn test_header_structure_and_section_order() {
        let text = serialize_record(&sample_record());
        assert!(text.starts_with("---\nid: policy-open-data\n"));

        let id_pos = text.find("id:").unwrap();
        let author_pos = text.find("\nauthor:").unwrap();
        let created_pos = text.find("\ncreated:").unwrap();
        let tags_pos = text.find("\ntags:").unwrap();
        let source_pos = text.find("\nsource:").unwrap();
        let linked_pos = text.find("\nlinked_records:").unwrap();
        let custom_pos = text.find("\ncustom_flag:").unwrap();
        assert!(id_pos < author_pos);
        assert!(author_pos < created_pos);
        assert!(created_pos < tags_pos);
        assert!(tags_pos < source_pos);
        assert!(source_pos < linked_pos);
        assert!(linked_pos < custom_pos);

        // One blank line between header and body.
        assert!(text.contains("---\n\n# Open Data"));
    }

    #[test]
    fn test_empty_authors_not_emitted() {
        let mut record = sample_record();
        record.authors.clear();
        let text = serialize_record(&record);
        assert!(!text.contains("authors:"));
        assert!(text.contains("author: jdoe"));
    }

    #[test]
    fn test_workflow_state_never_written_and_dropped_on_read() {
        let mut record = sample_record();
        record.workflow_state = Some("in_review".to_string());
        let text = serialize_record(&record);
        assert!(!text.contains("workflow"));

        let with_stray = text.replace("status: active", "status: active\nworkflowState: review");
        let parsed = parse_record(&with_stray, None).unwrap();
        assert!(parsed.workflow_state.is_none());
        assert!(!parsed.metadata.contains_key("workflowState"));
    }

    #[test]
    fn test_legacy_scalar_source_normalizes() {
        let text = "---\nid: rec-1\ntitle: T\ntype: policy\nstatus: draft\nauthor: a\ncreated: 2024-01-01\nupdated: 2024-01-01\nsource: ORD-12\n---\n\nBody\n";
        let parsed = parse_record(text, None).unwrap();
        assert_eq!(
            parsed.source,
            Some(SourceInfo {
                reference: "ORD-12".to_string(),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_camel_case_relations_normalize() {
        let text = "---\nid: rec-1\ntitle: T\ntype: policy\nstatus: draft\nauthor: a\ncreated: 2024-01-01\nupdated: 2024-01-01\nlinkedRecords: [other]\nattachedFiles: [map.pdf]\n---\n";
        let parsed = parse_record(text, None).unwrap();
        assert_eq!(parsed.linked_records, Some(vec!["other".to_string()]));
        assert_eq!(parsed.attached_files, Some(vec!["map.pdf".to_string()]));
        assert!(!parsed.metadata.contains_key("linkedRecords"));
    }

    #[test]
    fn test_author_derived_from_authors() {
        let text = "---\nid: rec-1\ntitle: T\ntype: policy\nstatus: draft\nauthors:\n- name: Jane Doe\ncreated: 2024-01-01\nupdated: 2024-01-01\n---\n";
        let parsed = parse_record(text, None).unwrap();
        assert_eq!(parsed.author, "jane-doe");

        let text = "---\nid: rec-1\ntitle: T\ntype: policy\nstatus: draft\ncreated: 2024-01-01\nupdated: 2024-01-01\n---\n";
        let parsed = parse_record(text, None).unwrap();
        assert_eq!(parsed.author, "unknown");
    }

    #[test]
    fn test_missing_required_fields_all_listed() {
        let err = parse_record("---\nid: rec-1\n---\n\nBody\n", None).unwrap_err();
        match err {
            RecordError::Validation { diagnostics } => {
                let fields: Vec<_> = diagnostics
                    .iter()
                    .filter_map(|d| d.field.as_deref())
                    .collect();
                assert!(fields.contains(&"title"));
                assert!(fields.contains(&"type"));
                assert!(fields.contains(&"status"));
                assert!(fields.contains(&"created"));
                assert!(fields.contains(&"updated"));
                assert!(!fields.contains(&"id"));
                // Author is derivable and defaults to the sentinel.
                assert!(!fields.contains(&"author"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_content_trimmed_of_trailing_newlines() {
        let mut record = sample_record();
        record.content = "Line one\n\n\n".to_string();
        let text = serialize_record(&record);
        let parsed = parse_record(&text, None).unwrap();
        assert_eq!(parsed.content, "Line one");
    }
}
