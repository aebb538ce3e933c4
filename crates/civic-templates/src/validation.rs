//! Validation-Rule Evaluation
//!
//! Evaluates a merged template's required fields, advanced rules, field
//! relationships, and per-field custom validators against a record header.
//! The `business_logic` rule type is an extension point: unregistered
//! rules accept.

use crate::definition::{AdvancedRule, FieldRelationship, Template};
use crate::expander::evaluate_condition;
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    /// Stable machine-readable code, e.g. `required_field`.
    pub code: String,
    pub message: String,
    pub field: Option<String>,
}

impl ValidationIssue {
    fn error(code: &str, field: Option<&str>, message: String) -> Self {
        Self {
            severity: IssueSeverity::Error,
            code: code.to_string(),
            message,
            field: field.map(str::to_string),
        }
    }

    fn warning(code: &str, field: Option<&str>, message: String) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            code: code.to_string(),
            message,
            field: field.map(str::to_string),
        }
    }
}

type BusinessRuleFn =
    dyn Fn(&serde_json::Map<String, serde_json::Value>) -> Vec<ValidationIssue>
        + Send
        + Sync;

/// Named `business_logic` rule implementations.
#[derive(Default)]
pub struct BusinessLogicRegistry {
    rules: HashMap<String, Box<BusinessRuleFn>>,
}

impl BusinessLogicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, rule: F)
    where
        F: Fn(&serde_json::Map<String, serde_json::Value>) -> Vec<ValidationIssue>
            + Send
            + Sync
            + 'static,
    {
        self.rules.insert(name.into(), Box::new(rule));
    }

    fn evaluate(
        &self,
        name: &str,
        header: &serde_json::Map<String, serde_json::Value>,
    ) -> Vec<ValidationIssue> {
        match self.rules.get(name) {
            Some(rule) => rule(header),
            None => Vec::new(),
        }
    }
}

fn scalar_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn field_is_set(header: &serde_json::Map<String, serde_json::Value>, field: &str) -> bool {
    match header.get(field) {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
        Some(serde_json::Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
    }
}

fn field_text(header: &serde_json::Map<String, serde_json::Value>, field: &str) -> String {
    header
        .get(field)
        .and_then(scalar_string)
        .unwrap_or_default()
}

/// Scope view of the header for conditional-expression evaluation.
fn header_scope(
    header: &serde_json::Map<String, serde_json::Value>,
) -> HashMap<String, String> {
    header
        .iter()
        .filter_map(|(k, v)| scalar_string(v).map(|s| (k.clone(), s)))
        .collect()
}

fn parse_date_value(text: &str) -> Option<NaiveDateTime> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    None
}

/// Evaluate every declared rule of `template` against `header`.
pub fn validate_header(
    template: &Template,
    header: &serde_json::Map<String, serde_json::Value>,
    registry: &BusinessLogicRegistry,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for field in &template.header.required_fields {
        if !field_is_set(header, field) {
            issues.push(ValidationIssue::error(
                "required_field",
                Some(field),
                format!("required field '{field}' is missing or empty"),
            ));
        }
    }

    if !template.header.statuses.is_empty() {
        let status = field_text(header, "status");
        if !status.is_empty() && !template.header.statuses.contains(&status) {
            issues.push(ValidationIssue::error(
                "invalid_status",
                Some("status"),
                format!(
                    "status '{status}' is not allowed here (expected one of: {})",
                    template.header.statuses.join(", ")
                ),
            ));
        }
    }

    for rule in &template.header.advanced_rules {
        issues.extend(evaluate_advanced_rule(rule, header, registry));
    }
    for relationship in &template.header.relationships {
        issues.extend(evaluate_relationship(relationship, header));
    }
    for (field, validator) in &template.header.validators {
        issues.extend(evaluate_validator(field, validator, header));
    }

    issues
}

fn evaluate_advanced_rule(
    rule: &AdvancedRule,
    header: &serde_json::Map<String, serde_json::Value>,
    registry: &BusinessLogicRegistry,
) -> Vec<ValidationIssue> {
    match rule {
        AdvancedRule::DateSequence { fields, message } => {
            let mut previous: Option<(String, NaiveDateTime)> = None;
            for field in fields {
                let text = field_text(header, field);
                if text.is_empty() {
                    continue;
                }
                let Some(parsed) = parse_date_value(&text) else {
                    continue;
                };
                if let Some((prev_field, prev)) = &previous {
                    if parsed < *prev {
                        let msg = message.clone().unwrap_or_else(|| {
                            format!("'{field}' must not be earlier than '{prev_field}'")
                        });
                        return vec![ValidationIssue::error(
                            "date_sequence",
                            Some(field),
                            msg,
                        )];
                    }
                }
                previous = Some((field.clone(), parsed));
            }
            Vec::new()
        }
        AdvancedRule::FieldDependency {
            if_field,
            then_field,
            message,
        } => {
            if field_is_set(header, if_field) && !field_is_set(header, then_field) {
                let msg = message.clone().unwrap_or_else(|| {
                    format!("'{then_field}' is required when '{if_field}' is set")
                });
                vec![ValidationIssue::error(
                    "field_dependency",
                    Some(then_field),
                    msg,
                )]
            } else {
                Vec::new()
            }
        }
        AdvancedRule::ContentQuality { fields, min_length } => {
            let combined: String = fields
                .iter()
                .map(|f| field_text(header, f))
                .collect::<Vec<_>>()
                .join(" ");
            let mut issues = Vec::new();
            if combined.trim().len() < *min_length {
                issues.push(ValidationIssue::warning(
                    "content_too_short",
                    None,
                    format!(
                        "combined content of {} is under {min_length} characters",
                        fields.join(", ")
                    ),
                ));
            }
            for marker in ["[Add", "[TODO"] {
                if combined.contains(marker) {
                    issues.push(ValidationIssue::warning(
                        "placeholder_content",
                        None,
                        format!("content still contains the placeholder marker '{marker}'"),
                    ));
                }
            }
            issues
        }
        AdvancedRule::BusinessLogic { rule } => registry.evaluate(rule, header),
    }
}

fn evaluate_relationship(
    relationship: &FieldRelationship,
    header: &serde_json::Map<String, serde_json::Value>,
) -> Vec<ValidationIssue> {
    match relationship {
        FieldRelationship::RequiredTogether { fields } => {
            let set: Vec<_> = fields.iter().filter(|f| field_is_set(header, f)).collect();
            if !set.is_empty() && set.len() != fields.len() {
                vec![ValidationIssue::error(
                    "required_together",
                    None,
                    format!("fields {} must be set together", fields.join(", ")),
                )]
            } else {
                Vec::new()
            }
        }
        FieldRelationship::MutuallyExclusive { fields } => {
            let set: Vec<_> = fields.iter().filter(|f| field_is_set(header, f)).collect();
            if set.len() > 1 {
                vec![ValidationIssue::error(
                    "mutually_exclusive",
                    None,
                    format!("only one of {} may be set", fields.join(", ")),
                )]
            } else {
                Vec::new()
            }
        }
        FieldRelationship::DependentOn { field, depends_on } => {
            if field_is_set(header, field) && !field_is_set(header, depends_on) {
                vec![ValidationIssue::error(
                    "dependent_on",
                    Some(field),
                    format!("'{field}' requires '{depends_on}' to be set"),
                )]
            } else {
                Vec::new()
            }
        }
        FieldRelationship::Conditional {
            condition,
            then_required,
        } => {
            let scope = header_scope(header);
            if !evaluate_condition(condition, &scope) {
                return Vec::new();
            }
            then_required
                .iter()
                .filter(|f| !field_is_set(header, f))
                .map(|f| {
                    ValidationIssue::error(
                        "conditional_required",
                        Some(f),
                        format!("'{f}' is required when {condition}"),
                    )
                })
                .collect()
        }
    }
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap())
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://\S+$").unwrap())
}

fn semver_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+$").unwrap())
}

fn required_if_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^required_if\(\s*(\w+)\s*,\s*['"]?([^)'"]*)['"]?\s*\)$"#).unwrap()
    })
}

fn evaluate_validator(
    field: &str,
    validator: &str,
    header: &serde_json::Map<String, serde_json::Value>,
) -> Vec<ValidationIssue> {
    // required_if applies even when the field is absent.
    if let Some(caps) = required_if_re().captures(validator.trim()) {
        let condition_field = &caps[1];
        let condition_value = &caps[2];
        if field_text(header, condition_field) == condition_value
            && !field_is_set(header, field)
        {
            return vec![ValidationIssue::error(
                "required_if",
                Some(field),
                format!(
                    "'{field}' is required when '{condition_field}' is '{condition_value}'"
                ),
            )];
        }
        return Vec::new();
    }

    let value = field_text(header, field);
    if value.is_empty() {
        return Vec::new();
    }

    let failed = match validator.trim() {
        "email" => !email_re().is_match(&value),
        "url" => !url_re().is_match(&value),
        "phone" => {
            let digits: String = value
                .chars()
                .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.' | '+'))
                .collect();
            digits.is_empty()
                || !digits.chars().all(|c| c.is_ascii_digit())
                || !(7..=15).contains(&digits.len())
        }
        "date" => parse_date_value(&value).is_none(),
        "semver" => !semver_re().is_match(&value),
        other => {
            tracing::debug!(field, validator = other, "unknown field validator");
            false
        }
    };

    if failed {
        vec![ValidationIssue::error(
            &format!("invalid_{}", validator.trim()),
            Some(field),
            format!("'{field}' is not a valid {}", validator.trim()),
        )]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(yaml_header: &str) -> Template {
        Template::parse(&format!("---\n{yaml_header}\n---\n"), "test").unwrap()
    }

    fn header(json: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        json.as_object().unwrap().clone()
    }

    #[test]
    fn test_required_fields_and_statuses() {
        let t = template(
            "name: default\ntype: policy\nrequired_fields: [title, department]\nstatuses: [draft, active]",
        );
        let issues = validate_header(
            &t,
            &header(serde_json::json!({"title": "Open Data", "status": "retired"})),
            &BusinessLogicRegistry::new(),
        );
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().any(|i| i.code == "required_field"
            && i.field.as_deref() == Some("department")));
        assert!(issues.iter().any(|i| i.code == "invalid_status"));
    }

    #[test]
    fn test_date_sequence_rule() {
        let t = template(
            "name: default\ntype: policy\nadvanced_rules:\n  - type: date_sequence\n    fields: [created, updated]",
        );
        let ok = validate_header(
            &t,
            &header(serde_json::json!({"created": "2024-01-01", "updated": "2024-02-01"})),
            &BusinessLogicRegistry::new(),
        );
        assert!(ok.is_empty());

        let bad = validate_header(
            &t,
            &header(serde_json::json!({"created": "2024-03-01", "updated": "2024-02-01"})),
            &BusinessLogicRegistry::new(),
        );
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].code, "date_sequence");
    }

    #[test]
    fn test_content_quality_rule() {
        let t = template(
            "name: default\ntype: policy\nadvanced_rules:\n  - type: content_quality\n    fields: [summary]",
        );
        let issues = validate_header(
            &t,
            &header(serde_json::json!({"summary": "[Add summary here]"})),
            &BusinessLogicRegistry::new(),
        );
        assert!(issues.iter().any(|i| i.code == "content_too_short"));
        assert!(issues.iter().any(|i| i.code == "placeholder_content"));
        assert!(issues.iter().all(|i| i.severity == IssueSeverity::Warning));
    }

    #[test]
    fn test_relationships() {
        let t = template(
            r#"name: default
type: policy
relationships:
  - type: required_together
    fields: [effective_date, approved_by]
  - type: mutually_exclusive
    fields: [draft_note, approval_ref]
  - type: conditional
    if: "status == 'active'"
    then_required: [effective_date]"#,
        );

        let issues = validate_header(
            &t,
            &header(serde_json::json!({
                "status": "active",
                "approved_by": "council",
                "draft_note": "x",
                "approval_ref": "y"
            })),
            &BusinessLogicRegistry::new(),
        );
        assert!(issues.iter().any(|i| i.code == "required_together"));
        assert!(issues.iter().any(|i| i.code == "mutually_exclusive"));
        assert!(issues.iter().any(|i| i.code == "conditional_required"
            && i.field.as_deref() == Some("effective_date")));
    }

    #[test]
    fn test_custom_validators() {
        let t = template(
            r#"name: default
type: policy
validators:
  contact_email: email
  website: url
  phone: phone
  version: semver
  approval_ref: "required_if(status, approved)""#,
        );

        let issues = validate_header(
            &t,
            &header(serde_json::json!({
                "contact_email": "not-an-email",
                "website": "ftp://example.org",
                "phone": "(555) 123-4567",
                "version": "1.0",
                "status": "approved"
            })),
            &BusinessLogicRegistry::new(),
        );
        assert!(issues.iter().any(|i| i.code == "invalid_email"));
        assert!(issues.iter().any(|i| i.code == "invalid_url"));
        assert!(issues.iter().any(|i| i.code == "invalid_semver"));
        assert!(issues.iter().any(|i| i.code == "required_if"));
        // A well-formed phone number passes.
        assert!(!issues.iter().any(|i| i.code == "invalid_phone"));
    }

    #[test]
    fn test_business_logic_extension_point() {
        let t = template(
            "name: default\ntype: policy\nadvanced_rules:\n  - type: business_logic\n    rule: must_have_council_vote",
        );

        // Unregistered rules accept.
        let issues = validate_header(
            &t,
            &header(serde_json::json!({})),
            &BusinessLogicRegistry::new(),
        );
        assert!(issues.is_empty());

        let mut registry = BusinessLogicRegistry::new();
        registry.register("must_have_council_vote", |header| {
            if header.contains_key("council_vote") {
                Vec::new()
            } else {
                vec![ValidationIssue::error(
                    "council_vote_missing",
                    Some("council_vote"),
                    "a recorded council vote is required".to_string(),
                )]
            }
        });
        let issues = validate_header(&t, &header(serde_json::json!({})), &registry);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, "council_vote_missing");
    }
}
