//! Template Definition Types
//!
//! A template file is a YAML header between `---` delimiter lines followed
//! by a markdown body. The header declares what a record of this type must
//! carry; the body is the starting content for new records.

use crate::error::TemplateError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A structural section the record body is expected to contain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

fn default_min_length() -> usize {
    50
}

/// Advanced validation rules evaluated against a record header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdvancedRule {
    /// Listed date fields must be non-decreasing.
    DateSequence {
        fields: Vec<String>,
        #[serde(default)]
        message: Option<String>,
    },
    /// If `if_field` is set, `then_field` must be set.
    FieldDependency {
        if_field: String,
        then_field: String,
        #[serde(default)]
        message: Option<String>,
    },
    /// Concatenation of the listed fields must reach a minimum length and
    /// carry no placeholder markers.
    ContentQuality {
        fields: Vec<String>,
        #[serde(default = "default_min_length")]
        min_length: usize,
    },
    /// Named extension point; unregistered rules accept.
    BusinessLogic { rule: String },
}

/// Declared relationships between header fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldRelationship {
    RequiredTogether {
        fields: Vec<String>,
    },
    MutuallyExclusive {
        fields: Vec<String>,
    },
    DependentOn {
        field: String,
        depends_on: String,
    },
    Conditional {
        #[serde(rename = "if")]
        condition: String,
        then_required: Vec<String>,
    },
}

/// The YAML header of a template file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateHeader {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    /// Parent reference as `parentType/parentName`.
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Allowed status values for records created from this template.
    #[serde(default)]
    pub statuses: Vec<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub business_rules: Vec<String>,
    #[serde(default)]
    pub advanced_rules: Vec<AdvancedRule>,
    #[serde(default)]
    pub relationships: Vec<FieldRelationship>,
    /// Per-field custom validators, e.g. `contact_email: email` or
    /// `approval_ref: "required_if(status, approved)"`.
    #[serde(default)]
    pub validators: HashMap<String, String>,
    /// Partials the body may invoke.
    #[serde(default)]
    pub partials: Vec<String>,
}

/// A parsed template: header plus markdown body.
#[derive(Debug, Clone)]
pub struct Template {
    pub header: TemplateHeader,
    pub body: String,
}

/// Split a header+body file into its YAML header text and body text.
pub(crate) fn split_header(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;
    let end = rest.find("\n---").map(|i| (i, i + 4)).or_else(|| {
        rest.starts_with("---").then_some((0, 3))
    })?;
    let header = &rest[..end.0];
    let mut body = &rest[end.1..];
    // The delimiter line ends at the next newline.
    if let Some(nl) = body.find('\n') {
        body = &body[nl + 1..];
    } else {
        body = "";
    }
    Some((header, body))
}

impl Template {
    /// Parse a template file.
    pub fn parse(text: &str, path: &str) -> Result<Self, TemplateError> {
        let (header_text, body) =
            split_header(text).ok_or_else(|| TemplateError::Parse {
                path: path.to_string(),
                message: "missing '---' header delimiters".to_string(),
            })?;
        let header: TemplateHeader =
            serde_yaml::from_str(header_text).map_err(|e| TemplateError::Parse {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            header,
            body: body.trim_start_matches('\n').to_string(),
        })
    }

    /// Merge a resolved parent into a child. The child keeps its identity;
    /// lists concatenate, sections merge by name with child override, the
    /// body is inherited only when the child body is empty, and validator
    /// entries are unioned with the child winning per field.
    pub fn merge(parent: &Template, child: &Template) -> Template {
        let mut header = TemplateHeader {
            name: child.header.name.clone(),
            record_type: child.header.record_type.clone(),
            extends: None,
            required_fields: concat_dedup(
                &parent.header.required_fields,
                &child.header.required_fields,
            ),
            statuses: concat_dedup(&parent.header.statuses, &child.header.statuses),
            sections: Vec::new(),
            business_rules: [
                parent.header.business_rules.clone(),
                child.header.business_rules.clone(),
            ]
            .concat(),
            advanced_rules: [
                parent.header.advanced_rules.clone(),
                child.header.advanced_rules.clone(),
            ]
            .concat(),
            relationships: [
                parent.header.relationships.clone(),
                child.header.relationships.clone(),
            ]
            .concat(),
            validators: parent.header.validators.clone(),
            partials: concat_dedup(&parent.header.partials, &child.header.partials),
        };
        header
            .validators
            .extend(child.header.validators.clone());

        // Sections: parent order, child overriding by name, child-only
        // sections appended.
        for section in &parent.header.sections {
            let effective = child
                .header
                .sections
                .iter()
                .find(|s| s.name == section.name)
                .unwrap_or(section);
            header.sections.push(effective.clone());
        }
        for section in &child.header.sections {
            if !header.sections.iter().any(|s| s.name == section.name) {
                header.sections.push(section.clone());
            }
        }

        let body = if child.body.trim().is_empty() {
            parent.body.clone()
        } else {
            child.body.clone()
        };

        Template { header, body }
    }
}

fn concat_dedup(parent: &[String], child: &[String]) -> Vec<String> {
    let mut out = parent.to_vec();
    for item in child {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(yaml_header: &str, body: &str) -> Template {
        let text = format!("---\n{yaml_header}\n---\n\n{body}");
        Template::parse(&text, "test").unwrap()
    }

    #[test]
    fn test_parse_header_and_body() {
        let t = template(
            "name: default\ntype: policy\nrequired_fields: [title, status]",
            "# {{ title }}\n\nBody here.\n",
        );
        assert_eq!(t.header.name, "default");
        assert_eq!(t.header.record_type, "policy");
        assert_eq!(t.header.required_fields, vec!["title", "status"]);
        assert!(t.body.starts_with("# {{ title }}"));
    }

    #[test]
    fn test_parse_rejects_missing_delimiters() {
        let err = Template::parse("name: default", "bad").unwrap_err();
        assert!(matches!(err, TemplateError::Parse { .. }));
    }

    #[test]
    fn test_parse_advanced_rules() {
        let t = template(
            r#"name: default
type: bylaw
advanced_rules:
  - type: date_sequence
    fields: [created, updated]
  - type: content_quality
    fields: [summary]
relationships:
  - type: required_together
    fields: [effective_date, approved_by]
  - type: conditional
    if: "status == 'active'"
    then_required: [effective_date]"#,
            "",
        );
        assert_eq!(t.header.advanced_rules.len(), 2);
        assert!(matches!(
            t.header.advanced_rules[1],
            AdvancedRule::ContentQuality { min_length: 50, .. }
        ));
        assert_eq!(t.header.relationships.len(), 2);
    }

    #[test]
    fn test_merge_concatenates_and_overrides() {
        let parent = template(
            r#"name: base
type: document
required_fields: [title]
statuses: [draft]
sections:
  - name: overview
    required: true
  - name: history
validators:
  contact_email: email"#,
            "Parent body\n",
        );
        let child = template(
            r#"name: default
type: policy
required_fields: [department]
statuses: [draft, active]
sections:
  - name: overview
    required: false
    description: Short summary
  - name: enforcement
validators:
  website: url"#,
            "",
        );

        let merged = Template::merge(&parent, &child);
        assert_eq!(merged.header.name, "default");
        assert_eq!(merged.header.record_type, "policy");
        assert_eq!(merged.header.required_fields, vec!["title", "department"]);
        assert_eq!(merged.header.statuses, vec!["draft", "active"]);
        // Child override wins for overview; order preserved.
        assert_eq!(merged.header.sections[0].name, "overview");
        assert!(!merged.header.sections[0].required);
        assert_eq!(merged.header.sections[2].name, "enforcement");
        assert_eq!(merged.header.validators.len(), 2);
        // Empty child body inherits the parent body.
        assert_eq!(merged.body, "Parent body\n");
    }

    #[test]
    fn test_merge_is_associative_over_three_levels() {
        let a = template(
            "name: a\ntype: document\nrequired_fields: [one]",
            "A body\n",
        );
        let b = template("name: b\ntype: document\nrequired_fields: [two]", "");
        let c = template(
            "name: c\ntype: policy\nrequired_fields: [three]",
            "C body\n",
        );

        let left = Template::merge(&Template::merge(&a, &b), &c);
        let right = Template::merge(&a, &Template::merge(&b, &c));

        assert_eq!(left.header.required_fields, right.header.required_fields);
        assert_eq!(left.header.name, right.header.name);
        assert_eq!(left.body, right.body);
    }
}
