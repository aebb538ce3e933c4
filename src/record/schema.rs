//! Header Schema Validator
//!
//! Compiles a composed JSON Schema per record type - base schema, optional
//! type extension, module extensions per the configured rule sets, and any
//! runtime-registered plugin extensions - and validates record headers
//! against it, producing structured diagnostics with stable codes.
//!
//! Compositions are cached by (record type, options); registering or
//! unregistering a plugin invalidates the cache. The `type` and `status`
//! enums are injected at build time from the configured catalogues.
//!
//! The business-rule layer runs only when the schema passes.

use crate::config::PlatformConfig;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
}

/// One validation finding.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    /// Stable code: required, type, enum, format, pattern, length, range,
    /// or a business-rule code.
    pub code: String,
    pub message: String,
    /// Dotted field path, e.g. `source.reference`.
    pub field: Option<String>,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub info: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidationOptions {
    /// Accept header fields outside the composed schema.
    pub allow_unknown_fields: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            allow_unknown_fields: true,
        }
    }
}

/// A runtime schema extension with a record-type predicate.
pub struct PluginExtension {
    pub name: String,
    applies: Box<dyn Fn(&str) -> bool + Send + Sync>,
    schema: Value,
}

impl PluginExtension {
    pub fn new(
        name: impl Into<String>,
        applies: impl Fn(&str) -> bool + Send + Sync + 'static,
        schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            applies: Box::new(applies),
            schema,
        }
    }
}

type BusinessRuleFn =
    dyn Fn(&serde_json::Map<String, Value>) -> Vec<Diagnostic> + Send + Sync;

pub struct SchemaValidator {
    config: Arc<PlatformConfig>,
    type_extensions: HashMap<String, Value>,
    plugins: RwLock<Vec<PluginExtension>>,
    business_rules: RwLock<Vec<Box<BusinessRuleFn>>>,
    cache: RwLock<HashMap<(String, ValidationOptions), Arc<jsonschema::Validator>>>,
}

impl SchemaValidator {
    pub fn new(config: Arc<PlatformConfig>) -> Self {
        Self {
            config,
            type_extensions: builtin_type_extensions(),
            plugins: RwLock::new(Vec::new()),
            business_rules: RwLock::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register a plugin extension. Invalidates the composition cache.
    pub fn register_plugin(&self, plugin: PluginExtension) {
        self.plugins
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(plugin);
        self.invalidate_cache();
    }

    /// Remove a plugin by name. Invalidates the composition cache.
    pub fn unregister_plugin(&self, name: &str) -> bool {
        let mut plugins = self.plugins.write().unwrap_or_else(|e| e.into_inner());
        let before = plugins.len();
        plugins.retain(|p| p.name != name);
        let removed = plugins.len() != before;
        drop(plugins);
        if removed {
            self.invalidate_cache();
        }
        removed
    }

    pub fn register_business_rule<F>(&self, rule: F)
    where
        F: Fn(&serde_json::Map<String, Value>) -> Vec<Diagnostic> + Send + Sync + 'static,
    {
        self.business_rules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(rule));
    }

    fn invalidate_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Validate a header against the composed schema for `record_type`.
    pub fn validate(
        &self,
        header: &serde_json::Map<String, Value>,
        record_type: &str,
        options: &ValidationOptions,
    ) -> ValidationReport {
        let validator = self.validator_for(record_type, options);
        let instance = Value::Object(header.clone());

        let mut report = ValidationReport::default();
        match validator {
            Ok(validator) => {
                for error in validator.iter_errors(&instance) {
                    report.errors.push(diagnostic_from_error(&error));
                }
            }
            Err(message) => {
                report.errors.push(Diagnostic {
                    severity: DiagnosticSeverity::Error,
                    code: "schema".to_string(),
                    message,
                    field: None,
                    suggestion: None,
                });
            }
        }

        // Business rules run only on a schema-clean header.
        if report.errors.is_empty() {
            report.warnings.extend(builtin_business_rules(header));
            let rules = self.business_rules.read().unwrap_or_else(|e| e.into_inner());
            for rule in rules.iter() {
                for diagnostic in rule(header) {
                    match diagnostic.severity {
                        DiagnosticSeverity::Error => report.errors.push(diagnostic),
                        DiagnosticSeverity::Warning => report.warnings.push(diagnostic),
                        DiagnosticSeverity::Info => report.info.push(diagnostic),
                    }
                }
            }
        }

        report.valid = report.errors.is_empty();
        report
    }

    fn validator_for(
        &self,
        record_type: &str,
        options: &ValidationOptions,
    ) -> Result<Arc<jsonschema::Validator>, String> {
        let key = (record_type.to_string(), options.clone());
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(validator) = cache.get(&key) {
                return Ok(validator.clone());
            }
        }

        let schema = self.compose_schema(record_type, options);
        let validator = jsonschema::options()
            .should_validate_formats(true)
            .build(&schema)
            .map_err(|e| format!("schema composition for '{record_type}' failed: {e}"))?;
        let validator = Arc::new(validator);

        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, validator.clone());
        Ok(validator)
    }

    fn compose_schema(&self, record_type: &str, options: &ValidationOptions) -> Value {
        let mut schema = base_schema(&self.config, options);

        if let Some(extension) = self.type_extensions.get(record_type) {
            merge_fragment(&mut schema, extension);
        }
        for module in self.config.modules_for(record_type) {
            if module.schema.is_object() {
                merge_fragment(&mut schema, &module.schema);
            }
        }
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        for plugin in plugins.iter() {
            if (plugin.applies)(record_type) {
                merge_fragment(&mut schema, &plugin.schema);
            }
        }
        schema
    }
}

fn base_schema(config: &PlatformConfig, options: &ValidationOptions) -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string", "minLength": 1 },
            "title": { "type": "string", "minLength": 1 },
            "type": { "type": "string", "enum": config.record_type_keys() },
            "status": { "type": "string", "enum": config.status_keys() },
            "author": { "type": "string", "minLength": 1 },
            "authors": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "username": { "type": "string" },
                        "name": { "type": "string" },
                        "role": { "type": "string" }
                    }
                }
            },
            "created": { "type": "string", "minLength": 1 },
            "updated": { "type": "string", "minLength": 1 },
            "tags": { "type": "array", "items": { "type": "string" } },
            "module": { "type": "string" },
            "slug": { "type": "string", "pattern": "^[a-z0-9][a-z0-9-]*$" },
            "version": { "type": "string" },
            "priority": { "type": "string" },
            "department": { "type": "string" },
            "source": {
                "type": "object",
                "required": ["reference"],
                "properties": {
                    "reference": { "type": "string", "minLength": 1 },
                    "original_title": { "type": "string" },
                    "filename": { "type": "string" },
                    "url": { "type": "string", "format": "uri" },
                    "source_type": { "type": "string" },
                    "imported_at": { "type": "string" },
                    "imported_by": { "type": "string" }
                }
            },
            "commit": {
                "type": "object",
                "required": ["hash"],
                "properties": {
                    "hash": { "type": "string" },
                    "signature": { "type": "string" }
                }
            },
            "linked_records": { "type": "array", "items": { "type": "string" } },
            "linked_geography_files": { "type": "array", "items": { "type": "string" } },
            "attached_files": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["id", "title", "type", "status", "author", "created", "updated"],
        "additionalProperties": options.allow_unknown_fields
    })
}

fn builtin_type_extensions() -> HashMap<String, Value> {
    let mut extensions = HashMap::new();
    extensions.insert(
        "minutes".to_string(),
        json!({
            "properties": {
                "session_type": { "type": "string" },
                "date": { "type": "string" },
                "duration": { "type": "string" },
                "location": { "type": "string" },
                "attendees": { "type": "array", "items": { "type": "string" } },
                "topics": { "type": "array", "items": { "type": "string" } },
                "media": { "type": "array", "items": { "type": "string" } }
            }
        }),
    );
    extensions.insert(
        "session".to_string(),
        json!({
            "properties": {
                "session_type": { "type": "string" },
                "date": { "type": "string" },
                "location": { "type": "string" }
            }
        }),
    );
    extensions.insert(
        "bylaw".to_string(),
        json!({
            "properties": {
                "bylaw_number": { "type": "string" },
                "category": { "type": "string" }
            }
        }),
    );
    extensions
}

/// Merge a schema fragment: `properties` extend, `required` concatenates
/// without duplicates, any other top-level key is taken when absent.
fn merge_fragment(schema: &mut Value, fragment: &Value) {
    let (Some(schema), Some(fragment)) = (schema.as_object_mut(), fragment.as_object())
    else {
        return;
    };

    if let Some(Value::Object(new_props)) = fragment.get("properties") {
        let props = schema
            .entry("properties")
            .or_insert_with(|| json!({}));
        if let Some(props) = props.as_object_mut() {
            for (key, value) in new_props {
                props.insert(key.clone(), value.clone());
            }
        }
    }

    if let Some(Value::Array(new_required)) = fragment.get("required") {
        let required = schema
            .entry("required")
            .or_insert_with(|| json!([]));
        if let Some(required) = required.as_array_mut() {
            for item in new_required {
                if !required.contains(item) {
                    required.push(item.clone());
                }
            }
        }
    }

    for (key, value) in fragment {
        if key == "properties" || key == "required" {
            continue;
        }
        schema.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

fn diagnostic_from_error(error: &jsonschema::ValidationError<'_>) -> Diagnostic {
    use jsonschema::error::ValidationErrorKind;

    let (code, field_override, suggestion) = match &error.kind {
        ValidationErrorKind::Required { property } => (
            "required",
            property.as_str().map(str::to_string),
            None,
        ),
        ValidationErrorKind::Type { .. } => ("type", None, None),
        ValidationErrorKind::Enum { options } => (
            "enum",
            None,
            Some(format!("expected one of: {options}")),
        ),
        ValidationErrorKind::Format { .. } => ("format", None, None),
        ValidationErrorKind::Pattern { .. } => ("pattern", None, None),
        ValidationErrorKind::MinLength { .. } | ValidationErrorKind::MaxLength { .. } => {
            ("length", None, None)
        }
        ValidationErrorKind::Minimum { .. }
        | ValidationErrorKind::Maximum { .. }
        | ValidationErrorKind::ExclusiveMinimum { .. }
        | ValidationErrorKind::ExclusiveMaximum { .. } => ("range", None, None),
        _ => ("schema", None, None),
    };

    let path = error.instance_path.to_string();
    let field = field_override.or_else(|| {
        let trimmed = path.trim_start_matches('/');
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.replace('/', "."))
        }
    });

    Diagnostic {
        severity: DiagnosticSeverity::Error,
        code: code.to_string(),
        message: error.to_string(),
        field,
        suggestion,
    }
}

/// Fixed business rules: empty `authors` sequence warns; `created` later
/// than `updated` warns.
fn builtin_business_rules(header: &serde_json::Map<String, Value>) -> Vec<Diagnostic> {
    let mut warnings = Vec::new();

    if let Some(Value::Array(authors)) = header.get("authors") {
        if authors.is_empty() {
            warnings.push(Diagnostic {
                severity: DiagnosticSeverity::Warning,
                code: "authors_empty".to_string(),
                message: "authors sequence is present but empty".to_string(),
                field: Some("authors".to_string()),
                suggestion: Some("drop the field or list at least one author".to_string()),
            });
        }
    }

    let created = header.get("created").and_then(Value::as_str);
    let updated = header.get("updated").and_then(Value::as_str);
    if let (Some(created), Some(updated)) = (created, updated) {
        if dates_out_of_order(created, updated) {
            warnings.push(Diagnostic {
                severity: DiagnosticSeverity::Warning,
                code: "created_after_updated".to_string(),
                message: format!("created ({created}) is later than updated ({updated})"),
                field: Some("created".to_string()),
                suggestion: None,
            });
        }
    }

    warnings
}

fn dates_out_of_order(created: &str, updated: &str) -> bool {
    use chrono::{DateTime, NaiveDate};

    let parse = |s: &str| -> Option<chrono::NaiveDateTime> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.naive_utc());
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?.and_hms_opt(0, 0, 0)
    };

    match (parse(created), parse(updated)) {
        (Some(created), Some(updated)) => created > updated,
        // Same-format ISO strings order lexically.
        _ => created > updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SchemaValidator {
        SchemaValidator::new(Arc::new(PlatformConfig::default()))
    }

    fn valid_header() -> serde_json::Map<String, Value> {
        json!({
            "id": "policy-open-data",
            "title": "Open Data",
            "type": "policy",
            "status": "draft",
            "author": "jdoe",
            "created": "2024-01-01T00:00:00Z",
            "updated": "2024-01-02T00:00:00Z"
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn test_valid_header_passes() {
        let report = validator().validate(&valid_header(), "policy", &Default::default());
        assert!(report.valid, "unexpected errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_missing_required_fields_report_codes() {
        let mut header = valid_header();
        header.remove("title");
        header.remove("created");

        let report = validator().validate(&header, "policy", &Default::default());
        assert!(!report.valid);
        let required: Vec<_> = report
            .errors
            .iter()
            .filter(|d| d.code == "required")
            .filter_map(|d| d.field.clone())
            .collect();
        assert!(required.contains(&"title".to_string()));
        assert!(required.contains(&"created".to_string()));
    }

    #[test]
    fn test_enum_injection_from_config() {
        let mut header = valid_header();
        header.insert("type".into(), json!("spaceship"));
        let report = validator().validate(&header, "policy", &Default::default());
        assert!(report.errors.iter().any(|d| d.code == "enum"));

        let mut header = valid_header();
        header.insert("status".into(), json!("imaginary"));
        let report = validator().validate(&header, "policy", &Default::default());
        assert!(report.errors.iter().any(|d| d.code == "enum"));
    }

    #[test]
    fn test_type_errors() {
        let mut header = valid_header();
        header.insert("tags".into(), json!("not-a-list"));
        let report = validator().validate(&header, "policy", &Default::default());
        assert!(report
            .errors
            .iter()
            .any(|d| d.code == "type" && d.field.as_deref() == Some("tags")));
    }

    #[test]
    fn test_source_requires_reference() {
        let mut header = valid_header();
        header.insert("source".into(), json!({ "url": "https://example.org" }));
        let report = validator().validate(&header, "policy", &Default::default());
        assert!(report
            .errors
            .iter()
            .any(|d| d.code == "required" && d.field.as_deref() == Some("reference")));
    }

    #[test]
    fn test_business_rules_warn_only_when_schema_passes() {
        let mut header = valid_header();
        header.insert("authors".into(), json!([]));
        header.insert("created".into(), json!("2024-05-01T00:00:00Z"));
        header.insert("updated".into(), json!("2024-01-01T00:00:00Z"));

        let report = validator().validate(&header, "policy", &Default::default());
        assert!(report.valid);
        assert!(report.warnings.iter().any(|d| d.code == "authors_empty"));
        assert!(report
            .warnings
            .iter()
            .any(|d| d.code == "created_after_updated"));

        // A schema error suppresses the business-rule layer.
        header.remove("id");
        let report = validator().validate(&header, "policy", &Default::default());
        assert!(!report.valid);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_module_extension_applies_per_rule_set() {
        let validator = validator();

        // legal-register applies to bylaws: its fields validate there.
        let mut header = valid_header();
        header.insert("type".into(), json!("bylaw"));
        header.insert("legal_reference".into(), json!(42));
        let report = validator.validate(&header, "bylaw", &Default::default());
        assert!(report
            .errors
            .iter()
            .any(|d| d.code == "type" && d.field.as_deref() == Some("legal_reference")));

        // For minutes the module does not apply; unknown fields pass.
        let mut header = valid_header();
        header.insert("type".into(), json!("minutes"));
        header.insert("legal_reference".into(), json!(42));
        let report = validator.validate(&header, "minutes", &Default::default());
        assert!(report.valid, "unexpected errors: {:?}", report.errors);
    }

    #[test]
    fn test_plugin_registration_invalidates_cache() {
        let validator = validator();
        let header = valid_header();

        // Warm the cache.
        assert!(validator.validate(&header, "policy", &Default::default()).valid);

        validator.register_plugin(PluginExtension::new(
            "review-plugin",
            |record_type| record_type == "policy",
            json!({ "required": ["review_cycle"] }),
        ));
        let report = validator.validate(&header, "policy", &Default::default());
        assert!(report
            .errors
            .iter()
            .any(|d| d.code == "required" && d.field.as_deref() == Some("review_cycle")));

        assert!(validator.unregister_plugin("review-plugin"));
        assert!(validator.validate(&header, "policy", &Default::default()).valid);
    }

    #[test]
    fn test_pluggable_business_rule() {
        let validator = validator();
        validator.register_business_rule(|header| {
            if header.contains_key("department") {
                Vec::new()
            } else {
                vec![Diagnostic {
                    severity: DiagnosticSeverity::Info,
                    code: "department_missing".to_string(),
                    message: "consider assigning a department".to_string(),
                    field: Some("department".to_string()),
                    suggestion: None,
                }]
            }
        });

        let report = validator.validate(&valid_header(), "policy", &Default::default());
        assert!(report.valid);
        assert!(report.info.iter().any(|d| d.code == "department_missing"));
    }
}
