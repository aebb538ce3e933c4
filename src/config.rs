//! Platform Configuration
//!
//! The record-type, record-status, and module catalogues. Loaded from
//! YAML; the defaults cover the civic catalogue a fresh deployment ships
//! with. Read-only at runtime - the schema validator caches against it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTypeConfig {
    pub key: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordStatusConfig {
    pub key: String,
    #[serde(default)]
    pub label: String,
}

/// A module contributes a schema fragment to every record type it applies
/// to, per its declarative `record_types` rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    pub record_types: Vec<String>,
    /// JSON Schema fragment merged into the composed header schema.
    #[serde(default)]
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub record_types: Vec<RecordTypeConfig>,
    pub record_statuses: Vec<RecordStatusConfig>,
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

impl PlatformConfig {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn record_type_keys(&self) -> Vec<String> {
        self.record_types.iter().map(|t| t.key.clone()).collect()
    }

    pub fn status_keys(&self) -> Vec<String> {
        self.record_statuses.iter().map(|s| s.key.clone()).collect()
    }

    pub fn has_record_type(&self, key: &str) -> bool {
        self.record_types.iter().any(|t| t.key == key)
    }

    /// Modules whose rule set covers the given record type.
    pub fn modules_for(&self, record_type: &str) -> Vec<&ModuleConfig> {
        self.modules
            .iter()
            .filter(|m| m.record_types.iter().any(|t| t == record_type))
            .collect()
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        let record_type = |key: &str, label: &str| RecordTypeConfig {
            key: key.to_string(),
            label: label.to_string(),
        };
        let status = |key: &str, label: &str| RecordStatusConfig {
            key: key.to_string(),
            label: label.to_string(),
        };
        Self {
            record_types: vec![
                record_type("bylaw", "Bylaw"),
                record_type("ordinance", "Ordinance"),
                record_type("policy", "Policy"),
                record_type("proclamation", "Proclamation"),
                record_type("resolution", "Resolution"),
                record_type("minutes", "Meeting Minutes"),
                record_type("session", "Session"),
            ],
            record_statuses: vec![
                status("draft", "Draft"),
                status("proposed", "Proposed"),
                status("approved", "Approved"),
                status("active", "Active"),
                status("archived", "Archived"),
            ],
            modules: vec![ModuleConfig {
                name: "legal-register".to_string(),
                record_types: vec![
                    "bylaw".to_string(),
                    "ordinance".to_string(),
                    "policy".to_string(),
                    "proclamation".to_string(),
                    "resolution".to_string(),
                ],
                schema: serde_json::json!({
                    "properties": {
                        "legal_reference": { "type": "string" },
                        "adopted_date": { "type": "string" },
                        "repealed_by": { "type": "string" }
                    }
                }),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalogue() {
        let config = PlatformConfig::default();
        assert!(config.has_record_type("policy"));
        assert!(config.status_keys().contains(&"archived".to_string()));
        assert_eq!(config.modules_for("bylaw").len(), 1);
        assert!(config.modules_for("minutes").is_empty());
    }

    #[test]
    fn test_from_yaml() {
        let config = PlatformConfig::from_yaml(
            r#"
record_types:
  - key: permit
    label: Permit
record_statuses:
  - key: draft
modules:
  - name: zoning
    record_types: [permit]
    schema:
      properties:
        parcel_id: { type: string }
"#,
        )
        .unwrap();
        assert!(config.has_record_type("permit"));
        assert_eq!(config.modules_for("permit")[0].name, "zoning");
    }
}
