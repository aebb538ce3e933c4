//! Record Saga Context
//!
//! The caller-facing input for every record mutation, threaded mutably
//! through the steps. Canonical fields are strongly typed; `metadata`
//! passes free-form header fields through; `scratch` carries step outputs
//! (the working record, the pre-update original) forward so later steps
//! and compensations can see them.

use civic_saga::SagaContext;
use civic_templates::{TemplateExpander, TemplateLoader};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::record::Record;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSagaContext {
    pub correlation_id: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub draft_id: Option<String>,
    #[serde(default)]
    pub record_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Free-form header fields for new records.
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    /// Field-by-field updates for UpdateRecord.
    #[serde(default)]
    pub updates: serde_json::Map<String, Value>,
    /// Step outputs observable by later steps and compensations.
    #[serde(default)]
    pub scratch: serde_json::Map<String, Value>,
}

impl RecordSagaContext {
    fn empty(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            user: None,
            record_id: None,
            draft_id: None,
            record_type: None,
            title: None,
            content: None,
            status: None,
            metadata: serde_json::Map::new(),
            updates: serde_json::Map::new(),
            scratch: serde_json::Map::new(),
        }
    }

    /// Context for CreateRecord.
    pub fn create(
        correlation_id: impl Into<String>,
        record_type: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            record_type: Some(record_type.into()),
            title: Some(title.into()),
            ..Self::empty(correlation_id)
        }
    }

    /// Context for UpdateRecord.
    pub fn update(
        correlation_id: impl Into<String>,
        record_id: impl Into<String>,
        updates: serde_json::Map<String, Value>,
    ) -> Self {
        Self {
            record_id: Some(record_id.into()),
            updates,
            ..Self::empty(correlation_id)
        }
    }

    /// Context for ArchiveRecord.
    pub fn archive(
        correlation_id: impl Into<String>,
        record_id: impl Into<String>,
    ) -> Self {
        Self {
            record_id: Some(record_id.into()),
            ..Self::empty(correlation_id)
        }
    }

    /// Context for PublishDraft.
    pub fn publish(
        correlation_id: impl Into<String>,
        draft_id: impl Into<String>,
    ) -> Self {
        Self {
            draft_id: Some(draft_id.into()),
            ..Self::empty(correlation_id)
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Create-record context whose body comes from an expanded template.
    /// The scope feeds variable expansion; scope values for `status` and
    /// `author`-adjacent fields land on the context, everything else rides
    /// along as header metadata.
    pub fn from_template(
        correlation_id: impl Into<String>,
        loader: &TemplateLoader,
        record_type: &str,
        template_name: &str,
        title: impl Into<String>,
        scope: &HashMap<String, String>,
    ) -> Result<Self, civic_templates::TemplateError> {
        let title = title.into();
        let template = loader.load(record_type, template_name)?;

        let mut scope = scope.clone();
        scope.entry("title".to_string()).or_insert_with(|| title.clone());
        let body = TemplateExpander::new(loader).expand(&template, &scope)?;

        let mut ctx = Self::create(correlation_id, record_type, title);
        ctx.content = Some(body);
        ctx.status = scope.get("status").cloned();
        for (key, value) in &scope {
            if matches!(key.as_str(), "title" | "status" | "author" | "content") {
                continue;
            }
            ctx.metadata
                .insert(key.clone(), Value::String(value.clone()));
        }
        Ok(ctx)
    }

    // ── Scratch accessors ──

    pub fn set_record(&mut self, record: &Record) {
        if let Ok(value) = serde_json::to_value(record) {
            self.scratch.insert("record".to_string(), value);
        }
    }

    /// The record the saga is currently materializing.
    pub fn record(&self) -> Option<Record> {
        self.scratch
            .get("record")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_original(&mut self, record: &Record) {
        if let Ok(value) = serde_json::to_value(record) {
            self.scratch.insert("original".to_string(), value);
        }
    }

    /// The pre-mutation snapshot captured by the first step.
    pub fn original(&self) -> Option<Record> {
        self.scratch
            .get("original")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl SagaContext for RecordSagaContext {
    fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    fn resource_key(&self) -> Option<String> {
        if let Some(id) = &self.record_id {
            return Some(format!("record:{id}"));
        }
        self.draft_id.as_ref().map(|id| format!("draft:{id}"))
    }

    fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    fn idempotency_parts(&self) -> Vec<String> {
        [
            self.record_id.as_deref(),
            self.draft_id.as_deref(),
            self.record_type.as_deref(),
            self.title.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_key_prefers_record() {
        let mut ctx = RecordSagaContext::publish("c1", "draft-1");
        assert_eq!(ctx.resource_key(), Some("draft:draft-1".to_string()));

        ctx.record_id = Some("rec-1".to_string());
        assert_eq!(ctx.resource_key(), Some("record:rec-1".to_string()));

        let ctx = RecordSagaContext::create("c1", "policy", "Open Data");
        assert_eq!(ctx.resource_key(), None);
    }

    #[test]
    fn test_scratch_round_trip() {
        let mut ctx = RecordSagaContext::create("c1", "policy", "Open Data");
        let record = Record::new("rec-1", "Open Data", "policy", "draft", "clerk");
        ctx.set_record(&record);
        ctx.set_original(&record);

        assert_eq!(ctx.record().unwrap().id, "rec-1");
        assert_eq!(ctx.original().unwrap().id, "rec-1");

        // Context survives serialization with scratch intact.
        let json = serde_json::to_string(&ctx).unwrap();
        let restored: RecordSagaContext = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.record().unwrap().id, "rec-1");
    }
}
