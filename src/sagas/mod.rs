//! Concrete Record Sagas
//!
//! The four workflows that mutate civic records - create, update,
//! archive, publish-draft - each an ordered list of typed steps with
//! step-local compensation. Git commits are never compensated; derived
//! steps (indexing, subscriber hooks) swallow their own errors.

mod archive_record;
mod context;
mod create_record;
mod publish_draft;
mod update_record;

pub use archive_record::archive_record_saga;
pub use context::RecordSagaContext;
pub use create_record::create_record_saga;
pub use publish_draft::publish_draft_saga;
pub use update_record::update_record_saga;

use crate::database::MetadataStore;
use crate::fs::WorkingTree;
use crate::git::ContentRepository;
use crate::hooks::HookBus;
use crate::index::SearchIndex;
use crate::record::{Record, SchemaValidator};
use std::sync::Arc;

/// The external collaborators every record saga touches.
#[derive(Clone)]
pub struct SagaServices {
    pub metadata: Arc<dyn MetadataStore>,
    pub tree: Arc<dyn WorkingTree>,
    pub content_repo: Arc<dyn ContentRepository>,
    pub index: Arc<dyn SearchIndex>,
    pub hooks: Arc<dyn HookBus>,
    pub schema: Arc<SchemaValidator>,
}

/// Serialize and schema-validate a record, returning the canonical text.
/// Aborts the calling step on validation errors.
pub(crate) fn materialize(
    schema: &SchemaValidator,
    record: &Record,
) -> anyhow::Result<String> {
    let report = schema.validate(
        &record.header_map(),
        &record.record_type,
        &Default::default(),
    );
    if !report.valid {
        return Err(crate::record::RecordError::Validation {
            diagnostics: report.errors,
        }
        .into());
    }
    for warning in &report.warnings {
        tracing::warn!(record_id = %record.id, code = %warning.code,
            "header warning: {}", warning.message);
    }
    Ok(crate::record::serialize_record(record))
}

/// Event payload for subscriber hooks.
pub(crate) fn record_payload(record: &Record) -> serde_json::Value {
    serde_json::json!({
        "id": record.id,
        "type": record.record_type,
        "title": record.title,
        "status": record.status,
        "path": record.path,
    })
}
