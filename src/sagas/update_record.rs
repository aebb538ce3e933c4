//! UpdateRecord Saga
//!
//! UpdateInRecords -> UpdateFile -> CommitToGit -> QueueReIndexing ->
//! EmitHooks. The first step captures the pre-update record; the row and
//! file compensations write it back. Id and type are immutable and
//! silently dropped from the update set.

use async_trait::async_trait;
use civic_saga::{SagaDefinition, SagaStep};
use serde_json::{json, Value};
use std::sync::Arc;

use super::{materialize, record_payload, RecordSagaContext, SagaServices};
use crate::database::MetadataStore;
use crate::fs::WorkingTree;
use crate::git::ContentRepository;
use crate::hooks::HookBus;
use crate::index::SearchIndex;
use crate::record::{now_iso, Record, RecordError, SchemaValidator};

pub fn update_record_saga(services: &SagaServices) -> SagaDefinition<RecordSagaContext> {
    SagaDefinition::new("UpdateRecord", 1)
        .validator(|ctx: &RecordSagaContext| {
            if ctx.record_id.as_deref().map_or(true, str::is_empty) {
                return Err("record id is required".to_string());
            }
            if ctx.updates.is_empty() {
                return Err("at least one field update is required".to_string());
            }
            Ok(())
        })
        .step(UpdateInRecords {
            metadata: services.metadata.clone(),
        })
        .step(UpdateFile {
            tree: services.tree.clone(),
            schema: services.schema.clone(),
        })
        .step(CommitToGit {
            content_repo: services.content_repo.clone(),
        })
        .step(QueueReIndexing {
            index: services.index.clone(),
        })
        .step(EmitHooks {
            hooks: services.hooks.clone(),
        })
}

/// Apply field-by-field updates, preserving the immutable id and type.
fn apply_updates(
    mut record: Record,
    updates: &serde_json::Map<String, Value>,
) -> Record {
    for (key, value) in updates {
        match key.as_str() {
            "id" | "type" => {
                tracing::warn!(field = %key, "ignoring update to immutable field");
            }
            "title" => {
                if let Some(title) = value.as_str() {
                    record.title = title.to_string();
                }
            }
            "content" => {
                if let Some(content) = value.as_str() {
                    record.content = content.to_string();
                }
            }
            "status" => {
                if let Some(status) = value.as_str() {
                    record.status = status.to_string();
                }
            }
            "workflow_state" => {
                record.workflow_state = value.as_str().map(str::to_string);
            }
            "author" => {
                if let Some(author) = value.as_str() {
                    record.author = author.to_string();
                }
            }
            other => {
                if value.is_null() {
                    record.metadata.remove(other);
                } else {
                    record.metadata.insert(other.to_string(), value.clone());
                }
            }
        }
    }
    record.updated = now_iso();
    record
}

struct UpdateInRecords {
    metadata: Arc<dyn MetadataStore>,
}

#[async_trait]
impl SagaStep<RecordSagaContext> for UpdateInRecords {
    fn name(&self) -> &str {
        "UpdateInRecords"
    }

    async fn execute(&self, ctx: &mut RecordSagaContext) -> anyhow::Result<Value> {
        let id = ctx.record_id.clone().unwrap_or_default();
        let original = self
            .metadata
            .get_record(&id)
            .await?
            .ok_or_else(|| RecordError::NotFound(id.clone()))?;

        let updated = apply_updates(original.clone(), &ctx.updates);
        self.metadata.update_record(&updated).await?;

        ctx.set_original(&original);
        ctx.set_record(&updated);
        Ok(json!({
            "recordId": id,
            "original": serde_json::to_value(&original)?,
        }))
    }

    async fn compensate(
        &self,
        _ctx: &mut RecordSagaContext,
        result: &Value,
    ) -> anyhow::Result<()> {
        let Some(original) = result.get("original") else {
            return Ok(());
        };
        let original: Record = serde_json::from_value(original.clone())?;
        self.metadata.update_record(&original).await?;
        Ok(())
    }
}

struct UpdateFile {
    tree: Arc<dyn WorkingTree>,
    schema: Arc<SchemaValidator>,
}

#[async_trait]
impl SagaStep<RecordSagaContext> for UpdateFile {
    fn name(&self) -> &str {
        "UpdateFile"
    }

    async fn execute(&self, ctx: &mut RecordSagaContext) -> anyhow::Result<Value> {
        let record = ctx
            .record()
            .ok_or_else(|| anyhow::anyhow!("no record prepared by UpdateInRecords"))?;
        let text = materialize(&self.schema, &record)?;
        self.tree.write_file(&record.path, &text).await?;
        Ok(json!({ "path": record.path }))
    }

    async fn compensate(
        &self,
        ctx: &mut RecordSagaContext,
        _result: &Value,
    ) -> anyhow::Result<()> {
        // Re-serialize the stored original and write it back.
        let Some(original) = ctx.original() else {
            return Ok(());
        };
        let text = crate::record::serialize_record(&original);
        self.tree.write_file(&original.path, &text).await?;
        Ok(())
    }
}

struct CommitToGit {
    content_repo: Arc<dyn ContentRepository>,
}

#[async_trait]
impl SagaStep<RecordSagaContext> for CommitToGit {
    fn name(&self) -> &str {
        "CommitToGit"
    }

    fn is_compensatable(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &mut RecordSagaContext) -> anyhow::Result<Value> {
        let record = ctx
            .record()
            .ok_or_else(|| anyhow::anyhow!("no record prepared by UpdateInRecords"))?;
        let commit = self
            .content_repo
            .commit(
                &format!("Update record: {}", record.title),
                &[record.path.clone()],
            )
            .await?;
        Ok(json!({ "commit": commit }))
    }
}

struct QueueReIndexing {
    index: Arc<dyn SearchIndex>,
}

#[async_trait]
impl SagaStep<RecordSagaContext> for QueueReIndexing {
    fn name(&self) -> &str {
        "QueueReIndexing"
    }

    fn is_compensatable(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &mut RecordSagaContext) -> anyhow::Result<Value> {
        let record_type = ctx
            .record()
            .map(|r| r.record_type)
            .unwrap_or_default();
        match self.index.generate_indexes(&[record_type], false).await {
            Ok(()) => Ok(json!({ "queued": true })),
            Err(err) => {
                tracing::warn!(error = %err, "re-indexing dispatch failed; continuing");
                Ok(json!({ "queued": false }))
            }
        }
    }
}

struct EmitHooks {
    hooks: Arc<dyn HookBus>,
}

#[async_trait]
impl SagaStep<RecordSagaContext> for EmitHooks {
    fn name(&self) -> &str {
        "EmitHooks"
    }

    fn is_compensatable(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &mut RecordSagaContext) -> anyhow::Result<Value> {
        let Some(record) = ctx.record() else {
            return Ok(json!({ "emitted": false }));
        };
        if let Err(err) = self
            .hooks
            .emit("record:updated", record_payload(&record))
            .await
        {
            tracing::warn!(error = %err, "record:updated hook failed; continuing");
            return Ok(json!({ "emitted": false }));
        }
        Ok(json!({ "emitted": true }))
    }
}
