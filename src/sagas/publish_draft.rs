//! PublishDraft Saga
//!
//! MoveToRecords -> CreateOrUpdateFile -> CommitToGit -> DeleteDraft ->
//! QueueIndexing -> EmitHooks. Publishing over an existing record updates
//! the row in place; only a newly-created row is deleted on compensation.
//! The deleted draft is not restorable - its compensation logs and moves
//! on.

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
use crate::record::{now_iso, paths, RecordError, SchemaValidator};

pub fn publish_draft_saga(services: &SagaServices) -> SagaDefinition<RecordSagaContext> {
    SagaDefinition::new("PublishDraft", 1)
        .validator(|ctx: &RecordSagaContext| {
            if ctx.draft_id.as_deref().map_or(true, str::is_empty) {
                return Err("draft id is required".to_string());
            }
            Ok(())
        })
        .step(MoveToRecords {
            metadata: services.metadata.clone(),
        })
        .step(CreateOrUpdateFile {
            tree: services.tree.clone(),
            schema: services.schema.clone(),
        })
        .step(CommitToGit {
            content_repo: services.content_repo.clone(),
        })
        .step(DeleteDraft {
            metadata: services.metadata.clone(),
        })
        .step(QueueIndexing {
            index: services.index.clone(),
        })
        .step(EmitHooks {
            hooks: services.hooks.clone(),
        })
}

struct MoveToRecords {
    metadata: Arc<dyn MetadataStore>,
}

#[async_trait]
impl SagaStep<RecordSagaContext> for MoveToRecords {
    fn name(&self) -> &str {
        "MoveToRecords"
    }

    async fn execute(&self, ctx: &mut RecordSagaContext) -> anyhow::Result<Value> {
        let draft_id = ctx.draft_id.clone().unwrap_or_default();
        let draft = self
            .metadata
            .get_draft(&draft_id)
            .await?
            .ok_or_else(|| RecordError::NotFound(draft_id.clone()))?;

        let existing = self.metadata.get_record(&draft.id).await?;
        let created = existing.is_none();

        let mut record = match existing {
            // Update in place, carrying draft content, status, and
            // metadata; the pre-existing row's creation stamp survives.
            Some(current) => {
                let mut updated = current;
                updated.title = draft.title.clone();
                updated.content = draft.content.clone();
                updated.status = draft.status.clone();
                updated.metadata = draft.metadata.clone();
                updated
            }
            None => draft.clone(),
        };
        record.workflow_state = None;
        record.updated = now_iso();
        if record.path.is_empty() {
            let year = record
                .metadata
                .get("year")
                .and_then(Value::as_str)
                .map(str::to_string);
            record.path = paths::active_path(&record.record_type, &record.id, year.as_deref());
        }

        if created {
            self.metadata.insert_record(&record).await?;
        } else {
            self.metadata.update_record(&record).await?;
        }

        ctx.record_id = Some(record.id.clone());
        ctx.set_record(&record);
        ctx.scratch
            .insert("pre_existing".to_string(), json!(!created));
        Ok(json!({ "recordId": record.id, "created": created }))
    }

    async fn compensate(
        &self,
        _ctx: &mut RecordSagaContext,
        result: &Value,
    ) -> anyhow::Result<()> {
        if result.get("created").and_then(Value::as_bool) != Some(true) {
            // Updates over an existing record are not rolled back.
            tracing::warn!("publish updated an existing record; leaving the row as-is");
            return Ok(());
        }
        if let Some(id) = result.get("recordId").and_then(Value::as_str) {
            self.metadata.delete_record(id).await?;
        }
        Ok(())
    }
}

struct CreateOrUpdateFile {
    tree: Arc<dyn WorkingTree>,
    schema: Arc<SchemaValidator>,
}

#[async_trait]
impl SagaStep<RecordSagaContext> for CreateOrUpdateFile {
    fn name(&self) -> &str {
        "CreateOrUpdateFile"
    }

    async fn execute(&self, ctx: &mut RecordSagaContext) -> anyhow::Result<Value> {
        let record = ctx
            .record()
            .ok_or_else(|| anyhow::anyhow!("no record prepared by MoveToRecords"))?;
        let text = materialize(&self.schema, &record)?;
        self.tree.write_file(&record.path, &text).await?;
        Ok(json!({ "path": record.path }))
    }

    async fn compensate(
        &self,
        _ctx: &mut RecordSagaContext,
        result: &Value,
    ) -> anyhow::Result<()> {
        if let Some(path) = result.get("path").and_then(Value::as_str) {
            self.tree.remove_file(path).await?;
        }
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
            .ok_or_else(|| anyhow::anyhow!("no record prepared by MoveToRecords"))?;
        let pre_existing = ctx
            .scratch
            .get("pre_existing")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let message = if pre_existing {
            format!("Update record: {}", record.title)
        } else {
            format!("Publish draft: {}", record.title)
        };
        let commit = self
            .content_repo
            .commit(&message, &[record.path.clone()])
            .await?;
        Ok(json!({ "commit": commit }))
    }
}

struct DeleteDraft {
    metadata: Arc<dyn MetadataStore>,
}

#[async_trait]
impl SagaStep<RecordSagaContext> for DeleteDraft {
    fn name(&self) -> &str {
        "DeleteDraft"
    }

    async fn execute(&self, ctx: &mut RecordSagaContext) -> anyhow::Result<Value> {
        let draft_id = ctx.draft_id.clone().unwrap_or_default();
        let deleted = self.metadata.delete_draft(&draft_id).await?;
        Ok(json!({ "draftId": draft_id, "deleted": deleted }))
    }

    async fn compensate(
        &self,
        _ctx: &mut RecordSagaContext,
        result: &Value,
    ) -> anyhow::Result<()> {
        // Best effort only: the draft row is gone.
        tracing::warn!(
            draft_id = %result.get("draftId").and_then(serde_json::Value::as_str).unwrap_or("?"),
            "deleted draft cannot be restored by compensation"
        );
        Ok(())
    }
}

struct QueueIndexing {
    index: Arc<dyn SearchIndex>,
}

#[async_trait]
impl SagaStep<RecordSagaContext> for QueueIndexing {
    fn name(&self) -> &str {
        "QueueIndexing"
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
                tracing::warn!(error = %err, "indexing dispatch failed; continuing");
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
            .emit("record:published", record_payload(&record))
            .await
        {
            tracing::warn!(error = %err, "record:published hook failed; continuing");
            return Ok(json!({ "emitted": false }));
        }
        Ok(json!({ "emitted": true }))
    }
}
