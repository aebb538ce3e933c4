//! ArchiveRecord Saga
//!
//! UpdateStatusToArchived -> MoveFileToArchive -> CommitToGit ->
//! RemoveFromIndex -> EmitHooks. The move keeps the year carried by the
//! original path; otherwise the archive year derives from the created
//! timestamp. Compensation renames the file back and restores the
//! original row, in that order.

use async_trait::async_trait;
use civic_saga::{SagaDefinition, SagaStep};
use serde_json::{json, Value};
use std::sync::Arc;

use super::{record_payload, RecordSagaContext, SagaServices};
use crate::database::MetadataStore;
use crate::fs::WorkingTree;
use crate::git::ContentRepository;
use crate::hooks::HookBus;
use crate::index::SearchIndex;
use crate::record::{now_iso, paths, Record, RecordError};

pub fn archive_record_saga(services: &SagaServices) -> SagaDefinition<RecordSagaContext> {
    SagaDefinition::new("ArchiveRecord", 1)
        .validator(|ctx: &RecordSagaContext| {
            if ctx.record_id.as_deref().map_or(true, str::is_empty) {
                return Err("record id is required".to_string());
            }
            Ok(())
        })
        .step(UpdateStatusToArchived {
            metadata: services.metadata.clone(),
        })
        .step(MoveFileToArchive {
            metadata: services.metadata.clone(),
            tree: services.tree.clone(),
        })
        .step(CommitToGit {
            content_repo: services.content_repo.clone(),
        })
        .step(RemoveFromIndex {
            index: services.index.clone(),
        })
        .step(EmitHooks {
            hooks: services.hooks.clone(),
        })
}

struct UpdateStatusToArchived {
    metadata: Arc<dyn MetadataStore>,
}

#[async_trait]
impl SagaStep<RecordSagaContext> for UpdateStatusToArchived {
    fn name(&self) -> &str {
        "UpdateStatusToArchived"
    }

    async fn execute(&self, ctx: &mut RecordSagaContext) -> anyhow::Result<Value> {
        let id = ctx.record_id.clone().unwrap_or_default();
        let original = self
            .metadata
            .get_record(&id)
            .await?
            .ok_or_else(|| RecordError::NotFound(id.clone()))?;

        let mut archived = original.clone();
        archived.status = "archived".to_string();
        archived.updated = now_iso();
        archived.metadata.insert(
            "archived_by".to_string(),
            json!(ctx.user.as_deref().unwrap_or("unknown")),
        );
        archived
            .metadata
            .insert("archived_at".to_string(), json!(now_iso()));
        self.metadata.update_record(&archived).await?;

        ctx.set_original(&original);
        ctx.set_record(&archived);
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

struct MoveFileToArchive {
    metadata: Arc<dyn MetadataStore>,
    tree: Arc<dyn WorkingTree>,
}

#[async_trait]
impl SagaStep<RecordSagaContext> for MoveFileToArchive {
    fn name(&self) -> &str {
        "MoveFileToArchive"
    }

    async fn execute(&self, ctx: &mut RecordSagaContext) -> anyhow::Result<Value> {
        let mut record = ctx
            .record()
            .ok_or_else(|| anyhow::anyhow!("no record prepared by UpdateStatusToArchived"))?;

        let from = if record.path.is_empty() {
            paths::active_path(&record.record_type, &record.id, None)
        } else {
            record.path.clone()
        };
        let to = paths::archive_path(&from, &record.record_type, &record.id, &record.created);

        self.tree.rename(&from, &to).await?;
        record.path = to.clone();
        self.metadata.update_record(&record).await?;

        ctx.set_record(&record);
        ctx.scratch
            .insert("archive_move".to_string(), json!({ "from": from, "to": to }));
        Ok(json!({ "from": from, "to": to }))
    }

    async fn compensate(
        &self,
        _ctx: &mut RecordSagaContext,
        result: &Value,
    ) -> anyhow::Result<()> {
        let (Some(from), Some(to)) = (
            result.get("from").and_then(Value::as_str),
            result.get("to").and_then(Value::as_str),
        ) else {
            return Ok(());
        };
        self.tree.rename(to, from).await?;
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
            .ok_or_else(|| anyhow::anyhow!("no record prepared by UpdateStatusToArchived"))?;
        let mut paths = Vec::new();
        if let Some(movement) = ctx.scratch.get("archive_move") {
            for key in ["from", "to"] {
                if let Some(path) = movement.get(key).and_then(Value::as_str) {
                    paths.push(path.to_string());
                }
            }
        } else {
            paths.push(record.path.clone());
        }
        let commit = self
            .content_repo
            .commit(&format!("Archive record: {}", record.title), &paths)
            .await?;
        Ok(json!({ "commit": commit }))
    }
}

struct RemoveFromIndex {
    index: Arc<dyn SearchIndex>,
}

#[async_trait]
impl SagaStep<RecordSagaContext> for RemoveFromIndex {
    fn name(&self) -> &str {
        "RemoveFromIndex"
    }

    fn is_compensatable(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &mut RecordSagaContext) -> anyhow::Result<Value> {
        let Some(record) = ctx.record() else {
            return Ok(json!({ "removed": false }));
        };
        match self.index.remove_record(&record.id, &record.record_type).await {
            Ok(()) => Ok(json!({ "removed": true })),
            Err(err) => {
                tracing::warn!(error = %err, "index removal failed; continuing");
                Ok(json!({ "removed": false }))
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
            .emit("record:archived", record_payload(&record))
            .await
        {
            tracing::warn!(error = %err, "record:archived hook failed; continuing");
            return Ok(json!({ "emitted": false }));
        }
        Ok(json!({ "emitted": true }))
    }
}
