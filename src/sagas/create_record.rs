//! CreateRecord Saga
//!
//! CreateInRecords -> CreateFile -> CommitToGit -> QueueIndexing ->
//! EmitHooks. A failure before the commit rolls back completely: the row
//! delete compensates step 1, the file delete compensates step 2. The
//! commit is never compensated.

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
use crate::record::{paths, slugify, Record, SchemaValidator};

pub fn create_record_saga(services: &SagaServices) -> SagaDefinition<RecordSagaContext> {
    SagaDefinition::new("CreateRecord", 1)
        .validator(|ctx: &RecordSagaContext| {
            if ctx.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
                return Err("title is required".to_string());
            }
            if ctx
                .record_type
                .as_deref()
                .map_or(true, |t| t.trim().is_empty())
            {
                return Err("record type is required".to_string());
            }
            Ok(())
        })
        .step(CreateInRecords {
            metadata: services.metadata.clone(),
        })
        .step(CreateFile {
            tree: services.tree.clone(),
            schema: services.schema.clone(),
        })
        .step(CommitToGit {
            content_repo: services.content_repo.clone(),
        })
        .step(QueueIndexing {
            index: services.index.clone(),
        })
        .step(EmitHooks {
            hooks: services.hooks.clone(),
        })
}

struct CreateInRecords {
    metadata: Arc<dyn MetadataStore>,
}

#[async_trait]
impl SagaStep<RecordSagaContext> for CreateInRecords {
    fn name(&self) -> &str {
        "CreateInRecords"
    }

    async fn execute(&self, ctx: &mut RecordSagaContext) -> anyhow::Result<Value> {
        let title = ctx.title.clone().unwrap_or_default();
        let record_type = ctx.record_type.clone().unwrap_or_default();
        let id = ctx.record_id.clone().unwrap_or_else(|| {
            let slug = slugify(&title);
            let unique = uuid::Uuid::new_v4().simple().to_string();
            let suffix = &unique[..8];
            if slug.is_empty() {
                format!("{record_type}-{suffix}")
            } else {
                format!("{slug}-{suffix}")
            }
        });

        let mut record = Record::new(
            &id,
            &title,
            &record_type,
            ctx.status.as_deref().unwrap_or("draft"),
            ctx.user.as_deref().unwrap_or("unknown"),
        );
        record.content = ctx.content.clone().unwrap_or_default();
        record.metadata = ctx.metadata.clone();
        let year = record
            .metadata
            .get("year")
            .and_then(Value::as_str)
            .map(str::to_string);
        record.path = paths::active_path(&record_type, &id, year.as_deref());

        self.metadata.insert_record(&record).await?;
        ctx.record_id = Some(id.clone());
        ctx.set_record(&record);
        Ok(json!({ "recordId": id, "path": record.path }))
    }

    async fn compensate(
        &self,
        _ctx: &mut RecordSagaContext,
        result: &Value,
    ) -> anyhow::Result<()> {
        if let Some(id) = result.get("recordId").and_then(Value::as_str) {
            self.metadata.delete_record(id).await?;
        }
        Ok(())
    }
}

struct CreateFile {
    tree: Arc<dyn WorkingTree>,
    schema: Arc<SchemaValidator>,
}

#[async_trait]
impl SagaStep<RecordSagaContext> for CreateFile {
    fn name(&self) -> &str {
        "CreateFile"
    }

    async fn execute(&self, ctx: &mut RecordSagaContext) -> anyhow::Result<Value> {
        let record = ctx
            .record()
            .ok_or_else(|| anyhow::anyhow!("no record prepared by CreateInRecords"))?;
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
            .ok_or_else(|| anyhow::anyhow!("no record prepared by CreateInRecords"))?;
        let commit = self
            .content_repo
            .commit(
                &format!("Create record: {}", record.title),
                &[record.path.clone()],
            )
            .await?;
        Ok(json!({ "commit": commit }))
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
        let record_type = ctx.record_type.clone().unwrap_or_default();
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

    async fn execute(&self, ctx: &mut RecordSagaContext) -> anyhow::Result<Value> {
        let Some(record) = ctx.record() else {
            return Ok(json!({ "emitted": false }));
        };
        if let Err(err) = self
            .hooks
            .emit("record:created", record_payload(&record))
            .await
        {
            tracing::warn!(error = %err, "record:created hook failed; continuing");
            return Ok(json!({ "emitted": false }));
        }
        Ok(json!({ "emitted": true, "recordId": record.id }))
    }

    async fn compensate(
        &self,
        ctx: &mut RecordSagaContext,
        result: &Value,
    ) -> anyhow::Result<()> {
        if result.get("emitted").and_then(Value::as_bool) != Some(true) {
            return Ok(());
        }
        let payload = json!({
            "recordId": result.get("recordId").cloned().unwrap_or(Value::Null),
            "correlationId": ctx.correlation_id,
            "reason": "saga_compensation",
        });
        if let Err(err) = self.hooks.emit("record:created:reverted", payload).await {
            tracing::warn!(error = %err, "record:created:reverted hook failed");
        }
        Ok(())
    }
}
