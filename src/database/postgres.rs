//! PostgreSQL-backed `MetadataStore`.
//!
//! Records and drafts are stored with denormalized listing columns plus
//! the full document as JSONB, so search/listing never reparses files.

use super::MetadataStore;
use crate::record::{Draft, Record, RecordError};
use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;

pub struct PgMetadataStore {
    pool: sqlx::PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Run embedded migrations (records, record_drafts).
    pub async fn migrate(&self) -> Result<(), RecordError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run civic-records migrations")
            .map_err(RecordError::Storage)
    }
}

fn record_from_row(row: &PgRow) -> Result<Record, RecordError> {
    let document: serde_json::Value = row
        .try_get("document")
        .map_err(|e| RecordError::Storage(e.into()))?;
    serde_json::from_value(document)
        .map_err(|e| RecordError::Storage(anyhow::anyhow!("corrupt record document: {e}")))
}

async fn upsert(
    pool: &sqlx::PgPool,
    table: &str,
    record: &Record,
    insert_only: bool,
) -> Result<(), RecordError> {
    let document = serde_json::to_value(record)
        .map_err(|e| RecordError::Storage(anyhow::anyhow!(e)))?;
    let conflict = if insert_only {
        ""
    } else {
        " ON CONFLICT (id) DO UPDATE SET
            record_type = EXCLUDED.record_type,
            status = EXCLUDED.status,
            title = EXCLUDED.title,
            body = EXCLUDED.body,
            workflow_state = EXCLUDED.workflow_state,
            document = EXCLUDED.document,
            updated_at = now()"
    };
    let sql = format!(
        "INSERT INTO {table} (id, record_type, status, title, body, workflow_state, document)
         VALUES ($1, $2, $3, $4, $5, $6, $7){conflict}"
    );
    let result = sqlx::query(&sql)
        .bind(&record.id)
        .bind(&record.record_type)
        .bind(&record.status)
        .bind(&record.title)
        .bind(&record.content)
        .bind(&record.workflow_state)
        .bind(&document)
        .execute(pool)
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(RecordError::AlreadyExists(record.id.clone()))
        }
        Err(e) => Err(RecordError::Storage(e.into())),
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn insert_record(&self, record: &Record) -> Result<(), RecordError> {
        upsert(&self.pool, "records", record, true).await
    }

    async fn get_record(&self, id: &str) -> Result<Option<Record>, RecordError> {
        let row = sqlx::query("SELECT document FROM records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RecordError::Storage(e.into()))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn update_record(&self, record: &Record) -> Result<(), RecordError> {
        let exists = sqlx::query("SELECT 1 FROM records WHERE id = $1")
            .bind(&record.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RecordError::Storage(e.into()))?;
        if exists.is_none() {
            return Err(RecordError::NotFound(record.id.clone()));
        }
        upsert(&self.pool, "records", record, false).await
    }

    async fn delete_record(&self, id: &str) -> Result<bool, RecordError> {
        let result = sqlx::query("DELETE FROM records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RecordError::Storage(e.into()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_records(
        &self,
        record_type: Option<&str>,
    ) -> Result<Vec<Record>, RecordError> {
        let rows = sqlx::query(
            "SELECT document FROM records
             WHERE ($1::text IS NULL OR record_type = $1)
             ORDER BY id",
        )
        .bind(record_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RecordError::Storage(e.into()))?;
        rows.iter().map(record_from_row).collect()
    }

    async fn search_records(
        &self,
        query: &str,
        record_type: Option<&str>,
    ) -> Result<Vec<Record>, RecordError> {
        let pattern = format!("%{}%", query.to_lowercase());
        let rows = sqlx::query(
            "SELECT document FROM records
             WHERE ($1::text IS NULL OR record_type = $1)
               AND (lower(title) LIKE $2 OR lower(body) LIKE $2)
             ORDER BY id",
        )
        .bind(record_type)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RecordError::Storage(e.into()))?;
        rows.iter().map(record_from_row).collect()
    }

    async fn insert_draft(&self, draft: &Draft) -> Result<(), RecordError> {
        upsert(&self.pool, "record_drafts", draft, true).await
    }

    async fn get_draft(&self, id: &str) -> Result<Option<Draft>, RecordError> {
        let row = sqlx::query("SELECT document FROM record_drafts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RecordError::Storage(e.into()))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn delete_draft(&self, id: &str) -> Result<bool, RecordError> {
        let result = sqlx::query("DELETE FROM record_drafts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RecordError::Storage(e.into()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_drafts(&self) -> Result<Vec<Draft>, RecordError> {
        let rows = sqlx::query("SELECT document FROM record_drafts ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RecordError::Storage(e.into()))?;
        rows.iter().map(record_from_row).collect()
    }
}
