//! PostgreSQL-backed implementations of `SagaStore` and `LockStore`.
//!
//! All updates are single statements; uniqueness comes from the primary
//! keys on `saga_states(id)` and `saga_resource_locks(resource_key)`.

use crate::locks::{LockStore, ResourceLock};
use crate::state::{CompensationStatus, SagaInstance, SagaStatus};
use crate::store::SagaStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::time::Duration;
use uuid::Uuid;

fn instance_from_row(row: &PgRow) -> Result<SagaInstance> {
    let status: String = row.try_get("status")?;
    let compensation_status: Option<String> = row.try_get("compensation_status")?;
    let current_step: i32 = row.try_get("current_step")?;
    let saga_version: i32 = row.try_get("saga_version")?;
    let step_results: serde_json::Value = row.try_get("step_results")?;

    Ok(SagaInstance {
        id: row.try_get("id")?,
        saga_type: row.try_get("saga_type")?,
        saga_version: saga_version as u32,
        context: row.try_get("context")?,
        status: status
            .parse::<SagaStatus>()
            .map_err(|e| anyhow::anyhow!(e))?,
        current_step: current_step as u32,
        step_results: serde_json::from_value(step_results)
            .context("failed to deserialize step results")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error: row.try_get("error")?,
        compensation_status: compensation_status
            .map(|s| s.parse::<CompensationStatus>().map_err(|e| anyhow::anyhow!(e)))
            .transpose()?,
        compensation_completed_at: row.try_get("compensation_completed_at")?,
        compensation_error: row.try_get("compensation_error")?,
        idempotency_key: row.try_get("idempotency_key")?,
        correlation_id: row.try_get("correlation_id")?,
    })
}

const INSTANCE_COLUMNS: &str = "id, saga_type, saga_version, context, status, \
     current_step, step_results, started_at, completed_at, error, \
     compensation_status, compensation_completed_at, compensation_error, \
     idempotency_key, correlation_id";

pub struct PostgresSagaStore {
    pool: sqlx::PgPool,
}

impl PostgresSagaStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Run embedded migrations (saga_states, saga_resource_locks).
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run civic-saga migrations")?;
        Ok(())
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn save_state(&self, state: &SagaInstance) -> Result<()> {
        let step_results = serde_json::to_value(&state.step_results)?;
        sqlx::query(
            r#"
            INSERT INTO saga_states (
                id, saga_type, saga_version, context, status, current_step,
                step_results, started_at, completed_at, error,
                compensation_status, compensation_completed_at,
                compensation_error, idempotency_key, correlation_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                context = EXCLUDED.context,
                status = EXCLUDED.status,
                current_step = EXCLUDED.current_step,
                step_results = EXCLUDED.step_results,
                completed_at = EXCLUDED.completed_at,
                error = EXCLUDED.error,
                compensation_status = EXCLUDED.compensation_status,
                compensation_completed_at = EXCLUDED.compensation_completed_at,
                compensation_error = EXCLUDED.compensation_error
            "#,
        )
        .bind(state.id)
        .bind(&state.saga_type)
        .bind(state.saga_version as i32)
        .bind(&state.context)
        .bind(state.status.to_string())
        .bind(state.current_step as i32)
        .bind(&step_results)
        .bind(state.started_at)
        .bind(state.completed_at)
        .bind(&state.error)
        .bind(state.compensation_status.map(|s| s.to_string()))
        .bind(state.compensation_completed_at)
        .bind(&state.compensation_error)
        .bind(&state.idempotency_key)
        .bind(&state.correlation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_state(&self, id: Uuid) -> Result<Option<SagaInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM saga_states WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(instance_from_row).transpose()
    }

    async fn get_state_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<SagaInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM saga_states \
             WHERE idempotency_key = $1 ORDER BY started_at DESC LIMIT 1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(instance_from_row).transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: SagaStatus,
        current_step: Option<u32>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE saga_states SET
                status = $2,
                current_step = COALESCE($3, current_step),
                error = COALESCE($4, error),
                completed_at = CASE WHEN $5 THEN now() ELSE completed_at END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(current_step.map(|s| s as i32))
        .bind(error)
        .bind(status.is_terminal())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_step_results(
        &self,
        id: Uuid,
        results: &[serde_json::Value],
    ) -> Result<()> {
        let results = serde_json::to_value(results)?;
        sqlx::query("UPDATE saga_states SET step_results = $2 WHERE id = $1")
            .bind(id)
            .bind(&results)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_compensation_status(
        &self,
        id: Uuid,
        status: CompensationStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let terminal = matches!(
            status,
            CompensationStatus::Completed
                | CompensationStatus::Failed
                | CompensationStatus::Partial
        );
        sqlx::query(
            r#"
            UPDATE saga_states SET
                compensation_status = $2,
                compensation_error = COALESCE($3, compensation_error),
                compensation_completed_at =
                    CASE WHEN $4 THEN now() ELSE compensation_completed_at END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(error)
        .bind(terminal)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_stuck_sagas(&self, timeout: Duration) -> Result<Vec<SagaInstance>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).context("timeout out of range")?;
        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM saga_states \
             WHERE status = 'executing' AND started_at < $1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(instance_from_row).collect()
    }

    async fn get_failed_sagas(&self) -> Result<Vec<SagaInstance>> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM saga_states \
             WHERE status = 'failed' \
               AND (compensation_status IS NULL \
                    OR compensation_status <> 'completed')"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(instance_from_row).collect()
    }
}

/// PostgreSQL-backed `LockStore`. Insert atomicity relies on the primary
/// key over `resource_key`.
pub struct PostgresLockStore {
    pool: sqlx::PgPool,
}

impl PostgresLockStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for PostgresLockStore {
    async fn try_insert(&self, lock: &ResourceLock) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO saga_resource_locks
                (resource_key, saga_id, acquired_at, timeout_secs, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (resource_key) DO NOTHING
            "#,
        )
        .bind(&lock.resource_key)
        .bind(lock.saga_id)
        .bind(lock.acquired_at)
        .bind(lock.timeout_secs as i64)
        .bind(lock.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<ResourceLock>> {
        let row = sqlx::query(
            "SELECT resource_key, saga_id, acquired_at, timeout_secs, expires_at \
             FROM saga_resource_locks WHERE resource_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            let timeout_secs: i64 = row.try_get("timeout_secs")?;
            Ok(ResourceLock {
                resource_key: row.try_get("resource_key")?,
                saga_id: row.try_get("saga_id")?,
                acquired_at: row.try_get("acquired_at")?,
                timeout_secs: timeout_secs as u64,
                expires_at: row.try_get("expires_at")?,
            })
        })
        .transpose()
    }

    async fn delete(&self, key: &str, holder: Option<Uuid>) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM saga_resource_locks \
             WHERE resource_key = $1 AND ($2::uuid IS NULL OR saga_id = $2)",
        )
        .bind(key)
        .bind(holder)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_expiry(
        &self,
        key: &str,
        holder: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE saga_resource_locks SET expires_at = $3 \
             WHERE resource_key = $1 AND saga_id = $2",
        )
        .bind(key)
        .bind(holder)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM saga_resource_locks WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
