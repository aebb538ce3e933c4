//! Saga State Persistence Trait
//!
//! The coordinator and recovery manager operate exclusively through this
//! trait, enabling pluggable backends (MemorySagaStore for tests and the
//! POC path, Postgres for production). Every method is atomic per call.

use crate::state::{CompensationStatus, SagaInstance, SagaStatus};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Insert or fully replace a saga instance. The saga id is unique.
    async fn save_state(&self, state: &SagaInstance) -> Result<()>;

    async fn get_state(&self, id: Uuid) -> Result<Option<SagaInstance>>;

    /// Most recent instance carrying the given idempotency key, if any.
    async fn get_state_by_idempotency_key(&self, key: &str)
        -> Result<Option<SagaInstance>>;

    /// Update status and optionally the current step and error message.
    /// Terminal statuses stamp `completed_at`.
    async fn update_status(
        &self,
        id: Uuid,
        status: SagaStatus,
        current_step: Option<u32>,
        error: Option<&str>,
    ) -> Result<()>;

    /// Replace the serialized step-result list.
    async fn update_step_results(
        &self,
        id: Uuid,
        results: &[serde_json::Value],
    ) -> Result<()>;

    /// Update compensation status and optionally its error message.
    /// Terminal compensation statuses stamp `compensation_completed_at`.
    async fn update_compensation_status(
        &self,
        id: Uuid,
        status: CompensationStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Sagas still marked `executing` whose `started_at` is older than
    /// `now - timeout`: executions no longer under any live coordinator.
    async fn get_stuck_sagas(&self, timeout: Duration) -> Result<Vec<SagaInstance>>;

    /// Failed sagas whose compensation did not complete (status absent,
    /// pending, partial, or failed).
    async fn get_failed_sagas(&self) -> Result<Vec<SagaInstance>>;
}
