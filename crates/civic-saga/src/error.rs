//! Saga Error Taxonomy
//!
//! One variant per failure code. Lock and context errors short-circuit
//! before any state is written; step errors are persisted on the saga
//! instance and trigger compensation.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the coordinator and its collaborators.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A step's execute raised; carries the step name and underlying cause.
    #[error("SAGA_STEP_ERROR: step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    /// A compensation operation failed.
    #[error("SAGA_COMPENSATION_ERROR: compensation for step '{step}' failed: {source}")]
    Compensation {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    /// A step failed and it, or a critical prior step, cannot be rolled
    /// back. Manual intervention required.
    #[error("UNCOMPENSATABLE_FAILURE: step '{step}' cannot be rolled back")]
    Uncompensatable { step: String },

    /// Invalid input context; nothing was persisted.
    #[error("SAGA_CONTEXT_ERROR: {0}")]
    Context(String),

    /// A step or the whole saga exceeded its time budget.
    #[error("SAGA_TIMEOUT: {scope} '{name}' exceeded {timeout_secs}s")]
    Timeout {
        scope: &'static str,
        name: String,
        timeout_secs: u64,
    },

    /// The resource lock could not be acquired.
    #[error("SAGA_LOCK_ERROR: {0}")]
    Lock(#[from] LockError),

    /// The recovery sweep itself failed.
    #[error("SAGA_RECOVERY_ERROR: {0}")]
    Recovery(String),

    /// State store failure outside any single step.
    #[error("saga state store error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl SagaError {
    /// Stable code for the structured result surface.
    pub fn code(&self) -> &'static str {
        match self {
            SagaError::Step { .. } => "SAGA_STEP_ERROR",
            SagaError::Compensation { .. } => "SAGA_COMPENSATION_ERROR",
            SagaError::Uncompensatable { .. } => "UNCOMPENSATABLE_FAILURE",
            SagaError::Context(_) => "SAGA_CONTEXT_ERROR",
            SagaError::Timeout { .. } => "SAGA_TIMEOUT",
            SagaError::Lock(_) => "SAGA_LOCK_ERROR",
            SagaError::Recovery(_) => "SAGA_RECOVERY_ERROR",
            SagaError::Storage(_) => "SAGA_STORAGE_ERROR",
        }
    }
}

/// Lock acquisition failure. Names the current holder and its expiry so
/// callers can decide whether to retry.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("resource '{resource_key}' is locked by saga {holder} until {expires_at}")]
    Held {
        resource_key: String,
        holder: Uuid,
        expires_at: DateTime<Utc>,
    },

    #[error("lock store error: {0}")]
    Storage(#[source] anyhow::Error),
}
