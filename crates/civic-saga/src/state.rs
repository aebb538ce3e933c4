//! Saga Instance State
//!
//! The persisted shape of one saga execution and its status machine.
//! Statuses move monotonically; terminal statuses are never left.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Status of a saga execution.
///
/// ```text
/// pending → executing → completed
///                    ↘ failed → compensating → compensated
///                                            ↘ failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Compensating,
    Compensated,
}

impl SagaStatus {
    /// Whether the status machine permits moving to `next`.
    pub fn can_transition_to(&self, next: SagaStatus) -> bool {
        use SagaStatus::*;
        matches!(
            (self, next),
            (Pending, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Failed, Compensating)
                | (Compensating, Compensated)
                | (Compensating, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Compensated | SagaStatus::Failed
        )
    }
}

impl fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SagaStatus::Pending => "pending",
            SagaStatus::Executing => "executing",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
            SagaStatus::Compensating => "compensating",
            SagaStatus::Compensated => "compensated",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for SagaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SagaStatus::Pending),
            "executing" => Ok(SagaStatus::Executing),
            "completed" => Ok(SagaStatus::Completed),
            "failed" => Ok(SagaStatus::Failed),
            "compensating" => Ok(SagaStatus::Compensating),
            "compensated" => Ok(SagaStatus::Compensated),
            other => Err(format!("unknown saga status: {other}")),
        }
    }
}

/// Outcome of the compensation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStatus {
    Pending,
    Executing,
    /// Every attempted compensation succeeded and no critical residue
    /// remains.
    Completed,
    /// A compensation failed on a critical step.
    Failed,
    /// Some effects were rolled back; others remain (typically a commit).
    Partial,
}

impl fmt::Display for CompensationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompensationStatus::Pending => "pending",
            CompensationStatus::Executing => "executing",
            CompensationStatus::Completed => "completed",
            CompensationStatus::Failed => "failed",
            CompensationStatus::Partial => "partial",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for CompensationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CompensationStatus::Pending),
            "executing" => Ok(CompensationStatus::Executing),
            "completed" => Ok(CompensationStatus::Completed),
            "failed" => Ok(CompensationStatus::Failed),
            "partial" => Ok(CompensationStatus::Partial),
            other => Err(format!("unknown compensation status: {other}")),
        }
    }
}

/// A persisted execution of a saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaInstance {
    /// Globally unique saga id.
    pub id: Uuid,
    /// Saga type (e.g. "CreateRecord").
    pub saga_type: String,
    /// Version of the saga definition that ran.
    pub saga_version: u32,
    /// Serialized caller context.
    pub context: serde_json::Value,
    pub status: SagaStatus,
    /// Index of the step currently (or last) executing.
    pub current_step: u32,
    /// Execute results, indexable by step position.
    pub step_results: Vec<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure message, when the saga failed.
    pub error: Option<String>,
    pub compensation_status: Option<CompensationStatus>,
    pub compensation_completed_at: Option<DateTime<Utc>>,
    pub compensation_error: Option<String>,
    pub idempotency_key: Option<String>,
    /// Caller-supplied id propagated for tracing.
    pub correlation_id: String,
}

impl SagaInstance {
    pub fn new(
        id: Uuid,
        saga_type: impl Into<String>,
        saga_version: u32,
        context: serde_json::Value,
        correlation_id: impl Into<String>,
        idempotency_key: Option<String>,
    ) -> Self {
        Self {
            id,
            saga_type: saga_type.into(),
            saga_version,
            context,
            status: SagaStatus::Pending,
            current_step: 0,
            step_results: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            compensation_status: None,
            compensation_completed_at: None,
            compensation_error: None,
            idempotency_key,
            correlation_id: correlation_id.into(),
        }
    }

    /// The result of the last completed step, if any.
    pub fn last_step_result(&self) -> Option<&serde_json::Value> {
        self.step_results.last()
    }
}
