//! Saga Recovery
//!
//! A periodic sweep over the state store for executions no longer under
//! any live coordinator. Stuck sagas (still `executing` past the timeout)
//! are failed with a reason encoding the timeout; failed sagas whose
//! compensation itself failed get a manual-intervention sentinel on their
//! error message. Recovery never runs compensation - it transitions
//! status so operators or higher-level schedulers act.

use crate::error::SagaError;
use crate::state::{CompensationStatus, SagaStatus};
use crate::store::SagaStore;
use std::sync::Arc;
use std::time::Duration;

/// Prefix recognized by operator tooling.
pub const MANUAL_INTERVENTION_SENTINEL: &str = "[MANUAL_INTERVENTION_REQUIRED]";

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySweep {
    /// Stuck executions transitioned to failed.
    pub stuck_failed: usize,
    /// Failed sagas newly flagged for manual intervention.
    pub flagged_for_intervention: usize,
}

#[derive(Clone)]
pub struct RecoveryManager {
    store: Arc<dyn SagaStore>,
    stuck_timeout: Duration,
}

impl RecoveryManager {
    /// An executing saga older than this is considered abandoned.
    pub const DEFAULT_STUCK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

    pub fn new(store: Arc<dyn SagaStore>) -> Self {
        Self {
            store,
            stuck_timeout: Self::DEFAULT_STUCK_TIMEOUT,
        }
    }

    pub fn with_stuck_timeout(mut self, timeout: Duration) -> Self {
        self.stuck_timeout = timeout;
        self
    }

    /// One pass over stuck and failed sagas.
    pub async fn run_sweep(&self) -> Result<RecoverySweep, SagaError> {
        let mut sweep = RecoverySweep::default();

        let stuck = self
            .store
            .get_stuck_sagas(self.stuck_timeout)
            .await
            .map_err(|e| SagaError::Recovery(format!("stuck-saga query failed: {e}")))?;
        for saga in stuck {
            let reason = format!(
                "saga exceeded the {}s execution timeout and was failed by recovery",
                self.stuck_timeout.as_secs()
            );
            tracing::warn!(saga_id = %saga.id, saga_type = %saga.saga_type,
                "marking stuck saga as failed");
            self.store
                .update_status(saga.id, SagaStatus::Failed, None, Some(&reason))
                .await
                .map_err(|e| {
                    SagaError::Recovery(format!("failed to mark stuck saga: {e}"))
                })?;
            sweep.stuck_failed += 1;
        }

        let failed = self
            .store
            .get_failed_sagas()
            .await
            .map_err(|e| SagaError::Recovery(format!("failed-saga query failed: {e}")))?;
        for saga in failed {
            if saga.compensation_status != Some(CompensationStatus::Failed) {
                continue;
            }
            let current = saga.error.unwrap_or_default();
            if current.contains(MANUAL_INTERVENTION_SENTINEL) {
                continue;
            }
            let annotated = format!("{MANUAL_INTERVENTION_SENTINEL} {current}");
            tracing::error!(saga_id = %saga.id, saga_type = %saga.saga_type,
                "saga compensation failed; manual intervention required");
            self.store
                .update_status(saga.id, SagaStatus::Failed, None, Some(&annotated))
                .await
                .map_err(|e| {
                    SagaError::Recovery(format!("failed to annotate saga: {e}"))
                })?;
            sweep.flagged_for_intervention += 1;
        }

        Ok(sweep)
    }

    /// Run the sweep on an interval until the handle is aborted. Sweep
    /// errors are logged and do not stop the loop.
    pub fn spawn(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_sweep().await {
                    Ok(sweep)
                        if sweep.stuck_failed > 0 || sweep.flagged_for_intervention > 0 =>
                    {
                        tracing::info!(
                            stuck_failed = sweep.stuck_failed,
                            flagged = sweep.flagged_for_intervention,
                            "recovery sweep applied transitions"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::error!(error = %err, "recovery sweep failed");
                    }
                }
            }
        })
    }
}
