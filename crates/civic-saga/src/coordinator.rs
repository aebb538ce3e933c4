//! Saga Coordinator
//!
//! Forward execution with per-step timeouts, reverse-order compensation,
//! persisted state transitions, resource locking, idempotent replay, and
//! metrics. Single-threaded per saga instance; instances run in parallel.
//!
//! Lock and context errors short-circuit before any state is written and
//! surface as `Err`. Once an instance is persisted, the call returns
//! `Ok(SagaResult)` whose status is `completed` or `failed`; compensation
//! outcome is attached to failed results.

use crate::error::SagaError;
use crate::idempotency::IdempotencyManager;
use crate::locks::LockManager;
use crate::metrics::SagaMetrics;
use crate::state::{CompensationStatus, SagaInstance, SagaStatus};
use crate::step::{SagaContext, SagaDefinition};
use crate::store::SagaStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Step names containing any of these substrings are critical: their
/// effects (or the loss of them) cannot be undone by compensation alone.
const CRITICAL_STEP_MARKERS: &[&str] = &["git", "commit", "publish", "move", "delete"];

pub(crate) fn is_critical_step(name: &str) -> bool {
    let lower = name.to_lowercase();
    CRITICAL_STEP_MARKERS.iter().any(|m| lower.contains(m))
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Applied to steps that declare no timeout of their own.
    pub default_step_timeout: Duration,
    /// Bound on the whole execution.
    pub saga_timeout: Duration,
    /// Lifetime of the resource lock taken for the saga.
    pub lock_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_step_timeout: Duration::from_secs(60),
            saga_timeout: Duration::from_secs(300),
            lock_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Caller-supplied idempotency key; derived when absent.
    pub idempotency_key: Option<String>,
    /// Override of the coordinator-wide saga timeout.
    pub saga_timeout: Option<Duration>,
}

/// Structured outcome of a saga submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaResult {
    pub saga_id: Uuid,
    pub correlation_id: String,
    pub status: SagaStatus,
    pub last_step_result: Option<serde_json::Value>,
    pub compensation: Option<CompensationStatus>,
    pub error: Option<String>,
    /// True when this result was replayed from a prior completed run.
    pub replayed: bool,
}

impl SagaResult {
    pub fn is_success(&self) -> bool {
        self.status == SagaStatus::Completed
    }
}

/// Where the forward pass stopped and why.
struct ForwardFailure {
    failed_step: usize,
    failed_step_name: String,
    error: SagaError,
}

pub struct SagaCoordinator {
    store: Arc<dyn SagaStore>,
    locks: LockManager,
    idempotency: IdempotencyManager,
    metrics: Arc<SagaMetrics>,
    config: CoordinatorConfig,
}

impl SagaCoordinator {
    pub fn new(
        store: Arc<dyn SagaStore>,
        locks: LockManager,
        config: CoordinatorConfig,
    ) -> Self {
        let idempotency = IdempotencyManager::new(store.clone());
        Self {
            store,
            locks,
            idempotency,
            metrics: Arc::new(SagaMetrics::new()),
            config,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<SagaMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &SagaMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn SagaStore> {
        &self.store
    }

    /// Run a saga to a terminal state.
    #[tracing::instrument(
        skip_all,
        fields(saga_type = %saga.saga_type, correlation_id = %ctx.correlation_id())
    )]
    pub async fn execute<C: SagaContext>(
        &self,
        saga: &SagaDefinition<C>,
        mut ctx: C,
        opts: ExecuteOptions,
    ) -> Result<SagaResult, SagaError> {
        let saga_id = Uuid::new_v4();
        let started_at = Utc::now();

        let idempotency_key = opts.idempotency_key.clone().unwrap_or_else(|| {
            IdempotencyManager::derive_key(
                &saga.saga_type,
                ctx.user(),
                started_at,
                &ctx.idempotency_parts(),
            )
        });

        if let Some(cached) = self.idempotency.find_cached(&idempotency_key).await? {
            return Ok(cached);
        }

        ctx.validate().map_err(SagaError::Context)?;
        if let Some(validator) = &saga.validator {
            validator(&ctx).map_err(SagaError::Context)?;
        }

        // Lock before any state is written; conflicts surface directly.
        let resource_key = ctx.resource_key();
        if let Some(key) = &resource_key {
            self.locks
                .acquire_lock(key, saga_id, Some(self.config.lock_timeout))
                .await?;
        }

        let run = self
            .run_locked(saga, &mut ctx, saga_id, idempotency_key, opts)
            .await;

        // Release unconditionally, whatever the run produced.
        if let Some(key) = &resource_key {
            if let Err(err) = self.locks.release_lock(key, Some(saga_id)).await {
                tracing::warn!(saga_id = %saga_id, resource = %key, error = %err,
                    "failed to release resource lock");
            }
        }

        run
    }

    async fn run_locked<C: SagaContext>(
        &self,
        saga: &SagaDefinition<C>,
        ctx: &mut C,
        saga_id: Uuid,
        idempotency_key: String,
        opts: ExecuteOptions,
    ) -> Result<SagaResult, SagaError> {
        let context_json = serde_json::to_value(&*ctx)
            .map_err(|e| SagaError::Context(format!("context not serializable: {e}")))?;

        let instance = SagaInstance::new(
            saga_id,
            &saga.saga_type,
            saga.version,
            context_json,
            ctx.correlation_id(),
            Some(idempotency_key),
        );
        self.store
            .save_state(&instance)
            .await
            .map_err(SagaError::Storage)?;
        self.store
            .update_status(saga_id, SagaStatus::Executing, Some(0), None)
            .await
            .map_err(SagaError::Storage)?;

        let saga_timeout = opts.saga_timeout.unwrap_or(self.config.saga_timeout);
        let clock = Instant::now();
        let mut results: Vec<serde_json::Value> = Vec::with_capacity(saga.steps.len());

        let failure = self
            .run_forward(saga, ctx, saga_id, saga_timeout, clock, &mut results)
            .await?;

        let duration = clock.elapsed();
        match failure {
            None => {
                self.store
                    .update_status(saga_id, SagaStatus::Completed, None, None)
                    .await
                    .map_err(SagaError::Storage)?;
                self.metrics
                    .record_execution(&saga.saga_type, duration, true);
                tracing::info!(saga_id = %saga_id, steps = results.len(),
                    "saga completed");
                Ok(SagaResult {
                    saga_id,
                    correlation_id: ctx.correlation_id().to_string(),
                    status: SagaStatus::Completed,
                    last_step_result: results.last().cloned(),
                    compensation: None,
                    error: None,
                    replayed: false,
                })
            }
            Some(failure) => {
                self.metrics
                    .record_execution(&saga.saga_type, duration, false);
                let compensation = self
                    .compensate(saga, ctx, saga_id, &failure, &results)
                    .await?;
                self.metrics.record_compensation(
                    &saga.saga_type,
                    compensation == CompensationStatus::Failed,
                );
                Ok(SagaResult {
                    saga_id,
                    correlation_id: ctx.correlation_id().to_string(),
                    status: SagaStatus::Failed,
                    last_step_result: None,
                    compensation: Some(compensation),
                    error: Some(failure.error.to_string()),
                    replayed: false,
                })
            }
        }
    }

    /// Execute steps in order. Returns None on full success, or the
    /// failure descriptor for the step that stopped the pass.
    async fn run_forward<C: SagaContext>(
        &self,
        saga: &SagaDefinition<C>,
        ctx: &mut C,
        saga_id: Uuid,
        saga_timeout: Duration,
        clock: Instant,
        results: &mut Vec<serde_json::Value>,
    ) -> Result<Option<ForwardFailure>, SagaError> {
        for (i, step) in saga.steps.iter().enumerate() {
            self.store
                .update_status(saga_id, SagaStatus::Executing, Some(i as u32), None)
                .await
                .map_err(SagaError::Storage)?;

            let remaining = saga_timeout.saturating_sub(clock.elapsed());
            if remaining.is_zero() {
                return Ok(Some(ForwardFailure {
                    failed_step: i,
                    failed_step_name: step.name().to_string(),
                    error: SagaError::Timeout {
                        scope: "saga",
                        name: saga.saga_type.clone(),
                        timeout_secs: saga_timeout.as_secs(),
                    },
                }));
            }
            let step_timeout = step
                .timeout()
                .unwrap_or(self.config.default_step_timeout)
                .min(remaining);

            tracing::debug!(saga_id = %saga_id, step = step.name(), index = i,
                "executing saga step");
            let raced = tokio::time::timeout(step_timeout, step.execute(ctx)).await;
            match raced {
                Ok(Ok(value)) => {
                    results.push(value);
                    self.store
                        .update_step_results(saga_id, results)
                        .await
                        .map_err(SagaError::Storage)?;
                }
                Ok(Err(cause)) => {
                    tracing::warn!(saga_id = %saga_id, step = step.name(),
                        error = %cause, "saga step failed");
                    return Ok(Some(ForwardFailure {
                        failed_step: i,
                        failed_step_name: step.name().to_string(),
                        error: SagaError::Step {
                            step: step.name().to_string(),
                            source: cause,
                        },
                    }));
                }
                Err(_elapsed) => {
                    tracing::warn!(saga_id = %saga_id, step = step.name(),
                        timeout_secs = step_timeout.as_secs(), "saga step timed out");
                    return Ok(Some(ForwardFailure {
                        failed_step: i,
                        failed_step_name: step.name().to_string(),
                        error: SagaError::Timeout {
                            scope: "step",
                            name: step.name().to_string(),
                            timeout_secs: step_timeout.as_secs(),
                        },
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Reverse-order compensation of every compensatable step that
    /// succeeded before the failure. Individual compensation failures are
    /// recorded and do not stop the pass.
    async fn compensate<C: SagaContext>(
        &self,
        saga: &SagaDefinition<C>,
        ctx: &mut C,
        saga_id: Uuid,
        failure: &ForwardFailure,
        results: &[serde_json::Value],
    ) -> Result<CompensationStatus, SagaError> {
        let error_text = failure.error.to_string();
        self.store
            .update_status(
                saga_id,
                SagaStatus::Failed,
                Some(failure.failed_step as u32),
                Some(&error_text),
            )
            .await
            .map_err(SagaError::Storage)?;
        self.store
            .update_status(saga_id, SagaStatus::Compensating, None, None)
            .await
            .map_err(SagaError::Storage)?;
        self.store
            .update_compensation_status(saga_id, CompensationStatus::Executing, None)
            .await
            .map_err(SagaError::Storage)?;

        let mut failures: Vec<(String, bool, String)> = Vec::new();
        for j in (0..failure.failed_step.min(results.len())).rev() {
            let step = &saga.steps[j];
            if !step.is_compensatable() {
                continue;
            }
            tracing::info!(saga_id = %saga_id, step = step.name(),
                "compensating saga step");
            if let Err(cause) = step.compensate(ctx, &results[j]).await {
                tracing::error!(saga_id = %saga_id, step = step.name(),
                    error = %cause, "compensation failed");
                failures.push((
                    step.name().to_string(),
                    is_critical_step(step.name()),
                    cause.to_string(),
                ));
            }
        }

        // Residue that compensation cannot reach: the failed step itself is
        // critical, or an earlier non-compensatable critical step (a commit)
        // already landed.
        let residue = is_critical_step(&failure.failed_step_name)
            || saga.steps[..failure.failed_step]
                .iter()
                .enumerate()
                .any(|(j, s)| {
                    j < results.len()
                        && !s.is_compensatable()
                        && is_critical_step(s.name())
                });

        let status = if failures.iter().any(|(_, critical, _)| *critical) {
            CompensationStatus::Failed
        } else if !failures.is_empty() || residue {
            CompensationStatus::Partial
        } else {
            CompensationStatus::Completed
        };

        let comp_error = if failures.is_empty() {
            None
        } else {
            Some(
                failures
                    .iter()
                    .map(|(name, _, err)| format!("{name}: {err}"))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };
        self.store
            .update_compensation_status(saga_id, status, comp_error.as_deref())
            .await
            .map_err(SagaError::Storage)?;
        self.store
            .update_status(saga_id, SagaStatus::Failed, None, Some(&error_text))
            .await
            .map_err(SagaError::Storage)?;

        tracing::info!(saga_id = %saga_id, compensation = %status,
            "saga compensation finished");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::MemoryLockStore;
    use crate::step::SagaStep;
    use crate::store_memory::MemorySagaStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ctx {
        correlation_id: String,
        record_id: Option<String>,
    }

    impl SagaContext for Ctx {
        fn correlation_id(&self) -> &str {
            &self.correlation_id
        }

        fn resource_key(&self) -> Option<String> {
            self.record_id.as_ref().map(|id| format!("record:{id}"))
        }
    }

    fn ctx(record: Option<&str>) -> Ctx {
        Ctx {
            correlation_id: "corr-1".to_string(),
            record_id: record.map(str::to_string),
        }
    }

    /// Records execute/compensate invocations into a shared journal.
    struct Probe {
        name: &'static str,
        compensatable: bool,
        fail: bool,
        journal: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl SagaStep<Ctx> for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn is_compensatable(&self) -> bool {
            self.compensatable
        }

        async fn execute(&self, _ctx: &mut Ctx) -> anyhow::Result<serde_json::Value> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("exec:{}", self.name));
            if self.fail {
                anyhow::bail!("{} exploded", self.name);
            }
            Ok(serde_json::json!({ "step": self.name }))
        }

        async fn compensate(
            &self,
            _ctx: &mut Ctx,
            _result: &serde_json::Value,
        ) -> anyhow::Result<()> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("comp:{}", self.name));
            Ok(())
        }
    }

    fn coordinator(store: Arc<MemorySagaStore>) -> SagaCoordinator {
        SagaCoordinator::new(
            store,
            LockManager::new(Arc::new(MemoryLockStore::new())),
            CoordinatorConfig::default(),
        )
    }

    fn probe_saga(
        journal: &Arc<StdMutex<Vec<String>>>,
        specs: &[(&'static str, bool, bool)],
    ) -> SagaDefinition<Ctx> {
        let mut saga = SagaDefinition::new("TestSaga", 1);
        for (name, compensatable, fail) in specs {
            saga = saga.step(Probe {
                name,
                compensatable: *compensatable,
                fail: *fail,
                journal: journal.clone(),
            });
        }
        saga
    }

    #[tokio::test]
    async fn test_happy_path_persists_results_in_order() {
        let store = Arc::new(MemorySagaStore::new());
        let coord = coordinator(store.clone());
        let journal = Arc::new(StdMutex::new(Vec::new()));
        let saga = probe_saga(
            &journal,
            &[("one", true, false), ("two", true, false), ("three", false, false)],
        );

        let result = coord
            .execute(&saga, ctx(Some("rec-1")), ExecuteOptions::default())
            .await
            .unwrap();
        assert!(result.is_success());

        let inst = store.get_state(result.saga_id).await.unwrap().unwrap();
        assert_eq!(inst.status, SagaStatus::Completed);
        assert_eq!(inst.step_results.len(), 3);
        assert_eq!(inst.step_results[0], serde_json::json!({"step": "one"}));
        assert_eq!(inst.step_results[2], serde_json::json!({"step": "three"}));
        assert!(inst.completed_at.is_some());
        assert!(inst.compensation_status.is_none());
    }

    #[tokio::test]
    async fn test_failure_compensates_in_reverse_order() {
        let store = Arc::new(MemorySagaStore::new());
        let coord = coordinator(store.clone());
        let journal = Arc::new(StdMutex::new(Vec::new()));
        let saga = probe_saga(
            &journal,
            &[
                ("alpha", true, false),
                ("beta", true, false),
                ("gamma", true, true),
            ],
        );

        let result = coord
            .execute(&saga, ctx(None), ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, SagaStatus::Failed);
        assert_eq!(result.compensation, Some(CompensationStatus::Completed));
        let error = result.error.unwrap();
        assert!(error.contains("SAGA_STEP_ERROR"));
        assert!(error.contains("gamma"));

        let entries = journal.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec!["exec:alpha", "exec:beta", "exec:gamma", "comp:beta", "comp:alpha"]
        );
    }

    #[tokio::test]
    async fn test_non_compensatable_steps_are_skipped_in_rollback() {
        let store = Arc::new(MemorySagaStore::new());
        let coord = coordinator(store.clone());
        let journal = Arc::new(StdMutex::new(Vec::new()));
        let saga = probe_saga(
            &journal,
            &[
                ("insert", true, false),
                ("notify", false, false),
                ("boom", true, true),
            ],
        );

        let result = coord
            .execute(&saga, ctx(None), ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, SagaStatus::Failed);

        let entries = journal.lock().unwrap().clone();
        assert!(!entries.contains(&"comp:notify".to_string()));
        assert!(entries.contains(&"comp:insert".to_string()));
    }

    #[tokio::test]
    async fn test_critical_failed_step_marks_compensation_partial() {
        let store = Arc::new(MemorySagaStore::new());
        let coord = coordinator(store.clone());
        let journal = Arc::new(StdMutex::new(Vec::new()));
        let saga = probe_saga(
            &journal,
            &[("insert", true, false), ("commit_to_git", false, true)],
        );

        let result = coord
            .execute(&saga, ctx(None), ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, SagaStatus::Failed);
        assert_eq!(result.compensation, Some(CompensationStatus::Partial));
    }

    #[tokio::test]
    async fn test_status_history_follows_machine() {
        let store = Arc::new(MemorySagaStore::new());
        let coord = coordinator(store.clone());
        let journal = Arc::new(StdMutex::new(Vec::new()));
        let saga = probe_saga(&journal, &[("first", true, false), ("second", true, true)]);

        let result = coord
            .execute(&saga, ctx(None), ExecuteOptions::default())
            .await
            .unwrap();

        let mut history = store.status_history(result.saga_id).await;
        history.dedup();
        assert_eq!(
            history,
            vec![
                SagaStatus::Pending,
                SagaStatus::Executing,
                SagaStatus::Failed,
                SagaStatus::Compensating,
                SagaStatus::Failed,
            ]
        );
        for pair in history.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]) || pair[0] == pair[1],
                "illegal transition {:?} -> {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    struct Sleeper;

    #[async_trait]
    impl SagaStep<Ctx> for Sleeper {
        fn name(&self) -> &str {
            "slow_step"
        }

        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(20))
        }

        async fn execute(&self, _ctx: &mut Ctx) -> anyhow::Result<serde_json::Value> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(serde_json::json!({}))
        }
    }

    #[tokio::test]
    async fn test_step_timeout_triggers_compensation() {
        let store = Arc::new(MemorySagaStore::new());
        let coord = coordinator(store.clone());
        let journal = Arc::new(StdMutex::new(Vec::new()));

        let saga = SagaDefinition::new("TestSaga", 1)
            .step(Probe {
                name: "setup",
                compensatable: true,
                fail: false,
                journal: journal.clone(),
            })
            .step(Sleeper);

        let result = coord
            .execute(&saga, ctx(None), ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, SagaStatus::Failed);
        assert!(result.error.unwrap().contains("SAGA_TIMEOUT"));
        assert_eq!(result.compensation, Some(CompensationStatus::Completed));
        assert!(journal
            .lock()
            .unwrap()
            .contains(&"comp:setup".to_string()));
    }

    #[tokio::test]
    async fn test_lock_conflict_fails_fast() {
        let store = Arc::new(MemorySagaStore::new());
        let coord = Arc::new(coordinator(store.clone()));
        let journal = Arc::new(StdMutex::new(Vec::new()));

        // Holds the lock while the second saga arrives.
        struct Holder {
            release: Arc<tokio::sync::Notify>,
        }

        #[async_trait]
        impl SagaStep<Ctx> for Holder {
            fn name(&self) -> &str {
                "hold"
            }

            async fn execute(&self, _ctx: &mut Ctx) -> anyhow::Result<serde_json::Value> {
                self.release.notified().await;
                Ok(serde_json::json!({}))
            }
        }

        let release = Arc::new(tokio::sync::Notify::new());
        let slow = SagaDefinition::new("TestSaga", 1).step(Holder {
            release: release.clone(),
        });

        let coord2 = coord.clone();
        let first = tokio::spawn(async move {
            coord2
                .execute(&slow, ctx(Some("rec-9")), ExecuteOptions::default())
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let fast = probe_saga(&journal, &[("noop", true, false)]);
        let second = coord
            .execute(&fast, ctx(Some("rec-9")), ExecuteOptions::default())
            .await;
        match second {
            Err(SagaError::Lock(_)) => {}
            other => panic!("expected lock error, got {other:?}"),
        }

        release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(first.is_success());

        // Lock was released; the same resource is usable again.
        let third = coord
            .execute(&fast, ctx(Some("rec-9")), ExecuteOptions::default())
            .await
            .unwrap();
        assert!(third.is_success());
    }

    #[tokio::test]
    async fn test_idempotency_key_replays_completed_result() {
        let store = Arc::new(MemorySagaStore::new());
        let coord = coordinator(store.clone());
        let journal = Arc::new(StdMutex::new(Vec::new()));
        let saga = probe_saga(&journal, &[("only", true, false)]);

        let opts = ExecuteOptions {
            idempotency_key: Some("same-key".to_string()),
            ..Default::default()
        };
        let first = coord
            .execute(&saga, ctx(None), opts.clone())
            .await
            .unwrap();
        let second = coord.execute(&saga, ctx(None), opts).await.unwrap();

        assert_eq!(first.saga_id, second.saga_id);
        assert!(second.replayed);
        assert_eq!(first.last_step_result, second.last_step_result);
        // The step body ran exactly once.
        assert_eq!(
            journal
                .lock()
                .unwrap()
                .iter()
                .filter(|e| *e == "exec:only")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_context_validation_short_circuits() {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Invalid {
            correlation_id: String,
        }
        impl SagaContext for Invalid {
            fn correlation_id(&self) -> &str {
                &self.correlation_id
            }
            fn resource_key(&self) -> Option<String> {
                None
            }
            fn validate(&self) -> Result<(), String> {
                Err("title is required".to_string())
            }
        }

        struct Never(Arc<AtomicUsize>);
        #[async_trait]
        impl SagaStep<Invalid> for Never {
            fn name(&self) -> &str {
                "never"
            }
            async fn execute(
                &self,
                _ctx: &mut Invalid,
            ) -> anyhow::Result<serde_json::Value> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!({}))
            }
        }

        let store = Arc::new(MemorySagaStore::new());
        let coord = coordinator(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let saga = SagaDefinition::new("TestSaga", 1).step(Never(calls.clone()));

        let err = coord
            .execute(
                &saga,
                Invalid {
                    correlation_id: "corr-1".to_string(),
                },
                ExecuteOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SAGA_CONTEXT_ERROR");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_critical_step_markers() {
        assert!(is_critical_step("CommitToGit"));
        assert!(is_critical_step("MoveFileToArchive"));
        assert!(is_critical_step("DeleteDraft"));
        assert!(is_critical_step("publish_record"));
        assert!(!is_critical_step("CreateFile"));
        assert!(!is_critical_step("QueueIndexing"));
    }
}
