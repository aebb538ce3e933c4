//! Idempotent Retry Support
//!
//! A completed saga with an idempotency key replays its result on
//! re-submission within the TTL instead of running again. Executing or
//! failed prior runs never short-circuit: a failed attempt may be retried
//! with the same key.
//!
//! Callers that supply no key get one derived deterministically from the
//! saga type, acting user, submission time, and selected context fields.

use crate::coordinator::SagaResult;
use crate::error::SagaError;
use crate::state::SagaStatus;
use crate::store::SagaStore;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct IdempotencyManager {
    store: Arc<dyn SagaStore>,
    ttl: Duration,
}

impl IdempotencyManager {
    /// Cached results are replayed for 24 hours.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new(store: Arc<dyn SagaStore>) -> Self {
        Self {
            store,
            ttl: Self::DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Derive a deterministic key from the logical request identity.
    pub fn derive_key(
        saga_type: &str,
        user: Option<&str>,
        started_at: DateTime<Utc>,
        parts: &[String],
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(saga_type.as_bytes());
        hasher.update(b"|");
        hasher.update(user.unwrap_or("unknown").as_bytes());
        hasher.update(b"|");
        hasher.update(started_at.format("%Y-%m-%dT%H:%M:%S").to_string().as_bytes());
        for part in parts {
            hasher.update(b"|");
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// The replayed result for `key`, when a completed saga holds it
    /// within the TTL.
    pub async fn find_cached(&self, key: &str) -> Result<Option<SagaResult>, SagaError> {
        let existing = self
            .store
            .get_state_by_idempotency_key(key)
            .await
            .map_err(SagaError::Storage)?;

        let Some(instance) = existing else {
            return Ok(None);
        };
        if instance.status != SagaStatus::Completed {
            return Ok(None);
        }
        let age = Utc::now() - instance.started_at;
        if age.to_std().unwrap_or_default() > self.ttl {
            return Ok(None);
        }

        tracing::info!(
            saga_id = %instance.id,
            saga_type = %instance.saga_type,
            "replaying cached saga result for idempotency key"
        );
        Ok(Some(SagaResult {
            saga_id: instance.id,
            correlation_id: instance.correlation_id.clone(),
            status: instance.status,
            last_step_result: instance.last_step_result().cloned(),
            compensation: instance.compensation_status,
            error: None,
            replayed: true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SagaInstance;
    use crate::store_memory::MemorySagaStore;
    use uuid::Uuid;

    fn completed_instance(key: &str, started_at: DateTime<Utc>) -> SagaInstance {
        let mut inst = SagaInstance::new(
            Uuid::new_v4(),
            "CreateRecord",
            1,
            serde_json::json!({}),
            "corr-1",
            Some(key.to_string()),
        );
        inst.status = SagaStatus::Completed;
        inst.started_at = started_at;
        inst.step_results = vec![serde_json::json!({"recordId": "rec-1"})];
        inst
    }

    #[test]
    fn test_derived_keys_are_deterministic() {
        let at = Utc::now();
        let parts = vec!["rec-1".to_string()];
        let a = IdempotencyManager::derive_key("CreateRecord", Some("clerk"), at, &parts);
        let b = IdempotencyManager::derive_key("CreateRecord", Some("clerk"), at, &parts);
        assert_eq!(a, b);

        let c = IdempotencyManager::derive_key("UpdateRecord", Some("clerk"), at, &parts);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_completed_saga_replays_within_ttl() {
        let store = Arc::new(MemorySagaStore::new());
        let inst = completed_instance("idem-1", Utc::now());
        store.save_state(&inst).await.unwrap();

        let mgr = IdempotencyManager::new(store);
        let cached = mgr.find_cached("idem-1").await.unwrap().unwrap();
        assert!(cached.replayed);
        assert_eq!(cached.saga_id, inst.id);
        assert_eq!(
            cached.last_step_result,
            Some(serde_json::json!({"recordId": "rec-1"}))
        );
    }

    #[tokio::test]
    async fn test_expired_or_unfinished_runs_do_not_replay() {
        let store = Arc::new(MemorySagaStore::new());

        let old = completed_instance("idem-old", Utc::now() - chrono::Duration::hours(48));
        store.save_state(&old).await.unwrap();

        let mut executing = completed_instance("idem-live", Utc::now());
        executing.status = SagaStatus::Executing;
        store.save_state(&executing).await.unwrap();

        let mgr = IdempotencyManager::new(store);
        assert!(mgr.find_cached("idem-old").await.unwrap().is_none());
        assert!(mgr.find_cached("idem-live").await.unwrap().is_none());
        assert!(mgr.find_cached("idem-none").await.unwrap().is_none());
    }
}
