//! In-memory implementation of `SagaStore` for tests and the POC path.
//!
//! Also records the full status history per saga so tests can assert the
//! status machine was followed.

use crate::state::{CompensationStatus, SagaInstance, SagaStatus};
use crate::store::SagaStore;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

struct Inner {
    instances: HashMap<Uuid, SagaInstance>,
    /// Insertion-ordered saga ids, for `get_state_by_idempotency_key`
    /// recency.
    order: Vec<Uuid>,
    status_history: HashMap<Uuid, Vec<SagaStatus>>,
}

pub struct MemorySagaStore {
    inner: RwLock<Inner>,
}

impl MemorySagaStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                instances: HashMap::new(),
                order: Vec::new(),
                status_history: HashMap::new(),
            }),
        }
    }

    /// Every status the saga has held, in order. Test hook.
    pub async fn status_history(&self, id: Uuid) -> Vec<SagaStatus> {
        let r = self.inner.read().await;
        r.status_history.get(&id).cloned().unwrap_or_default()
    }
}

impl Default for MemorySagaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SagaStore for MemorySagaStore {
    async fn save_state(&self, state: &SagaInstance) -> Result<()> {
        let mut w = self.inner.write().await;
        if !w.instances.contains_key(&state.id) {
            w.order.push(state.id);
        }
        w.status_history
            .entry(state.id)
            .or_default()
            .push(state.status);
        w.instances.insert(state.id, state.clone());
        Ok(())
    }

    async fn get_state(&self, id: Uuid) -> Result<Option<SagaInstance>> {
        let r = self.inner.read().await;
        Ok(r.instances.get(&id).cloned())
    }

    async fn get_state_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<SagaInstance>> {
        let r = self.inner.read().await;
        Ok(r.order
            .iter()
            .rev()
            .filter_map(|id| r.instances.get(id))
            .find(|s| s.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: SagaStatus,
        current_step: Option<u32>,
        error: Option<&str>,
    ) -> Result<()> {
        let mut w = self.inner.write().await;
        let inst = w
            .instances
            .get_mut(&id)
            .ok_or_else(|| anyhow!("saga not found: {id}"))?;
        inst.status = status;
        if let Some(step) = current_step {
            inst.current_step = step;
        }
        if let Some(err) = error {
            inst.error = Some(err.to_string());
        }
        if status.is_terminal() {
            inst.completed_at = Some(Utc::now());
        }
        w.status_history.entry(id).or_default().push(status);
        Ok(())
    }

    async fn update_step_results(
        &self,
        id: Uuid,
        results: &[serde_json::Value],
    ) -> Result<()> {
        let mut w = self.inner.write().await;
        let inst = w
            .instances
            .get_mut(&id)
            .ok_or_else(|| anyhow!("saga not found: {id}"))?;
        inst.step_results = results.to_vec();
        Ok(())
    }

    async fn update_compensation_status(
        &self,
        id: Uuid,
        status: CompensationStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut w = self.inner.write().await;
        let inst = w
            .instances
            .get_mut(&id)
            .ok_or_else(|| anyhow!("saga not found: {id}"))?;
        inst.compensation_status = Some(status);
        if let Some(err) = error {
            inst.compensation_error = Some(err.to_string());
        }
        if matches!(
            status,
            CompensationStatus::Completed
                | CompensationStatus::Failed
                | CompensationStatus::Partial
        ) {
            inst.compensation_completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_stuck_sagas(&self, timeout: Duration) -> Result<Vec<SagaInstance>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout)
                .map_err(|e| anyhow!("timeout out of range: {e}"))?;
        let r = self.inner.read().await;
        Ok(r.instances
            .values()
            .filter(|s| s.status == SagaStatus::Executing && s.started_at < cutoff)
            .cloned()
            .collect())
    }

    async fn get_failed_sagas(&self) -> Result<Vec<SagaInstance>> {
        let r = self.inner.read().await;
        Ok(r.instances
            .values()
            .filter(|s| {
                s.status == SagaStatus::Failed
                    && !matches!(
                        s.compensation_status,
                        Some(CompensationStatus::Completed)
                    )
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_instance(key: Option<&str>) -> SagaInstance {
        SagaInstance::new(
            Uuid::new_v4(),
            "CreateRecord",
            1,
            serde_json::json!({"recordId": "rec-1"}),
            "corr-1",
            key.map(str::to_string),
        )
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let store = MemorySagaStore::new();
        let inst = make_instance(None);
        store.save_state(&inst).await.unwrap();

        let loaded = store.get_state(inst.id).await.unwrap().unwrap();
        assert_eq!(loaded.saga_type, "CreateRecord");
        assert_eq!(loaded.correlation_id, "corr-1");
        assert_eq!(loaded.status, SagaStatus::Pending);
    }

    #[tokio::test]
    async fn test_idempotency_key_lookup_returns_most_recent() {
        let store = MemorySagaStore::new();
        let first = make_instance(Some("idem-1"));
        let second = make_instance(Some("idem-1"));
        store.save_state(&first).await.unwrap();
        store.save_state(&second).await.unwrap();

        let found = store
            .get_state_by_idempotency_key("idem-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, second.id);
        assert!(store
            .get_state_by_idempotency_key("missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_status_stamps_completion() {
        let store = MemorySagaStore::new();
        let inst = make_instance(None);
        store.save_state(&inst).await.unwrap();

        store
            .update_status(inst.id, SagaStatus::Executing, Some(0), None)
            .await
            .unwrap();
        store
            .update_status(inst.id, SagaStatus::Completed, None, None)
            .await
            .unwrap();

        let loaded = store.get_state(inst.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SagaStatus::Completed);
        assert!(loaded.completed_at.is_some());

        let history = store.status_history(inst.id).await;
        assert_eq!(
            history,
            vec![
                SagaStatus::Pending,
                SagaStatus::Executing,
                SagaStatus::Completed
            ]
        );
    }

    #[tokio::test]
    async fn test_stuck_and_failed_queries() {
        let store = MemorySagaStore::new();

        let mut stuck = make_instance(None);
        stuck.status = SagaStatus::Executing;
        stuck.started_at = Utc::now() - chrono::Duration::minutes(30);
        store.save_state(&stuck).await.unwrap();

        let mut fresh = make_instance(None);
        fresh.status = SagaStatus::Executing;
        store.save_state(&fresh).await.unwrap();

        let mut failed = make_instance(None);
        failed.status = SagaStatus::Failed;
        failed.compensation_status = Some(CompensationStatus::Partial);
        store.save_state(&failed).await.unwrap();

        let mut recovered = make_instance(None);
        recovered.status = SagaStatus::Failed;
        recovered.compensation_status = Some(CompensationStatus::Completed);
        store.save_state(&recovered).await.unwrap();

        let stuck_found = store
            .get_stuck_sagas(Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(stuck_found.len(), 1);
        assert_eq!(stuck_found[0].id, stuck.id);

        let failed_found = store.get_failed_sagas().await.unwrap();
        assert_eq!(failed_found.len(), 1);
        assert_eq!(failed_found[0].id, failed.id);
    }
}
