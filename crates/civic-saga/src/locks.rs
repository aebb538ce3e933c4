//! Resource Lock Management
//!
//! Exclusive, time-bounded locks on a resource key (`record:<id>`,
//! `draft:<id>`), held by a saga id. Without locking, two sagas could
//! interleave row and file writes on the same record and leave the stores
//! disagreeing. Waiters do not queue: the second arrival fails fast with a
//! lock error naming the current holder, and the caller retries.
//!
//! Expired locks are reclaimable: acquisition that hits a conflict reads
//! the existing row, deletes it if its expiry has elapsed, and retries the
//! insert exactly once.

use crate::error::LockError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A held lock row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    pub resource_key: String,
    /// Holder saga id.
    pub saga_id: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub timeout_secs: u64,
    pub expires_at: DateTime<Utc>,
}

/// Row-level lock persistence. Insert atomicity comes from the backing
/// store's uniqueness constraint on `resource_key`.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Insert the lock; returns false when the key is already present.
    async fn try_insert(&self, lock: &ResourceLock) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<ResourceLock>>;

    /// Delete the lock; when `holder` is given, only a row held by that
    /// saga is removed. Returns whether a row was deleted.
    async fn delete(&self, key: &str, holder: Option<Uuid>) -> Result<bool>;

    /// Move the expiry of a lock held by `holder`. Returns whether a row
    /// matched.
    async fn update_expiry(
        &self,
        key: &str,
        holder: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Delete every lock whose expiry is before `now`; returns the count.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// In-memory `LockStore`.
pub struct MemoryLockStore {
    locks: Mutex<HashMap<String, ResourceLock>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_insert(&self, lock: &ResourceLock) -> Result<bool> {
        let mut w = self.locks.lock().await;
        if w.contains_key(&lock.resource_key) {
            return Ok(false);
        }
        w.insert(lock.resource_key.clone(), lock.clone());
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<ResourceLock>> {
        let r = self.locks.lock().await;
        Ok(r.get(key).cloned())
    }

    async fn delete(&self, key: &str, holder: Option<Uuid>) -> Result<bool> {
        let mut w = self.locks.lock().await;
        let Some(lock) = w.get(key) else {
            return Ok(false);
        };
        if let Some(h) = holder {
            if lock.saga_id != h {
                return Ok(false);
            }
        }
        w.remove(key);
        Ok(true)
    }

    async fn update_expiry(
        &self,
        key: &str,
        holder: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut w = self.locks.lock().await;
        match w.get_mut(key) {
            Some(lock) if lock.saga_id == holder => {
                lock.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut w = self.locks.lock().await;
        let before = w.len();
        w.retain(|_, lock| lock.expires_at >= now);
        Ok((before - w.len()) as u64)
    }
}

/// Acquire/release/extend semantics over a `LockStore`.
#[derive(Clone)]
pub struct LockManager {
    store: std::sync::Arc<dyn LockStore>,
    default_timeout: Duration,
}

impl LockManager {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(store: std::sync::Arc<dyn LockStore>) -> Self {
        Self {
            store,
            default_timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn make_lock(key: &str, holder: Uuid, timeout: Duration) -> ResourceLock {
        let now = Utc::now();
        ResourceLock {
            resource_key: key.to_string(),
            saga_id: holder,
            acquired_at: now,
            timeout_secs: timeout.as_secs(),
            expires_at: now + ChronoDuration::seconds(timeout.as_secs() as i64),
        }
    }

    /// Acquire an exclusive lock. On conflict with an expired holder, the
    /// stale row is deleted and the insert retried once; on conflict with a
    /// live holder, fails with `LockError::Held`.
    pub async fn acquire_lock(
        &self,
        key: &str,
        holder: Uuid,
        timeout: Option<Duration>,
    ) -> Result<ResourceLock, LockError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let lock = Self::make_lock(key, holder, timeout);

        if self
            .store
            .try_insert(&lock)
            .await
            .map_err(LockError::Storage)?
        {
            tracing::debug!(resource = key, saga_id = %holder, "acquired resource lock");
            return Ok(lock);
        }

        // Conflict: inspect the current holder.
        let existing = self.store.get(key).await.map_err(LockError::Storage)?;
        match existing {
            Some(current) if current.expires_at <= Utc::now() => {
                tracing::warn!(
                    resource = key,
                    stale_holder = %current.saga_id,
                    "reclaiming expired resource lock"
                );
                self.store
                    .delete(key, None)
                    .await
                    .map_err(LockError::Storage)?;
                let retry = Self::make_lock(key, holder, timeout);
                if self
                    .store
                    .try_insert(&retry)
                    .await
                    .map_err(LockError::Storage)?
                {
                    return Ok(retry);
                }
                // Lost the reclaim race; report whoever won.
                let winner = self.store.get(key).await.map_err(LockError::Storage)?;
                match winner {
                    Some(w) => Err(LockError::Held {
                        resource_key: key.to_string(),
                        holder: w.saga_id,
                        expires_at: w.expires_at,
                    }),
                    None => Err(LockError::Held {
                        resource_key: key.to_string(),
                        holder: current.saga_id,
                        expires_at: current.expires_at,
                    }),
                }
            }
            Some(current) => Err(LockError::Held {
                resource_key: key.to_string(),
                holder: current.saga_id,
                expires_at: current.expires_at,
            }),
            // Holder vanished between insert and read; one retry.
            None => {
                let retry = Self::make_lock(key, holder, timeout);
                if self
                    .store
                    .try_insert(&retry)
                    .await
                    .map_err(LockError::Storage)?
                {
                    Ok(retry)
                } else {
                    let winner =
                        self.store.get(key).await.map_err(LockError::Storage)?;
                    Err(match winner {
                        Some(w) => LockError::Held {
                            resource_key: key.to_string(),
                            holder: w.saga_id,
                            expires_at: w.expires_at,
                        },
                        None => LockError::Storage(anyhow::anyhow!(
                            "lock on '{key}' flapping during acquisition"
                        )),
                    })
                }
            }
        }
    }

    /// Release the lock. Scoped to `holder` when one is provided.
    pub async fn release_lock(
        &self,
        key: &str,
        holder: Option<Uuid>,
    ) -> Result<bool, LockError> {
        let released = self
            .store
            .delete(key, holder)
            .await
            .map_err(LockError::Storage)?;
        if released {
            tracing::debug!(resource = key, "released resource lock");
        }
        Ok(released)
    }

    pub async fn get_lock(&self, key: &str) -> Result<Option<ResourceLock>, LockError> {
        self.store.get(key).await.map_err(LockError::Storage)
    }

    /// Push the expiry of a held lock further out by `additional`.
    pub async fn extend_lock(
        &self,
        key: &str,
        holder: Uuid,
        additional: Duration,
    ) -> Result<bool, LockError> {
        let current = self.store.get(key).await.map_err(LockError::Storage)?;
        let Some(current) = current else {
            return Ok(false);
        };
        let expires_at =
            current.expires_at + ChronoDuration::seconds(additional.as_secs() as i64);
        self.store
            .update_expiry(key, holder, expires_at)
            .await
            .map_err(LockError::Storage)
    }

    /// Drop every expired lock; returns how many were removed.
    pub async fn cleanup_expired_locks(&self) -> Result<u64, LockError> {
        let removed = self
            .store
            .delete_expired(Utc::now())
            .await
            .map_err(LockError::Storage)?;
        if removed > 0 {
            tracing::info!(removed, "cleaned up expired resource locks");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn manager() -> LockManager {
        LockManager::new(Arc::new(MemoryLockStore::new()))
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let mgr = manager();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        mgr.acquire_lock("record:rec-1", first, None).await.unwrap();

        let err = mgr
            .acquire_lock("record:rec-1", second, None)
            .await
            .unwrap_err();
        match err {
            LockError::Held { holder, .. } => assert_eq!(holder, first),
            other => panic!("expected Held, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_release_scoped_to_holder() {
        let mgr = manager();
        let holder = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        mgr.acquire_lock("record:rec-1", holder, None).await.unwrap();

        assert!(!mgr
            .release_lock("record:rec-1", Some(stranger))
            .await
            .unwrap());
        assert!(mgr
            .release_lock("record:rec-1", Some(holder))
            .await
            .unwrap());
        assert!(mgr.get_lock("record:rec-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_lock_is_reclaimed() {
        let mgr = manager();
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();

        // A lock that expired the moment it was taken.
        mgr.acquire_lock("record:rec-1", stale, Some(Duration::from_secs(0)))
            .await
            .unwrap();

        let lock = mgr
            .acquire_lock("record:rec-1", fresh, None)
            .await
            .unwrap();
        assert_eq!(lock.saga_id, fresh);
    }

    #[tokio::test]
    async fn test_extend_and_cleanup() {
        let mgr = manager();
        let holder = Uuid::new_v4();

        let lock = mgr
            .acquire_lock("record:rec-1", holder, None)
            .await
            .unwrap();
        assert!(mgr
            .extend_lock("record:rec-1", holder, Duration::from_secs(60))
            .await
            .unwrap());
        let extended = mgr.get_lock("record:rec-1").await.unwrap().unwrap();
        assert!(extended.expires_at > lock.expires_at);

        // Nothing has expired yet.
        assert_eq!(mgr.cleanup_expired_locks().await.unwrap(), 0);

        mgr.acquire_lock("record:rec-2", holder, Some(Duration::from_secs(0)))
            .await
            .unwrap();
        assert_eq!(mgr.cleanup_expired_locks().await.unwrap(), 1);
    }
}
