//! Subscriber Hook Port
//!
//! `emit(event, payload)` fans a lifecycle event out to subscribers.
//! Exceptions are swallowed by the saga steps; a broken subscriber never
//! fails a mutation.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[async_trait]
pub trait HookBus: Send + Sync {
    async fn emit(&self, event: &str, payload: serde_json::Value) -> Result<()>;
}

/// Recording in-memory bus with a failure toggle.
pub struct RecordingHookBus {
    events: Mutex<Vec<(String, serde_json::Value)>>,
    failing: AtomicBool,
}

impl RecordingHookBus {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn emitted(&self) -> Vec<(String, serde_json::Value)> {
        self.events.lock().await.clone()
    }

    /// How many times `event` was emitted. Test hook.
    pub async fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|(name, _)| name == event)
            .count()
    }
}

impl Default for RecordingHookBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HookBus for RecordingHookBus {
    async fn emit(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("subscriber bus unavailable");
        }
        self.events
            .lock()
            .await
            .push((event.to_string(), payload));
        Ok(())
    }
}
