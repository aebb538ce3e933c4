//! Search Index Port
//!
//! Derived state: index generation and removal are queue-and-forget from
//! the saga's perspective. Failures here never fail a saga; the steps log
//! and move on.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Regenerate indexes for the given record types.
    async fn generate_indexes(&self, types: &[String], rebuild: bool) -> Result<()>;

    async fn remove_record(&self, id: &str, record_type: &str) -> Result<()>;
}

/// One observed index operation. Test hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOp {
    Generate { types: Vec<String>, rebuild: bool },
    Remove { id: String, record_type: String },
}

/// Recording in-memory index with a failure toggle, so tests can assert
/// both dispatch and error-swallowing.
pub struct RecordingSearchIndex {
    ops: Mutex<Vec<IndexOp>>,
    failing: AtomicBool,
}

impl RecordingSearchIndex {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn operations(&self) -> Vec<IndexOp> {
        self.ops.lock().await.clone()
    }
}

impl Default for RecordingSearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchIndex for RecordingSearchIndex {
    async fn generate_indexes(&self, types: &[String], rebuild: bool) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("search index unavailable");
        }
        self.ops.lock().await.push(IndexOp::Generate {
            types: types.to_vec(),
            rebuild,
        });
        Ok(())
    }

    async fn remove_record(&self, id: &str, record_type: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("search index unavailable");
        }
        self.ops.lock().await.push(IndexOp::Remove {
            id: id.to_string(),
            record_type: record_type.to_string(),
        });
        Ok(())
    }
}
