//! Metadata Store
//!
//! Row-level CRUD for records and drafts plus listing and a
//! full-text-ish search. The saga steps operate exclusively through the
//! `MetadataStore` trait; the in-memory backend serves tests and the POC
//! path, Postgres serves production behind the `database` feature.

#[cfg(feature = "database")]
mod postgres;
#[cfg(feature = "database")]
pub use postgres::PgMetadataStore;

use crate::record::{Draft, Record, RecordError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a record row; fails when the id already exists.
    async fn insert_record(&self, record: &Record) -> Result<(), RecordError>;

    async fn get_record(&self, id: &str) -> Result<Option<Record>, RecordError>;

    /// Replace a record row; fails when the id does not exist.
    async fn update_record(&self, record: &Record) -> Result<(), RecordError>;

    /// Returns whether a row was removed.
    async fn delete_record(&self, id: &str) -> Result<bool, RecordError>;

    async fn list_records(
        &self,
        record_type: Option<&str>,
    ) -> Result<Vec<Record>, RecordError>;

    /// Case-insensitive substring search over title and body.
    async fn search_records(
        &self,
        query: &str,
        record_type: Option<&str>,
    ) -> Result<Vec<Record>, RecordError>;

    async fn insert_draft(&self, draft: &Draft) -> Result<(), RecordError>;

    async fn get_draft(&self, id: &str) -> Result<Option<Draft>, RecordError>;

    async fn delete_draft(&self, id: &str) -> Result<bool, RecordError>;

    async fn list_drafts(&self) -> Result<Vec<Draft>, RecordError>;
}

struct Inner {
    records: HashMap<String, Record>,
    drafts: HashMap<String, Draft>,
}

/// In-memory `MetadataStore`.
pub struct MemoryMetadataStore {
    inner: RwLock<Inner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: HashMap::new(),
                drafts: HashMap::new(),
            }),
        }
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert_record(&self, record: &Record) -> Result<(), RecordError> {
        let mut w = self.inner.write().await;
        if w.records.contains_key(&record.id) {
            return Err(RecordError::AlreadyExists(record.id.clone()));
        }
        w.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<Record>, RecordError> {
        let r = self.inner.read().await;
        Ok(r.records.get(id).cloned())
    }

    async fn update_record(&self, record: &Record) -> Result<(), RecordError> {
        let mut w = self.inner.write().await;
        if !w.records.contains_key(&record.id) {
            return Err(RecordError::NotFound(record.id.clone()));
        }
        w.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_record(&self, id: &str) -> Result<bool, RecordError> {
        let mut w = self.inner.write().await;
        Ok(w.records.remove(id).is_some())
    }

    async fn list_records(
        &self,
        record_type: Option<&str>,
    ) -> Result<Vec<Record>, RecordError> {
        let r = self.inner.read().await;
        let mut records: Vec<Record> = r
            .records
            .values()
            .filter(|rec| record_type.map_or(true, |t| rec.record_type == t))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn search_records(
        &self,
        query: &str,
        record_type: Option<&str>,
    ) -> Result<Vec<Record>, RecordError> {
        let needle = query.to_lowercase();
        let r = self.inner.read().await;
        let mut records: Vec<Record> = r
            .records
            .values()
            .filter(|rec| record_type.map_or(true, |t| rec.record_type == t))
            .filter(|rec| {
                rec.title.to_lowercase().contains(&needle)
                    || rec.content.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn insert_draft(&self, draft: &Draft) -> Result<(), RecordError> {
        let mut w = self.inner.write().await;
        if w.drafts.contains_key(&draft.id) {
            return Err(RecordError::AlreadyExists(draft.id.clone()));
        }
        w.drafts.insert(draft.id.clone(), draft.clone());
        Ok(())
    }

    async fn get_draft(&self, id: &str) -> Result<Option<Draft>, RecordError> {
        let r = self.inner.read().await;
        Ok(r.drafts.get(id).cloned())
    }

    async fn delete_draft(&self, id: &str) -> Result<bool, RecordError> {
        let mut w = self.inner.write().await;
        Ok(w.drafts.remove(id).is_some())
    }

    async fn list_drafts(&self) -> Result<Vec<Draft>, RecordError> {
        let r = self.inner.read().await;
        let mut drafts: Vec<Draft> = r.drafts.values().cloned().collect();
        drafts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(drafts)
    }
}
