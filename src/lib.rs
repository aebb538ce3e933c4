//! Civic Records Platform Core
//!
//! A civic-records platform keeps four stores consistent for every
//! mutation of a record: the relational metadata database, the
//! version-controlled content repository, the filesystem working tree,
//! and the derived search index. No common transaction manager spans
//! them, so every mutation runs as a saga (see the `civic-saga` crate):
//! forward steps with step-local compensation, persisted execution state,
//! resource locks, idempotent retries, and an out-of-band recovery sweep.
//!
//! This crate holds the domain around that coordinator:
//! - `record`: the record model, the canonical header+body serializer,
//!   the composed header schema validator, and path conventions;
//! - `database`, `fs`, `git`, `index`, `hooks`: the narrow contracts the
//!   sagas consume, each with an in-memory backend and a production
//!   backend (Postgres behind `database`, git2 behind `git`);
//! - `sagas`: the four concrete workflows - create, update, archive,
//!   publish-draft;
//! - `config`: the record-type/status/module catalogues;
//! - templates (the `civic-templates` crate) feed new-record creation.
//!
//! # Example
//!
//! ```ignore
//! let services = SagaServices { /* memory or production backends */ };
//! let coordinator = SagaCoordinator::new(store, locks, Default::default());
//!
//! let saga = create_record_saga(&services);
//! let ctx = RecordSagaContext::create("corr-1", "policy", "Open Data");
//! let result = coordinator.execute(&saga, ctx, Default::default()).await?;
//! ```

pub mod config;
pub mod database;
pub mod fs;
pub mod git;
pub mod hooks;
pub mod index;
pub mod record;
pub mod sagas;

pub use config::PlatformConfig;
pub use sagas::{
    archive_record_saga, create_record_saga, publish_draft_saga, update_record_saga,
    RecordSagaContext, SagaServices,
};

// The saga engine surface, re-exported for callers wiring a coordinator.
pub use civic_saga::{
    CompensationStatus, CoordinatorConfig, ExecuteOptions, LockManager, MemoryLockStore,
    MemorySagaStore, RecoveryManager, SagaCoordinator, SagaError, SagaMetrics, SagaResult,
    SagaStatus,
};

/// Install the process-wide tracing subscriber, honoring `RUST_LOG`.
/// Call once at startup, before any saga runs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
