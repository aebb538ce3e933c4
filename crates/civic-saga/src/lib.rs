//! Saga Coordination for Civic Record Mutations
//!
//! Every mutation of a civic record touches four stores that share no
//! transaction manager: the metadata database, the commit log, the working
//! tree, and the search index. This crate keeps them consistent with the
//! saga pattern - forward execution of an ordered step list, reverse-order
//! compensation on failure, persisted execution state, idempotent retries,
//! resource locking, and an out-of-band recovery sweep.
//!
//! Key concepts:
//! - A saga is a value: a `SagaDefinition` holding an ordered list of step
//!   descriptors. Steps implement the `SagaStep` capability set
//!   {execute, compensate?, is_compensatable, timeout}.
//! - State lives behind the `SagaStore` trait with in-memory and Postgres
//!   backends, so the engine runs the same against either.
//! - Locks are exclusive and time-bounded; waiters fail fast rather than
//!   queue.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(MemorySagaStore::new());
//! let locks = LockManager::new(Arc::new(MemoryLockStore::new()));
//! let coordinator = SagaCoordinator::new(store, locks, CoordinatorConfig::default());
//!
//! let saga = SagaDefinition::new("CreateRecord", 1)
//!     .step(CreateInRecords { .. })
//!     .step(CreateFile { .. });
//! let result = coordinator.execute(&saga, ctx, ExecuteOptions::default()).await?;
//! ```

mod coordinator;
mod error;
mod idempotency;
mod locks;
mod metrics;
mod recovery;
mod state;
mod step;
mod store;
mod store_memory;
#[cfg(feature = "postgres")]
mod store_postgres;

pub use coordinator::{CoordinatorConfig, ExecuteOptions, SagaCoordinator, SagaResult};
pub use error::{LockError, SagaError};
pub use idempotency::IdempotencyManager;
pub use locks::{LockManager, LockStore, MemoryLockStore, ResourceLock};
pub use metrics::{SagaMetrics, SagaTypeMetrics};
pub use recovery::{RecoveryManager, RecoverySweep, MANUAL_INTERVENTION_SENTINEL};
pub use state::{CompensationStatus, SagaInstance, SagaStatus};
pub use step::{SagaContext, SagaDefinition, SagaStep};
pub use store::SagaStore;
pub use store_memory::MemorySagaStore;
#[cfg(feature = "postgres")]
pub use store_postgres::{PostgresLockStore, PostgresSagaStore};
