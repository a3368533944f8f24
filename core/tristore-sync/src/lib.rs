//! Cursor-based incremental sync across three record stores.
//!
//! Records flow one way: source → intermediate → target. Each leg lists the
//! records changed since its cursor, maps their fields, and upserts them
//! downstream keyed by an external reference, so re-running a sync never
//! duplicates data.
//!
//! # Components
//!
//! - **RemoteStore**: capability interface every store implements
//! - **FieldMapper**: table-driven field translation per entity type
//! - **ChangeCursor**: per-leg watermark, persisted through a `CursorStore`
//! - **UpsertEngine**: create-or-update by external reference
//! - **SyncOrchestrator**: runs both legs and reports a `SyncSummary`
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use tristore_sync::{MemoryStore, OrchestratorConfig, RunCursors, SyncOrchestrator};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = OrchestratorConfig::default();
//! let orchestrator = SyncOrchestrator::new(
//!     config.clone(),
//!     Arc::new(MemoryStore::new("source", "ExternalRef")),
//!     Arc::new(MemoryStore::new("intermediate", "AirtableID")),
//!     Arc::new(MemoryStore::new("target", "reference")),
//! )
//! .unwrap();
//!
//! let summary = orchestrator
//!     .run(RunCursors::beginning(&config), &CancellationToken::new())
//!     .await;
//! assert!(summary.is_done());
//! # });
//! ```

pub mod adapters;
mod cursor;
mod cursor_store;
mod error;
pub mod mapper;
mod memory;
mod orchestrator;
mod retry;
mod store;
mod summary;
mod upsert;

pub use cursor::{ChangeCursor, CursorStore, MemoryCursorStore, WatermarkTracker};
pub use cursor_store::SqliteCursorStore;
pub use error::{ErrorKind, SyncError, SyncResult};
pub use mapper::{FieldMapper, FieldRule, MappingTable, Transform};
pub use memory::{CallCounts, FailureMode, MemoryStore, Operation};
pub use orchestrator::{
    OrchestratorConfig, RunCursors, StageConfig, SyncOrchestrator, DEFAULT_CONCURRENCY,
};
pub use retry::RetryPolicy;
pub use store::RemoteStore;
pub use summary::{
    RecordFailure, RunOutcome, RunPhase, StageId, StagePhase, StageReport, SyncSummary,
};
pub use upsert::{UpsertAction, UpsertEngine, UpsertOutcome};
