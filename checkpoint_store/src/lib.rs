//! Checkpoint Store (spec.md §4.2).
//!
//! One record per `(database, table)`, durable across process restarts so
//! an interrupted workflow can resume without duplicating work. The only
//! field with a stronger-than-last-writer-wins contract is
//! `completed_chunks`, which must only ever increase (spec.md §3 Checkpoint
//! Record lifecycle, §4.2 "strictly monotonic").

#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

mod mem;
mod redis_store;

pub use mem::MemCheckpointStore;
pub use redis_store::RedisCheckpointStore;

use async_trait::async_trait;
use data_types::{BoundingBox, ChunkingStrategyTag, CheckpointRecord, WorkflowStatus};
use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed checkpoint record for {database}/{table}: {reason}")]
    Malformed {
        database: String,
        table: String,
        reason: String,
    },
}

/// Fields an in-flight workflow may update on its checkpoint. `None` means
/// "leave as-is". Every field here is last-writer-wins except
/// `completed_chunks`, which is applied through
/// [`CheckpointStore::increment_completed`] instead so it can be enforced
/// as monotonic (spec.md §4.2).
#[derive(Debug, Clone, Default)]
pub struct CheckpointUpdate {
    pub status: Option<WorkflowStatus>,
    pub min_enclosing_bbox: Option<BoundingBox>,
    pub total_chunks: Option<u64>,
    pub chunking_strategy_tag: Option<ChunkingStrategyTag>,
    pub used_chunk_size: Option<i64>,
    pub total_row_estimate: Option<u64>,
    pub total_time_seconds: Option<f64>,
    pub last_error: Option<String>,
    pub index_rebuild_complete: Option<bool>,
}

/// Durable key-value checkpoint store, spec.md §4.2. Backed by Redis in
/// production (`RedisCheckpointStore`); `MemCheckpointStore` stands in for
/// tests, an in-memory twin for every durable trait.
#[async_trait]
pub trait CheckpointStore: Debug + Send + Sync {
    /// spec.md §4.2 `initialize(table, task_id)`. Creates a fresh record in
    /// `Initializing` status if none exists yet for the table. If a record
    /// already exists (a resumed run), `completed_chunks` and every
    /// chunking-strategy field are left untouched — only `task_id` and
    /// `status` are updated — so re-initializing a table with prior
    /// progress never undoes spec.md §3's "completed_chunks only ever
    /// increases" invariant.
    async fn initialize(&self, database: &str, table: &str, task_id: &str) -> Result<CheckpointRecord, Error>;

    /// spec.md §4.2 `update(table, fields...)`. Applies whichever fields of
    /// `update` are `Some`, last-writer-wins.
    async fn update(&self, database: &str, table: &str, update: CheckpointUpdate) -> Result<(), Error>;

    /// spec.md §4.2 `increment_completed(table, rows_processed)`. Atomic
    /// under concurrent workers; returns the new `completed_chunks` value.
    /// `rows_processed` is accepted for parity with the original task
    /// signature but this store only tracks chunk counts, not row counts —
    /// the per-chunk idempotent upsert is what makes overcounting safe
    /// (spec.md §4.2).
    async fn increment_completed(&self, database: &str, table: &str, rows_processed: u64) -> Result<u64, Error>;

    /// spec.md §4.2 `get(table)`.
    async fn get(&self, database: &str, table: &str) -> Result<Option<CheckpointRecord>, Error>;
}
