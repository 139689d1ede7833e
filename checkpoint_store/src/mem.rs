use std::collections::HashMap;

use async_trait::async_trait;
use data_types::{CheckpointRecord, WorkflowStatus};
use parking_lot::Mutex;

use crate::{CheckpointStore, CheckpointUpdate, Error};

/// In-memory `CheckpointStore`, used by tests and by the workflow driver's
/// own unit tests in place of a real Redis instance (mirrors
/// `iox_catalog::mem::MemCatalog`).
#[derive(Debug, Default)]
pub struct MemCheckpointStore {
    records: Mutex<HashMap<(String, String), CheckpointRecord>>,
}

impl MemCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemCheckpointStore {
    async fn initialize(&self, database: &str, table: &str, task_id: &str) -> Result<CheckpointRecord, Error> {
        let mut records = self.records.lock();
        let key = (database.to_string(), table.to_string());
        if let Some(existing) = records.get_mut(&key) {
            // create-if-absent: a record already exists (a resumed run), so
            // only the task id and status are touched; `completed_chunks`
            // and the chunking strategy fields survive (spec.md §3).
            existing.task_id = task_id.to_string();
            existing.status = WorkflowStatus::Initializing;
            return Ok(existing.clone());
        }
        let record = CheckpointRecord::new(table, task_id);
        records.insert(key, record.clone());
        Ok(record)
    }

    async fn update(&self, database: &str, table: &str, update: CheckpointUpdate) -> Result<(), Error> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(&(database.to_string(), table.to_string()))
            .ok_or_else(|| Error::Malformed {
                database: database.to_string(),
                table: table.to_string(),
                reason: "update called before initialize".to_string(),
            })?;
        apply_update(record, update);
        Ok(())
    }

    async fn increment_completed(&self, database: &str, table: &str, _rows_processed: u64) -> Result<u64, Error> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(&(database.to_string(), table.to_string()))
            .ok_or_else(|| Error::Malformed {
                database: database.to_string(),
                table: table.to_string(),
                reason: "increment_completed called before initialize".to_string(),
            })?;
        record.completed_chunks += 1;
        Ok(record.completed_chunks)
    }

    async fn get(&self, database: &str, table: &str) -> Result<Option<CheckpointRecord>, Error> {
        Ok(self
            .records
            .lock()
            .get(&(database.to_string(), table.to_string()))
            .cloned())
    }
}

/// Shared between the mem and redis backends so "which fields does an
/// update touch" stays defined in exactly one place.
pub(crate) fn apply_update(record: &mut CheckpointRecord, update: CheckpointUpdate) {
    let CheckpointUpdate {
        status,
        min_enclosing_bbox,
        total_chunks,
        chunking_strategy_tag,
        used_chunk_size,
        total_row_estimate,
        total_time_seconds,
        last_error,
        index_rebuild_complete,
    } = update;
    if let Some(v) = status {
        record.status = v;
    }
    if let Some(v) = min_enclosing_bbox {
        record.min_enclosing_bbox = Some(v);
    }
    if let Some(v) = total_chunks {
        record.total_chunks = v;
    }
    if let Some(v) = chunking_strategy_tag {
        record.chunking_strategy_tag = Some(v);
    }
    if let Some(v) = used_chunk_size {
        record.used_chunk_size = Some(v);
    }
    if let Some(v) = total_row_estimate {
        record.total_row_estimate = Some(v);
    }
    if let Some(v) = total_time_seconds {
        record.total_time_seconds = Some(v);
    }
    if let Some(v) = last_error {
        record.last_error = Some(v);
    }
    if let Some(v) = index_rebuild_complete {
        record.index_rebuild_complete = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn re_initialize_preserves_completed_chunks() {
        // spec.md §8 S2 regression: re-running `initialize` on a table that
        // already has progress (a resumed workflow) must not reset
        // `completed_chunks` back to 0.
        let store = MemCheckpointStore::new();
        store.initialize("db", "synapse", "task-1").await.unwrap();
        for _ in 0..4 {
            store.increment_completed("db", "synapse", 1).await.unwrap();
        }

        store.initialize("db", "synapse", "task-2").await.unwrap();

        let record = store.get("db", "synapse").await.unwrap().unwrap();
        assert_eq!(record.completed_chunks, 4);
        assert_eq!(record.task_id, "task-2");
    }

    #[tokio::test]
    async fn increment_is_monotonic_across_workers() {
        let store = MemCheckpointStore::new();
        store.initialize("db", "synapse", "task-1").await.unwrap();

        // simulate two workers racing to report completion of different
        // chunks; spec.md §4.2 requires this to never lose an increment.
        let a = store.increment_completed("db", "synapse", 10);
        let b = store.increment_completed("db", "synapse", 5);
        let (a, b) = tokio::join!(a, b);
        a.unwrap();
        b.unwrap();

        let record = store.get("db", "synapse").await.unwrap().unwrap();
        assert_eq!(record.completed_chunks, 2);
    }

    #[tokio::test]
    async fn update_is_last_writer_wins_except_completed_chunks() {
        let store = MemCheckpointStore::new();
        store.initialize("db", "synapse", "task-1").await.unwrap();
        store
            .update(
                "db",
                "synapse",
                CheckpointUpdate {
                    total_chunks: Some(10),
                    status: Some(WorkflowStatus::Processing),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .update(
                "db",
                "synapse",
                CheckpointUpdate {
                    total_chunks: Some(12),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let record = store.get("db", "synapse").await.unwrap().unwrap();
        assert_eq!(record.total_chunks, 12);
        assert_eq!(record.status, WorkflowStatus::Processing);
    }
}
