//! Completion Monitor (spec.md §4.8).
//!
//! A long-running task, started once submission finishes, that polls the
//! task queue and checkpoint until every chunk has completed, then rebuilds
//! the segmentation table's indices and marks the workflow `completed`.
//! Grounded on the original's `monitor_workflow_state`
//! (`materializationengine/shared_tasks.py`, not in the retrieval pack's
//! file list but exercised from `ingest_new_annotations_workflow`).

use std::time::Duration;

use checkpoint_store::{CheckpointStore, CheckpointUpdate};
use data_types::{MaterializationInfo, WorkflowStatus};
use observability_deps::tracing::{error, info};
use schema::SegmentationTableModel;
use sqlx::PgPool;
use task_runtime::TaskQueue;
use thiserror::Error;

use crate::model_factory;
use crate::workflow_driver::PROCESS_QUEUE;

/// spec.md §4.8: "polling every 360 s with a 72-hour hard timeout."
pub const POLL_INTERVAL: Duration = Duration::from_secs(360);
pub const HARD_TIMEOUT: Duration = Duration::from_secs(72 * 60 * 60);

#[derive(Debug, Error)]
pub enum Error {
    #[error("checkpoint store error: {0}")]
    Checkpoint(#[from] checkpoint_store::Error),

    #[error("index rebuild error: {0}")]
    ModelFactory(#[from] model_factory::Error),
}

/// Runs until the workflow completes or the hard timeout elapses. Callers
/// spawn this as its own task (spec.md §4.7 step 7: "start the Completion
/// Monitor as a separate task").
pub async fn run(
    pool: &PgPool,
    checkpoint: &dyn CheckpointStore,
    task_queue: &dyn TaskQueue,
    mat_info: &MaterializationInfo,
    segmentation_model: &SegmentationTableModel,
) -> Result<(), Error> {
    let deadline = tokio::time::Instant::now() + HARD_TIMEOUT;

    loop {
        if tokio::time::Instant::now() >= deadline {
            checkpoint
                .update(
                    &mat_info.database,
                    &mat_info.annotation_table_name,
                    CheckpointUpdate {
                        status: Some(WorkflowStatus::Error),
                        last_error: Some("Monitoring timed out".to_string()),
                        ..Default::default()
                    },
                )
                .await?;
            error!(table = %mat_info.annotation_table_name, "completion monitor timed out after 72h");
            return Ok(());
        }

        if is_complete(checkpoint, task_queue, mat_info).await? {
            model_factory::drop_all_indices_including_primary_key(pool, &mat_info.segmentation_table_name).await?;
            model_factory::rebuild_indices(pool, &mat_info.segmentation_table_name, segmentation_model).await?;
            checkpoint
                .update(
                    &mat_info.database,
                    &mat_info.annotation_table_name,
                    CheckpointUpdate {
                        status: Some(WorkflowStatus::Completed),
                        index_rebuild_complete: Some(true),
                        ..Default::default()
                    },
                )
                .await?;
            info!(table = %mat_info.annotation_table_name, "workflow completed, indices rebuilt");
            return Ok(());
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// spec.md §4.8 "Completion condition: queue length is zero AND
/// `completed_chunks >= total_chunks`."
async fn is_complete(
    checkpoint: &dyn CheckpointStore,
    task_queue: &dyn TaskQueue,
    mat_info: &MaterializationInfo,
) -> Result<bool, Error> {
    if task_queue.queue_len(PROCESS_QUEUE) != 0 {
        return Ok(false);
    }
    let record = checkpoint.get(&mat_info.database, &mat_info.annotation_table_name).await?;
    Ok(record.map(|r| r.is_complete()).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkpoint_store::MemCheckpointStore;
    use data_types::Point3;
    use task_runtime::InProcessTaskQueue;

    fn mat_info() -> MaterializationInfo {
        MaterializationInfo {
            database: "db".to_string(),
            aligned_volume: "av".to_string(),
            annotation_table_name: "synapse".to_string(),
            segmentation_table_name: "synapse__pcg".to_string(),
            schema_tag: "synapse".to_string(),
            pcg_table_name: "pcg".to_string(),
            segmentation_source: "http://volume".to_string(),
            coord_resolution: Point3::new(4.0, 4.0, 40.0),
            materialization_timestamp: chrono::Utc::now(),
            throttle_queues: false,
        }
    }

    #[tokio::test]
    async fn s6_completion_condition_true_when_drained_and_counted() {
        let checkpoint = MemCheckpointStore::new();
        let queue = InProcessTaskQueue::new();
        let info = mat_info();

        checkpoint.initialize(&info.database, &info.annotation_table_name, "task-1").await.unwrap();
        checkpoint
            .update(
                &info.database,
                &info.annotation_table_name,
                CheckpointUpdate {
                    total_chunks: Some(3),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        for _ in 0..3 {
            checkpoint.increment_completed(&info.database, &info.annotation_table_name, 1).await.unwrap();
        }

        assert!(is_complete(&checkpoint, &queue, &info).await.unwrap());
    }

    #[tokio::test]
    async fn not_complete_while_chunks_remain() {
        let checkpoint = MemCheckpointStore::new();
        let queue = InProcessTaskQueue::new();
        let info = mat_info();

        checkpoint.initialize(&info.database, &info.annotation_table_name, "task-1").await.unwrap();
        checkpoint
            .update(
                &info.database,
                &info.annotation_table_name,
                CheckpointUpdate {
                    total_chunks: Some(3),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        checkpoint.increment_completed(&info.database, &info.annotation_table_name, 1).await.unwrap();

        assert!(!is_complete(&checkpoint, &queue, &info).await.unwrap());
    }
}
