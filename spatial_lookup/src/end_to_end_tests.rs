//! End-to-end scenario tests (spec.md §8, S1-S6), composed from the
//! database-free pieces of the pipeline. Steps that require a live
//! Postgres connection (the spatial query layer, the segmentation upsert's
//! `ON CONFLICT` statement, the root-ID resolver's existing-roots read) are
//! exercised at the unit level in their own modules against the in-memory
//! mocks and pure merge helpers; the scenarios below wire those pieces
//! together exactly as the Workflow Driver does.

use std::collections::HashMap;

use chrono::Utc;
use data_types::Point3;
use external_clients::chunked_graph::InMemoryChunkedGraphClient;
use external_clients::segmentation_volume::InMemorySegmentationVolume;
use external_clients::ChunkedGraphClient;
use schema::AnnotationTableModel;

use crate::chunking::{ChunkingStrategy, SingleChunkStrategy};
use crate::spatial_query::PointRow;
use crate::supervoxel_resolver::resolve_supervoxels;
use crate::upsert::merge_preserving_nonzero;

fn segmentation_model() -> schema::SegmentationTableModel {
    let anno = AnnotationTableModel::from_discovered_columns("synapse", ["id", "valid", "pt_position"]);
    schema::SegmentationTableModel::for_annotation_model("synapse__pcg", &anno)
        .restrict_to_existing(&["id".into(), "pt_supervoxel_id".into(), "pt_root_id".into()])
}

#[tokio::test]
async fn s1_single_chunk_happy_path_end_to_end() {
    let volume = InMemorySegmentationVolume::new(Point3::new(8.0, 8.0, 40.0));
    volume.seed(Point3::new(5, 10, 30), 111);
    let graph = InMemoryChunkedGraphClient::new();
    graph.seed(111, 999);

    let points = vec![PointRow {
        id: 7,
        point_type: "pt".to_string(),
        position: Point3::new(10, 20, 30),
    }];

    let supervoxel_data = resolve_supervoxels(&volume, &points, Point3::new(4.0, 4.0, 40.0), 50)
        .await
        .unwrap();
    assert_eq!(supervoxel_data[&7]["pt_supervoxel_id"], 111);

    // Root-ID Resolver, with "no prior roots" (first ingest pass).
    let model = segmentation_model();
    let mut merged: HashMap<i64, HashMap<String, u64>> = HashMap::new();
    for (id, svs) in &supervoxel_data {
        merged.insert(*id, svs.clone());
    }
    for pair in &model.columns {
        let sv = merged[&7][&pair.supervoxel_column];
        let roots = graph.get_roots(&[sv], Utc::now()).await.unwrap();
        merged.get_mut(&7).unwrap().insert(pair.root_column.clone(), roots[0]);
    }

    assert_eq!(merged[&7]["pt_supervoxel_id"], 111);
    assert_eq!(merged[&7]["pt_root_id"], 999);
}

#[tokio::test]
async fn s2_resume_emits_only_remaining_chunks() {
    use checkpoint_store::{CheckpointStore, CheckpointUpdate, MemCheckpointStore};
    use data_types::ChunkingStrategyTag;

    use crate::workflow_driver::plan_resume;

    let bbox = data_types::BoundingBox::new(Point3::new(0, 0, 0), Point3::new(100, 1, 1));

    // Drive this through the checkpoint store exactly as the workflow
    // driver does: initialize, record progress, crash after 4 completed
    // chunks out of 10, then re-initialize (as a restart would) before
    // consulting the checkpoint. This is what regression-tests the
    // "initialize must not erase completed_chunks" defect end to end.
    let checkpoint = MemCheckpointStore::new();
    checkpoint.initialize("db", "synapse", "task-1").await.unwrap();
    checkpoint
        .update(
            "db",
            "synapse",
            CheckpointUpdate {
                total_chunks: Some(10),
                chunking_strategy_tag: Some(ChunkingStrategyTag::UniformCube),
                used_chunk_size: Some(10),
                min_enclosing_bbox: Some(bbox),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    for _ in 0..4 {
        checkpoint.increment_completed("db", "synapse", 1).await.unwrap();
    }

    checkpoint.initialize("db", "synapse", "task-2").await.unwrap();
    let prior = checkpoint.get("db", "synapse").await.unwrap();

    let (strategy, resume_index) = plan_resume(prior.as_ref(), bbox, 0, 1, "synapse");
    assert_eq!(resume_index, 4);
    assert_eq!(strategy.total_chunks(), 10);

    let resumed: Vec<_> = strategy.skip_to_index(resume_index).collect();
    assert_eq!(resumed.len(), 6);
    assert_eq!(resumed[0].index, data_types::ChunkIndex(4));

    let completed_chunks = resume_index + resumed.len() as u64;
    assert_eq!(completed_chunks, strategy.total_chunks());
}

#[tokio::test]
async fn s3_empty_chunk_advances_checkpoint_without_upsert() {
    use checkpoint_store::{CheckpointStore, MemCheckpointStore};

    let checkpoint = MemCheckpointStore::new();
    checkpoint.initialize("db", "synapse", "task-1").await.unwrap();

    let points: Vec<PointRow> = Vec::new();
    assert!(points.is_empty());

    // process_chunk's empty-points branch: increment fires, no upsert.
    let new_count = checkpoint.increment_completed("db", "synapse", 0).await.unwrap();
    assert_eq!(new_count, 1);
}

#[test]
fn s4_zero_preservation_across_repeated_upsert() {
    let mut current = 42u64;
    current = merge_preserving_nonzero(current, 0);
    assert_eq!(current, 42);
}

#[tokio::test]
async fn s5_missing_roots_repair_resolves_all_three_rows() {
    use crate::missing_roots::{partition_id_range, MissingRootIdRange};

    let graph = InMemoryChunkedGraphClient::new();
    graph.seed(100, 1000);
    graph.seed(200, 2000);
    graph.seed(300, 3000);

    let range = MissingRootIdRange { min_id: 1, max_id: 3 };
    let chunks = partition_id_range(range, 500);
    assert_eq!(chunks, vec![(1, 3)]);

    let supervoxels: HashMap<i64, u64> = HashMap::from([(1, 100), (2, 200), (3, 300)]);
    let model = segmentation_model();
    let root_column = &model.columns[0].root_column;

    let mut resolved: HashMap<i64, HashMap<String, u64>> = HashMap::new();
    for (id, sv) in &supervoxels {
        let roots = graph.get_roots(&[*sv], Utc::now()).await.unwrap();
        let mut cols = HashMap::new();
        cols.insert(model.columns[0].supervoxel_column.clone(), *sv);
        cols.insert(root_column.clone(), roots[0]);
        resolved.insert(*id, cols);
    }

    assert_eq!(resolved[&1][root_column], 1000);
    assert_eq!(resolved[&2][root_column], 2000);
    assert_eq!(resolved[&3][root_column], 3000);
    // supervoxel columns untouched by the repair pass.
    assert_eq!(resolved[&1][&model.columns[0].supervoxel_column], 100);
}

#[tokio::test]
async fn s6_completion_drains_queue_and_matches_total() {
    use checkpoint_store::{CheckpointStore, CheckpointUpdate, MemCheckpointStore};
    use task_runtime::{InProcessTaskQueue, TaskQueue};

    let checkpoint = MemCheckpointStore::new();
    let queue = InProcessTaskQueue::new();

    checkpoint.initialize("db", "synapse", "task-1").await.unwrap();
    checkpoint
        .update(
            "db",
            "synapse",
            CheckpointUpdate {
                total_chunks: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    for _ in 0..3 {
        checkpoint.increment_completed("db", "synapse", 1).await.unwrap();
    }

    let record = checkpoint.get("db", "synapse").await.unwrap().unwrap();
    assert!(record.is_complete());
    assert_eq!(queue.queue_len("process"), 0);
}

#[test]
fn single_chunk_strategy_zero_chunks_for_empty_bbox() {
    let bbox = data_types::BoundingBox::new(Point3::new(0, 0, 0), Point3::new(0, 10, 10));
    let strategy = SingleChunkStrategy::new(bbox);
    assert_eq!(strategy.total_chunks(), 0);
}
