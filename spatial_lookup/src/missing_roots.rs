//! Missing-Roots Repair (spec.md §4.9) and its standalone entry point
//! (SPEC_FULL.md §14). Grounded on the original's
//! `get_ids_with_missing_roots` / `lookup_root_ids` / `process_missing_roots_workflow`
//! (`materializationengine/workflows/ingest_new_annotations.py`).

use std::sync::Arc;

use backoff::BackoffConfig;
use data_types::{AnnotationId, MaterializationInfo, SegmentId};
use external_clients::ChunkedGraphClient;
use observability_deps::tracing::info;
use schema::{AnnotationTableModel, SegmentationTableModel};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use task_runtime::TaskQueue;
use thiserror::Error;

use crate::root_id_resolver::{self, ResolvedRow};

pub const REPAIR_QUEUE: &str = "repair";

/// spec.md §4.9: "partitions the contiguous `[min, max]` ID range into
/// fixed-size chunks (500 IDs)."
pub const REPAIR_CHUNK_SIZE: u64 = 500;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error scanning for missing root IDs: {0}")]
    Database(#[from] sqlx::Error),
}

/// spec.md §4.9 step 1's SQL-only supervoxel read, plus the bulk update by
/// primary key in step 3.
#[derive(Debug, Error)]
pub enum RepairUnitError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("root-id resolver error: {0}")]
    RootId(#[from] root_id_resolver::Error),
}

/// `[min_id, max_id]` inclusive, the global span scanned by
/// `find_missing_root_id_range` before being partitioned into fixed-size
/// chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingRootIdRange {
    pub min_id: AnnotationId,
    pub max_id: AnnotationId,
}

/// spec.md §4.9: "Scans the segmentation table once for the global
/// `MIN(id)` and `MAX(id)` of rows where any `_root_id IS NULL`. If none,
/// returns without work."
pub async fn find_missing_root_id_range(
    pool: &PgPool,
    segmentation_table: &str,
    segmentation_model: &SegmentationTableModel,
) -> Result<Option<MissingRootIdRange>, Error> {
    let root_columns: Vec<&str> = segmentation_model.root_columns().collect();
    if root_columns.is_empty() {
        return Ok(None);
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT MIN(id), MAX(id) FROM ");
    builder.push(segmentation_table);
    builder.push(" WHERE ");
    for (idx, col) in root_columns.iter().enumerate() {
        if idx > 0 {
            builder.push(" OR ");
        }
        builder.push(col);
        builder.push(" IS NULL");
    }

    let row = builder.build().fetch_one(pool).await?;
    let min_id: Option<AnnotationId> = row.try_get(0)?;
    let max_id: Option<AnnotationId> = row.try_get(1)?;

    Ok(match (min_id, max_id) {
        (Some(min_id), Some(max_id)) => Some(MissingRootIdRange { min_id, max_id }),
        _ => None,
    })
}

/// Partitions `[min_id, max_id]` into contiguous chunks of at most
/// `chunk_size` IDs, spec.md §4.9.
pub fn partition_id_range(range: MissingRootIdRange, chunk_size: u64) -> Vec<(AnnotationId, AnnotationId)> {
    let mut out = Vec::new();
    let mut start = range.min_id;
    while start <= range.max_id {
        let end = (start + chunk_size as i64 - 1).min(range.max_id);
        out.push((start, end));
        start = end + 1;
    }
    out
}

/// SPEC_FULL.md §14: `missing_roots::run_repair_workflow(mat_info)` — scan
/// once, partition into 500-ID chunks, submit each as a `TaskQueue` unit.
pub async fn run_repair_workflow(
    pool: &PgPool,
    graph: Arc<dyn ChunkedGraphClient>,
    task_queue: Arc<dyn TaskQueue>,
    mat_info: MaterializationInfo,
    segmentation_model: SegmentationTableModel,
) -> Result<(), Error> {
    let Some(range) = find_missing_root_id_range(pool, &mat_info.segmentation_table_name, &segmentation_model).await? else {
        info!(table = %mat_info.segmentation_table_name, "no missing root IDs found, skipping repair");
        return Ok(());
    };

    let chunks = partition_id_range(range, REPAIR_CHUNK_SIZE);
    info!(table = %mat_info.segmentation_table_name, chunks = chunks.len(), "submitting missing-roots repair chunks");

    for (min_id, max_id) in chunks {
        let pool = pool.clone();
        let graph = graph.clone();
        let mat_info = mat_info.clone();
        let segmentation_model = segmentation_model.clone();

        task_queue.submit(
            REPAIR_QUEUE,
            BackoffConfig::repair(),
            Box::new(move || {
                let pool = pool.clone();
                let graph = graph.clone();
                let mat_info = mat_info.clone();
                let segmentation_model = segmentation_model.clone();
                Box::pin(async move {
                    repair_chunk(&pool, graph.as_ref(), &mat_info, &segmentation_model, min_id, max_id)
                        .await
                        .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })
                })
            }),
        );
    }

    Ok(())
}

/// spec.md §4.9's per-chunk task unit: read supervoxels straight from SQL
/// (no volume calls), re-resolve roots, bulk-update by primary key.
pub async fn repair_chunk(
    pool: &PgPool,
    graph: &dyn ChunkedGraphClient,
    mat_info: &MaterializationInfo,
    segmentation_model: &SegmentationTableModel,
    min_id: AnnotationId,
    max_id: AnnotationId,
) -> Result<(), RepairUnitError> {
    let supervoxel_data = read_supervoxel_columns(pool, &mat_info.segmentation_table_name, segmentation_model, min_id, max_id).await?;
    if supervoxel_data.is_empty() {
        return Ok(());
    }

    let pseudo_annotation = AnnotationTableModel::from_segmentation_model(segmentation_model);
    let resolved = root_id_resolver::resolve_root_ids(
        pool,
        graph,
        &mat_info.segmentation_table_name,
        &pseudo_annotation,
        segmentation_model,
        supervoxel_data,
        mat_info.materialization_timestamp,
    )
    .await?;

    bulk_update_root_ids(pool, &mat_info.segmentation_table_name, segmentation_model, &resolved).await?;
    info!(
        table = %mat_info.segmentation_table_name,
        min_id,
        max_id,
        rows = resolved.len(),
        "repair chunk resolved"
    );
    Ok(())
}

async fn read_supervoxel_columns(
    pool: &PgPool,
    segmentation_table: &str,
    segmentation_model: &SegmentationTableModel,
    min_id: AnnotationId,
    max_id: AnnotationId,
) -> Result<std::collections::HashMap<AnnotationId, std::collections::HashMap<String, SegmentId>>, sqlx::Error> {
    let supervoxel_columns: Vec<&str> = segmentation_model.supervoxel_columns().collect();
    if supervoxel_columns.is_empty() {
        return Ok(std::collections::HashMap::new());
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT id");
    for col in &supervoxel_columns {
        builder.push(", ");
        builder.push(col);
    }
    builder.push(" FROM ");
    builder.push(segmentation_table);
    builder.push(" WHERE id BETWEEN ");
    builder.push_bind(min_id);
    builder.push(" AND ");
    builder.push_bind(max_id);

    let rows = builder.build().fetch_all(pool).await?;
    let mut out = std::collections::HashMap::new();
    for row in rows {
        let id: AnnotationId = row.try_get("id")?;
        let mut cols = std::collections::HashMap::new();
        for col in &supervoxel_columns {
            let value: i64 = row.try_get(*col)?;
            cols.insert(col.to_string(), value as u64);
        }
        out.insert(id, cols);
    }
    Ok(out)
}

async fn bulk_update_root_ids(
    pool: &PgPool,
    segmentation_table: &str,
    segmentation_model: &SegmentationTableModel,
    rows: &[ResolvedRow],
) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }
    let root_columns: Vec<&str> = segmentation_model.root_columns().collect();
    let mut tx = pool.begin().await?;
    for row in rows {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE ");
        builder.push(segmentation_table);
        builder.push(" SET ");
        for (idx, col) in root_columns.iter().enumerate() {
            if idx > 0 {
                builder.push(", ");
            }
            builder.push(col);
            builder.push(" = CASE WHEN ");
            builder.push_bind(row.columns.get(*col).copied().unwrap_or(0) as i64);
            builder.push(" <> 0 THEN ");
            builder.push_bind(row.columns.get(*col).copied().unwrap_or(0) as i64);
            builder.push(" ELSE ");
            builder.push(col);
            builder.push(" END");
        }
        builder.push(" WHERE id = ");
        builder.push_bind(row.id);
        builder.build().execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_splits_into_500_id_chunks() {
        let range = MissingRootIdRange { min_id: 1, max_id: 1200 };
        let chunks = partition_id_range(range, 500);
        assert_eq!(chunks, vec![(1, 500), (501, 1000), (1001, 1200)]);
    }

    #[test]
    fn single_id_range_yields_one_chunk() {
        // spec.md §4.9 / original's `min_id == max_id` branch.
        let range = MissingRootIdRange { min_id: 7, max_id: 7 };
        let chunks = partition_id_range(range, 500);
        assert_eq!(chunks, vec![(7, 7)]);
    }
}
