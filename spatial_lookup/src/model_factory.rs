//! Schema & Model Factory's database-introspection glue (spec.md §4.10).
//!
//! The typed models in the `schema` crate are pure data; this module is
//! where they get built from a live database (`information_schema`) and
//! where a missing segmentation table gets created. Grounded on the
//! original's `create_annotation_model` / `create_segmentation_model` /
//! `create_missing_segmentation_table`
//! (`materializationengine/workflows/ingest_new_annotations.py`,
//! `materializationengine/utils.py`).

use chrono::Utc;
use data_types::{MaterializationInfo, SegmentationMetadata};
use schema::{AnnotationTableModel, SegmentationTableModel};
use sqlx::{PgPool, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error introspecting schema: {0}")]
    Database(#[from] sqlx::Error),
}

/// Introspects `table_name`'s columns via `information_schema.columns` and
/// builds the annotation model (spec.md §4.10(a), §9 "discovered at
/// runtime by column-name suffix"). If the table has no columns yet to
/// introspect, falls back to `schema::known_schema_tags()`'s pre-populated
/// model for `schema_tag` (spec.md §4.7 step 3: the segmentation table may
/// need to be created before the annotation table has ever been
/// introspected).
pub async fn introspect_annotation_model(
    pool: &PgPool,
    table_name: &str,
    schema_tag: &str,
) -> Result<AnnotationTableModel, Error> {
    let columns = existing_columns(pool, table_name).await?;
    if columns.is_empty() {
        if let Some((_, known)) = schema::known_schema_tags().into_iter().find(|(tag, _)| *tag == schema_tag) {
            return Ok(AnnotationTableModel {
                table_name: table_name.to_string(),
                ..known
            });
        }
    }
    Ok(AnnotationTableModel::from_discovered_columns(table_name, columns))
}

async fn existing_columns(pool: &PgPool, table_name: &str) -> Result<Vec<String>, Error> {
    let rows = sqlx::query("SELECT column_name FROM information_schema.columns WHERE table_name = $1")
        .bind(table_name)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| row.try_get::<String, _>("column_name"))
        .collect::<Result<_, _>>()?)
}

/// spec.md §4.7 step 3: "Ensure the segmentation table exists; if created
/// now, also register its metadata row." Returns the restricted
/// segmentation model plus whether the table was created by this call.
pub async fn ensure_segmentation_table(
    pool: &PgPool,
    mat_info: &MaterializationInfo,
    annotation: &AnnotationTableModel,
) -> Result<(SegmentationTableModel, bool), Error> {
    let full_model = SegmentationTableModel::for_annotation_model(&mat_info.segmentation_table_name, annotation);

    let already_registered: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM segmentation_metadata WHERE table_name = $1",
    )
    .bind(&mat_info.segmentation_table_name)
    .fetch_optional(pool)
    .await?;

    if already_registered.is_some() {
        let cols = existing_columns(pool, &mat_info.segmentation_table_name).await?;
        return Ok((full_model.restrict_to_existing(&cols), false));
    }

    create_segmentation_table(pool, &mat_info.segmentation_table_name, &full_model).await?;
    register_segmentation_metadata(pool, mat_info).await?;
    Ok((full_model, true))
}

async fn create_segmentation_table(
    pool: &PgPool,
    table_name: &str,
    model: &SegmentationTableModel,
) -> Result<(), Error> {
    let mut ddl = format!("CREATE TABLE IF NOT EXISTS {table_name} (id BIGINT PRIMARY KEY");
    for pair in &model.columns {
        ddl.push_str(&format!(", {} BIGINT NOT NULL DEFAULT 0", pair.supervoxel_column));
        ddl.push_str(&format!(", {} BIGINT", pair.root_column));
    }
    ddl.push(')');
    sqlx::query(&ddl).execute(pool).await?;
    Ok(())
}

async fn register_segmentation_metadata(pool: &PgPool, mat_info: &MaterializationInfo) -> Result<(), Error> {
    let metadata = SegmentationMetadata {
        annotation_table: mat_info.annotation_table_name.clone(),
        schema_type: mat_info.schema_tag.clone(),
        table_name: mat_info.segmentation_table_name.clone(),
        valid: true,
        created: Utc::now(),
        pcg_table_name: mat_info.pcg_table_name.clone(),
    };
    sqlx::query(
        "INSERT INTO segmentation_metadata (annotation_table, schema_type, table_name, valid, created, pcg_table_name) \
         VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (table_name) DO NOTHING",
    )
    .bind(&metadata.annotation_table)
    .bind(&metadata.schema_type)
    .bind(&metadata.table_name)
    .bind(metadata.valid)
    .bind(metadata.created)
    .bind(&metadata.pcg_table_name)
    .execute(pool)
    .await?;
    Ok(())
}

/// spec.md §4.7 step 4: "Drop all secondary indices on the segmentation
/// table (primary key retained) to accelerate bulk upserts."
pub async fn drop_secondary_indices(pool: &PgPool, segmentation_table: &str) -> Result<(), Error> {
    let rows = sqlx::query(
        "SELECT indexname FROM pg_indexes WHERE tablename = $1 AND indexname NOT LIKE '%_pkey'",
    )
    .bind(segmentation_table)
    .fetch_all(pool)
    .await?;
    for row in rows {
        let indexname: String = row.try_get("indexname")?;
        sqlx::query(&format!("DROP INDEX IF EXISTS {indexname}")).execute(pool).await?;
    }
    Ok(())
}

/// spec.md §4.8 completion: "drop all indices on the segmentation table
/// (including primary key this time)".
pub async fn drop_all_indices_including_primary_key(pool: &PgPool, segmentation_table: &str) -> Result<(), Error> {
    drop_secondary_indices(pool, segmentation_table).await?;
    sqlx::query(&format!("ALTER TABLE {segmentation_table} DROP CONSTRAINT IF EXISTS {segmentation_table}_pkey"))
        .execute(pool)
        .await?;
    Ok(())
}

/// spec.md §4.8 completion: "issue a sequence of `CREATE INDEX` statements
/// derived from the segmentation model, chained so each runs only after
/// the previous succeeds". Rebuilds the primary key first.
pub async fn rebuild_indices(pool: &PgPool, segmentation_table: &str, model: &SegmentationTableModel) -> Result<(), Error> {
    sqlx::query(&format!("ALTER TABLE {segmentation_table} ADD PRIMARY KEY (id)"))
        .execute(pool)
        .await?;
    for pair in &model.columns {
        let idx_sv = format!("idx_{segmentation_table}_{}", pair.supervoxel_column);
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {idx_sv} ON {segmentation_table} ({})",
            pair.supervoxel_column
        ))
        .execute(pool)
        .await?;
        let idx_root = format!("idx_{segmentation_table}_{}", pair.root_column);
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {idx_root} ON {segmentation_table} ({})",
            pair.root_column
        ))
        .execute(pool)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_ddl_has_one_pair_per_geometry_column() {
        let anno = AnnotationTableModel::from_discovered_columns(
            "synapse",
            ["id", "valid", "pre_pt_position", "post_pt_position"],
        );
        let model = SegmentationTableModel::for_annotation_model("synapse__pcg", &anno);
        assert_eq!(model.columns.len(), 2);
    }
}
