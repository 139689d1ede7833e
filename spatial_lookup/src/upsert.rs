//! Segmentation Upsert (spec.md §4.6).
//!
//! Builds a segmentation row from the Root-ID Resolver's output,
//! backfilling any missing column with 0, and issues a single
//! `INSERT ... ON CONFLICT (id) DO UPDATE` per chunk whose `SET` clause
//! preserves a previously resolved value whenever the incoming value is 0.
//! Grounded on the original's SQLAlchemy `case()` upsert in
//! `materializationengine/workflows/ingest_new_annotations.py`.

use data_types::{AnnotationId, SegmentId};
use schema::SegmentationTableModel;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use thiserror::Error;

use crate::root_id_resolver::ResolvedRow;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error during segmentation upsert: {0}")]
    Database(#[from] sqlx::Error),
}

/// spec.md §4.6. One transaction per call; a partial failure leaves no
/// rows inserted for this chunk (transactional boundary). The upsert
/// itself is idempotent: at-least-once retries re-apply the same values.
pub async fn upsert_segmentation_rows(
    pool: &PgPool,
    segmentation_table: &str,
    segmentation_model: &SegmentationTableModel,
    rows: &[ResolvedRow],
) -> Result<(), Error> {
    if rows.is_empty() {
        return Ok(());
    }

    let mut tx: Transaction<'_, Postgres> = pool.begin().await?;

    let columns = segmentation_model.all_columns();
    let value_columns = &columns[1..]; // everything but `id`

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO ");
    builder.push(segmentation_table);
    builder.push(" (");
    builder.push(columns.join(", "));
    builder.push(") ");

    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.id);
        for col in value_columns {
            let value: i64 = value_for(row, col) as i64;
            b.push_bind(value);
        }
    });

    builder.push(" ON CONFLICT (id) DO UPDATE SET ");
    for (idx, col) in value_columns.iter().enumerate() {
        if idx > 0 {
            builder.push(", ");
        }
        builder.push(col);
        builder.push(" = CASE WHEN excluded.");
        builder.push(col);
        builder.push(" <> 0 THEN excluded.");
        builder.push(col);
        builder.push(" ELSE ");
        builder.push(segmentation_table);
        builder.push(".");
        builder.push(col);
        builder.push(" END");
    }

    builder.build().execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

fn value_for(row: &ResolvedRow, column: &str) -> SegmentId {
    row.columns.get(column).copied().unwrap_or(0)
}

/// The pure per-column merge rule the `ON CONFLICT ... DO UPDATE` clause
/// above applies in SQL (spec.md §4.6: "`IF incoming != 0 THEN incoming
/// ELSE existing`"), exposed standalone so it can be property-tested
/// without a database (spec.md §8 invariant 1: "the final value of a
/// column is the last nonzero value observed, or zero if none ever
/// observed").
pub fn merge_preserving_nonzero(existing: SegmentId, incoming: SegmentId) -> SegmentId {
    if incoming != 0 {
        incoming
    } else {
        existing
    }
}

pub fn rows_by_id(rows: &[ResolvedRow]) -> HashMap<AnnotationId, &ResolvedRow> {
    rows.iter().map(|r| (r.id, r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::AnnotationTableModel;

    fn model() -> SegmentationTableModel {
        let anno = AnnotationTableModel::from_discovered_columns("synapse", ["id", "valid", "pt_position"]);
        SegmentationTableModel::for_annotation_model("synapse__pcg", &anno)
            .restrict_to_existing(&["id".into(), "pt_supervoxel_id".into(), "pt_root_id".into()])
    }

    #[test]
    fn missing_column_backfills_to_zero() {
        let row = ResolvedRow {
            id: 1,
            columns: HashMap::from([("pt_supervoxel_id".to_string(), 42u64)]),
        };
        assert_eq!(value_for(&row, "pt_supervoxel_id"), 42);
        assert_eq!(value_for(&row, "pt_root_id"), 0);
    }

    #[test]
    fn all_columns_orders_id_first() {
        let m = model();
        let cols = m.all_columns();
        assert_eq!(cols[0], "id");
        assert!(cols.contains(&"pt_supervoxel_id".to_string()));
        assert!(cols.contains(&"pt_root_id".to_string()));
    }

    #[test]
    fn rows_by_id_indexes_by_annotation_id() {
        let rows = vec![
            ResolvedRow { id: 1, columns: HashMap::new() },
            ResolvedRow { id: 2, columns: HashMap::new() },
        ];
        let indexed = rows_by_id(&rows);
        assert_eq!(indexed.len(), 2);
        assert_eq!(indexed[&1].id, 1);
    }

    #[test]
    fn s4_zero_preserves_prior_value() {
        // S4: pt_root_id=42 re-upserted with incoming 0 stays 42.
        assert_eq!(merge_preserving_nonzero(42, 0), 42);
    }

    #[test]
    fn nonzero_incoming_overwrites() {
        assert_eq!(merge_preserving_nonzero(42, 7), 7);
    }

    proptest::proptest! {
        #[test]
        fn upsert_monotonicity(sequence in proptest::collection::vec(0u64..5, 1..20)) {
            // spec.md §8 invariant 1: folding any sequence of incoming
            // values through the merge rule yields the last nonzero value,
            // or zero if none were ever nonzero.
            let folded = sequence.iter().fold(0u64, |acc, &v| merge_preserving_nonzero(acc, v));
            let expected = sequence.iter().rev().find(|&&v| v != 0).copied().unwrap_or(0);
            proptest::prop_assert_eq!(folded, expected);
        }
    }
}
