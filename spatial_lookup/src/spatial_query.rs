//! Spatial Query Layer (spec.md §4.3).
//!
//! For a cuboid, builds one query whose result set unions a per-column
//! bounding-box select over every geometry column that has a matching
//! supervoxel column in the segmentation model, tagging each row with its
//! column's prefix. Grounded on the original's `select_all_points_in_bbox`
//! / `select_3D_points_in_bbox`
//! (`materializationengine/workflows/spatial_lookup.py`), which use
//! `ST_3DMakeBox` + `intersects_nd` (`&&&`) exactly as reproduced below.

use data_types::{AnnotationId, BoundingBox, Point3};
use schema::{AnnotationTableModel, SegmentationTableModel};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use thiserror::Error;

use crate::point_wkb;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error querying points in bbox: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed point geometry returned from the database: {0}")]
    MalformedPoint(#[from] point_wkb::Error),
}

/// One `(id, type, position)` triple, spec.md §3's result shape for the
/// Spatial Query Layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointRow {
    pub id: AnnotationId,
    pub point_type: String,
    pub position: Point3<i64>,
}

/// Columns this layer queries over: one per geometry column whose matching
/// supervoxel column exists in the segmentation model (spec.md §4.3:
/// "for each geometry column whose matching `_supervoxel_id` exists").
/// Column discovery itself is `schema::columns_by_suffix` (spec.md §4.10);
/// this just maps its aligned column-name lists back to the annotation
/// model's `(column_name, prefix)` pairs this layer's query builder needs.
pub fn queryable_columns<'a>(annotation: &'a AnnotationTableModel, segmentation: &SegmentationTableModel) -> Vec<(&'a str, &'a str)> {
    let discovered = schema::columns_by_suffix(annotation, segmentation, "supervoxel_id");
    discovered
        .annotation_columns
        .iter()
        .filter_map(|name| {
            annotation
                .geometry_columns
                .iter()
                .find(|g| &g.column_name == name)
                .map(|g| (g.column_name.as_str(), g.prefix.as_str()))
        })
        .collect()
}

/// Issues the union-of-per-column-selects query for one chunk (spec.md
/// §4.3). Returns an empty `Vec` rather than an error when there are no
/// points, matching spec.md §4.3 "Empty result returns an empty sequence,
/// not an error" and §7's "Empty result... success" policy.
pub async fn query_points_in_bbox(
    pool: &PgPool,
    annotation_table: &str,
    columns: &[(&str, &str)],
    min_corner: Point3<i64>,
    max_corner: Point3<i64>,
) -> Result<Vec<PointRow>, Error> {
    if columns.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("");
    for (idx, (column, prefix)) in columns.iter().enumerate() {
        if idx > 0 {
            builder.push(" UNION ALL ");
        }
        builder.push("SELECT id, encode(ST_AsEWKB(");
        builder.push(column);
        builder.push("), 'hex') AS pt_position, ");
        builder.push_bind(prefix.to_string());
        builder.push(" AS type FROM ");
        builder.push(annotation_table);
        builder.push(" WHERE valid AND ");
        builder.push(column);
        builder.push(" &&& ST_3DMakeBox(ST_MakePoint(");
        builder.push_bind(min_corner.x as f64);
        builder.push(", ");
        builder.push_bind(min_corner.y as f64);
        builder.push(", ");
        builder.push_bind(min_corner.z as f64);
        builder.push("), ST_MakePoint(");
        builder.push_bind(max_corner.x as f64);
        builder.push(", ");
        builder.push_bind(max_corner.y as f64);
        builder.push(", ");
        builder.push_bind(max_corner.z as f64);
        builder.push("))");
    }

    let rows = builder.build().fetch_all(pool).await?;

    let points: Vec<PointRow> = rows
        .into_iter()
        .map(|row| {
            let id: AnnotationId = row.try_get("id")?;
            let point_type: String = row.try_get("type")?;
            let pt_hex: String = row.try_get("pt_position")?;
            let position = point_wkb::from_ewkb_hex(&pt_hex)?;
            Ok(PointRow { id, point_type, position })
        })
        .collect::<Result<_, Error>>()?;

    // `&&&`/`ST_3DMakeBox` is a closed-box intersects predicate, so a point
    // sitting exactly on a shared face between two adjacent chunks would
    // otherwise come back from both chunks' queries. Re-check against the
    // half-open box here so each point is attributed to exactly one chunk
    // (spec.md §8 property 4: "appears exactly once in that chunk's
    // result... and in no other chunk").
    let bbox = BoundingBox::new(min_corner, max_corner);
    Ok(points.into_iter().filter(|p| bbox.contains_half_open(p.position)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::AnnotationTableModel;

    #[test]
    fn queryable_columns_skips_unmatched_segmentation_columns() {
        let anno = AnnotationTableModel::from_discovered_columns(
            "synapse",
            ["id", "valid", "pre_pt_position", "post_pt_position"],
        );
        let seg = schema::SegmentationTableModel::for_annotation_model("synapse__pcg", &anno)
            .restrict_to_existing(&["id".into(), "pre_pt_supervoxel_id".into(), "pre_pt_root_id".into()]);
        let columns = queryable_columns(&anno, &seg);
        assert_eq!(columns, vec![("pre_pt_position", "pre_pt")]);
    }
}
