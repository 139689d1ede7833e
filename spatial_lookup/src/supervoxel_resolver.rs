//! Supervoxel Resolver (spec.md §4.4).
//!
//! Translates annotation positions into segmentation-volume coordinates,
//! groups points by segmentation chunk key for locality, resolves
//! supervoxel IDs from the segmentation volume in sub-batches, and pivots
//! the result into a per-annotation-id, per-geometry-column map. Grounded
//! on the original's `get_scatter_points` / `point_to_chunk_position` /
//! `_safe_pivot_svid_df_to_dict` (`materializationengine/workflows/spatial_lookup.py`).

use std::collections::HashMap;

use data_types::{AnnotationId, Point3, SegmentId};
use external_clients::SegmentationVolume;
use thiserror::Error;

use crate::spatial_query::PointRow;

#[derive(Debug, Error)]
pub enum Error {
    #[error("segmentation volume error: {0}")]
    Volume(#[from] external_clients::segmentation_volume::Error),
}

struct Indexed<'a> {
    point: &'a PointRow,
    scaled: Point3<i64>,
    chunk_key: Point3<i64>,
}

/// spec.md §4.4 steps 1-6. Returns a sparse per-id map of
/// `{supervoxel_column_name: supervoxel_id}` — callers that need every
/// segmentation column populated (e.g. the Segmentation Upsert, spec.md
/// §4.6) fill in 0 for any column absent from a given id's map, which is
/// exactly the zero-preserving default spec.md §3 invariant (b) requires.
pub async fn resolve_supervoxels(
    volume: &dyn SegmentationVolume,
    points: &[PointRow],
    coord_resolution: Point3<f64>,
    batch_size: usize,
) -> Result<HashMap<AnnotationId, HashMap<String, SegmentId>>, Error> {
    if points.is_empty() {
        return Ok(HashMap::new());
    }

    // step 1-2: scale = seg_resolution / coord_resolution, scaled = floor(pt / scale).
    let seg_resolution = volume.resolution(0).await?;
    let scale = seg_resolution.div(coord_resolution);
    let watershed_mip = volume.watershed_mip().await?;
    let watershed_resolution = volume.resolution(watershed_mip).await?;
    let voxel_offset = volume.voxel_offset(watershed_mip).await?;
    let graph_chunk_size = volume.graph_chunk_size().await?;

    let mut indexed: Vec<Indexed> = points
        .iter()
        .map(|point| {
            let scaled = point.position.as_f64().floor_div(scale);
            let chunk_key = point_to_chunk_position(scaled, seg_resolution, watershed_resolution, voxel_offset, graph_chunk_size);
            Indexed { point, scaled, chunk_key }
        })
        .collect();

    // step 3: sort by segmentation chunk key to improve locality of the scattered lookup.
    indexed.sort_by_key(|i| i.chunk_key);

    // step 4: sub-batched scattered-points calls, merged into one map.
    let mut merged: HashMap<Point3<i64>, SegmentId> = HashMap::new();
    for batch in indexed.chunks(batch_size.max(1)) {
        let physical: Vec<Point3<f64>> = batch.iter().map(|i| i.point.position.as_f64()).collect();
        let result = volume.scattered_points(&physical, coord_resolution).await?;
        merged.extend(result);
    }

    // step 5-6: emit per-point supervoxel IDs, then pivot by id/type.
    let mut out: HashMap<AnnotationId, HashMap<String, SegmentId>> = HashMap::new();
    for item in &indexed {
        let supervoxel_id = merged.get(&item.scaled).copied().unwrap_or(0);
        let column = schema::supervoxel_column_for_prefix(&item.point.point_type);
        out.entry(item.point.id).or_default().insert(column, supervoxel_id);
    }

    Ok(out)
}

/// Mirrors the original's `point_to_chunk_position(cv, pt, mip=0)`: convert
/// a scaled point back to physical space at mip 0, re-scale into the
/// watershed mip's voxel space, subtract the voxel offset, and floor-divide
/// by the graph chunk size. Used only to sort points for locality before
/// sub-batching — not part of the key the scattered-points map is read
/// back with (spec.md §4.4 step 3 vs step 5).
fn point_to_chunk_position(
    scaled: Point3<i64>,
    resolution_mip0: Point3<f64>,
    watershed_resolution: Point3<f64>,
    voxel_offset: Point3<i64>,
    graph_chunk_size: Point3<i64>,
) -> Point3<i64> {
    let physical = scaled.as_f64().zip_with(resolution_mip0, |a, b| a * b);
    let watershed_pt = physical.div(watershed_resolution);
    let shifted = watershed_pt.zip_with(voxel_offset.as_f64(), |a, b| a - b);
    shifted.floor_div(graph_chunk_size.as_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use external_clients::segmentation_volume::InMemorySegmentationVolume;

    fn point_row(id: AnnotationId, point_type: &str, position: Point3<i64>) -> PointRow {
        PointRow {
            id,
            point_type: point_type.to_string(),
            position,
        }
    }

    #[tokio::test]
    async fn s1_single_chunk_happy_path() {
        let volume = InMemorySegmentationVolume::new(Point3::new(8.0, 8.0, 40.0));
        volume.seed(Point3::new(5, 10, 30), 111);

        let points = vec![point_row(7, "pt", Point3::new(10, 20, 30))];
        let result = resolve_supervoxels(&volume, &points, Point3::new(4.0, 4.0, 40.0), 50)
            .await
            .unwrap();

        let row = &result[&7];
        assert_eq!(row.get("pt_supervoxel_id"), Some(&111));
    }

    #[tokio::test]
    async fn missing_key_resolves_to_zero() {
        let volume = InMemorySegmentationVolume::new(Point3::new(8.0, 8.0, 40.0));
        let points = vec![point_row(1, "pt", Point3::new(0, 0, 0))];
        let result = resolve_supervoxels(&volume, &points, Point3::new(4.0, 4.0, 40.0), 50)
            .await
            .unwrap();
        assert_eq!(result[&1].get("pt_supervoxel_id"), Some(&0));
    }

    #[tokio::test]
    async fn sub_batches_never_exceed_batch_size() {
        // coord_resolution == segmentation resolution so scale is 1 and
        // scaled == position, keeping the seeded keys easy to read.
        let volume = InMemorySegmentationVolume::new(Point3::new(8.0, 8.0, 40.0));
        for i in 0..120 {
            volume.seed(Point3::new(i, 0, 0), i as u64 + 1);
        }
        let points: Vec<_> = (0..120)
            .map(|i| point_row(i as i64, "pt", Point3::new(i, 0, 0)))
            .collect();
        let result = resolve_supervoxels(&volume, &points, Point3::new(8.0, 8.0, 40.0), 50)
            .await
            .unwrap();
        assert_eq!(result.len(), 120);
        for (idx, row) in result {
            assert_eq!(row["pt_supervoxel_id"], idx as u64 + 1);
        }
    }

    #[tokio::test]
    async fn different_types_pivot_into_distinct_columns() {
        let volume = InMemorySegmentationVolume::new(Point3::new(8.0, 8.0, 40.0));
        volume.seed(Point3::new(0, 0, 0), 100);
        volume.seed(Point3::new(1, 0, 0), 200);
        let points = vec![
            point_row(1, "pre_pt", Point3::new(0, 0, 0)),
            point_row(1, "post_pt", Point3::new(1, 0, 0)),
        ];
        let result = resolve_supervoxels(&volume, &points, Point3::new(8.0, 8.0, 40.0), 50)
            .await
            .unwrap();
        let row = &result[&1];
        assert_eq!(row["pre_pt_supervoxel_id"], 100);
        assert_eq!(row["post_pt_supervoxel_id"], 200);
    }
}
