//! Schema & Model Factory (spec.md §4.10).
//!
//! Annotation tables are dynamically typed: which spatial columns exist
//! depends on the schema a given annotation table was created with (e.g. a
//! "synapse" table has `pre_pt_position`/`post_pt_position`, a
//! "cell_type_local" table has a single `pt_position`). Rather than let
//! every caller string-match column names, this crate centralizes that
//! reflection behind typed models, exactly as spec.md §9 specifies.

#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

mod registry;

pub use registry::known_schema_tags;

use std::fmt;

/// A geometry column on an annotation table, e.g. `pre_pt_position`, whose
/// prefix (`pre_pt`) is reused to name the matching segmentation columns
/// and to tag rows returned from the Spatial Query Layer (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryColumn {
    pub column_name: String,
    pub prefix: String,
}

impl GeometryColumn {
    /// Derives a geometry column's prefix from its name by stripping the
    /// `_position` suffix, e.g. `pre_pt_position` -> `pre_pt`.
    pub fn from_column_name(column_name: impl Into<String>) -> Option<Self> {
        let column_name = column_name.into();
        let prefix = column_name.strip_suffix("_position")?.to_string();
        Some(Self {
            column_name,
            prefix,
        })
    }

    /// The segmentation column names this geometry column maps to, before
    /// checking whether the segmentation table actually carries them
    /// (spec.md §4.3: "whose matching `_supervoxel_id` exists").
    ///
    /// Mirrors the original's rule: if the prefix already ends in `pt`
    /// (e.g. `pt`, `pre_pt`, `post_pt`) the supervoxel column is
    /// `{prefix}_supervoxel_id`; otherwise (a prefix with no trailing
    /// `pt`) it is `{prefix}_pt_supervoxel_id` (spec.md §4.4 step 6).
    pub fn supervoxel_column_name(&self) -> String {
        supervoxel_column_for_prefix(&self.prefix)
    }

    pub fn root_column_name(&self) -> String {
        self.supervoxel_column_name().replace("supervoxel_id", "root_id")
    }
}

/// The supervoxel column name a geometry-column prefix maps to (spec.md
/// §4.4 step 6), exposed standalone so the Supervoxel Resolver can apply
/// the same naming rule to a bare `type` tag returned from the Spatial
/// Query Layer without constructing a full [`GeometryColumn`].
pub fn supervoxel_column_for_prefix(prefix: &str) -> String {
    if prefix.ends_with("pt") {
        format!("{prefix}_supervoxel_id")
    } else {
        format!("{prefix}_pt_supervoxel_id")
    }
}

impl fmt::Display for GeometryColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column_name)
    }
}

/// In-memory description of an annotation table's shape, spec.md §4.10(a).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationTableModel {
    pub table_name: String,
    pub id_column: String,
    pub valid_column: String,
    pub geometry_columns: Vec<GeometryColumn>,
}

impl AnnotationTableModel {
    /// Builds a model from a raw list of column names discovered by
    /// introspecting the table (spec.md §4.10, §9: "discovered at runtime
    /// by column-name suffix").
    pub fn from_discovered_columns(
        table_name: impl Into<String>,
        column_names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let geometry_columns = column_names
            .into_iter()
            .filter_map(|c| GeometryColumn::from_column_name(c.into()))
            .collect();
        Self {
            table_name: table_name.into(),
            id_column: "id".to_string(),
            valid_column: "valid".to_string(),
            geometry_columns,
        }
    }

    /// Reconstructs a minimal annotation-shaped model directly from a
    /// segmentation model's column prefixes. Used by callers that only
    /// have the segmentation table in hand (spec.md §4.9's repair pass,
    /// which re-resolves root IDs straight from SQL and never touches the
    /// annotation table), so they can still drive `columns_by_suffix`
    /// instead of hand-rolling the same pairing.
    pub fn from_segmentation_model(segmentation: &SegmentationTableModel) -> Self {
        Self {
            table_name: segmentation.table_name.clone(),
            id_column: segmentation.id_column.clone(),
            valid_column: "valid".to_string(),
            geometry_columns: segmentation
                .columns
                .iter()
                .map(|c| GeometryColumn {
                    column_name: format!("{}_position", c.prefix),
                    prefix: c.prefix.clone(),
                })
                .collect(),
        }
    }
}

/// One `(supervoxel_column, root_column)` pair matching a geometry column,
/// spec.md §3 "Schema Table Metadata".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationColumnPair {
    pub prefix: String,
    pub supervoxel_column: String,
    pub root_column: String,
}

/// In-memory description of a segmentation table's shape, spec.md
/// §4.10(b).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationTableModel {
    pub table_name: String,
    pub id_column: String,
    pub columns: Vec<SegmentationColumnPair>,
}

impl SegmentationTableModel {
    /// Builds the segmentation model that corresponds to an annotation
    /// model: every geometry column gets a supervoxel/root pair. Columns
    /// not actually present in the segmentation table are filtered out by
    /// `SegmentationTableModel::restrict_to_existing` once the table has
    /// been introspected — "not all geometry columns require segmentation"
    /// (spec.md §3).
    pub fn for_annotation_model(segmentation_table_name: impl Into<String>, anno: &AnnotationTableModel) -> Self {
        let columns = anno
            .geometry_columns
            .iter()
            .map(|g| SegmentationColumnPair {
                prefix: g.prefix.clone(),
                supervoxel_column: g.supervoxel_column_name(),
                root_column: g.root_column_name(),
            })
            .collect();
        Self {
            table_name: segmentation_table_name.into(),
            id_column: "id".to_string(),
            columns,
        }
    }

    /// Drops any column pair whose supervoxel column isn't actually a
    /// column on the live segmentation table (spec.md §4.3, §7 "Missing
    /// optional column in segmentation model" -> "Skip that spatial column
    /// silently").
    pub fn restrict_to_existing(mut self, existing_columns: &[String]) -> Self {
        self.columns
            .retain(|c| existing_columns.iter().any(|e| e == &c.supervoxel_column));
        self
    }

    pub fn supervoxel_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.supervoxel_column.as_str())
    }

    pub fn root_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.root_column.as_str())
    }

    pub fn all_columns(&self) -> Vec<String> {
        let mut out = vec![self.id_column.clone()];
        for c in &self.columns {
            out.push(c.supervoxel_column.clone());
            out.push(c.root_column.clone());
        }
        out
    }
}

/// The three aligned lists `columns_by_suffix` yields, so callers (spec.md
/// §4.5, §4.9) can write column-discovery code once instead of
/// string-matching inline. `suffix` is one of `"supervoxel_id"` or
/// `"root_id"`.
#[derive(Debug, Clone)]
pub struct ColumnsBySuffix {
    /// Annotation-side geometry columns, in the same order as the other
    /// two lists.
    pub annotation_columns: Vec<String>,
    /// Matching segmentation columns ending in `suffix`.
    pub segmentation_columns: Vec<String>,
    /// `segmentation_columns` again, reachable by the name callers in the
    /// original code used (`target_cols`) — kept as a distinct field so
    /// call sites read naturally either way.
    pub target_columns: Vec<String>,
}

/// spec.md §4.10 helper: `columns_by_suffix(annotation_model,
/// segmentation_model, suffix)`.
pub fn columns_by_suffix(
    annotation: &AnnotationTableModel,
    segmentation: &SegmentationTableModel,
    suffix: &str,
) -> ColumnsBySuffix {
    let mut annotation_columns = Vec::new();
    let mut segmentation_columns = Vec::new();

    for geom in &annotation.geometry_columns {
        let candidate = match suffix {
            "supervoxel_id" => geom.supervoxel_column_name(),
            "root_id" => geom.root_column_name(),
            other => format!("{}_{}", geom.prefix, other),
        };
        if segmentation.columns.iter().any(|c| {
            c.supervoxel_column == candidate || c.root_column == candidate
        }) {
            annotation_columns.push(geom.column_name.clone());
            segmentation_columns.push(candidate);
        }
    }

    ColumnsBySuffix {
        annotation_columns,
        segmentation_columns: segmentation_columns.clone(),
        target_columns: segmentation_columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_column_prefix_and_mapping() {
        let g = GeometryColumn::from_column_name("pre_pt_position").unwrap();
        assert_eq!(g.prefix, "pre_pt");
        assert_eq!(g.supervoxel_column_name(), "pre_pt_supervoxel_id");
        assert_eq!(g.root_column_name(), "pre_pt_root_id");
    }

    #[test]
    fn non_pt_prefix_gets_pt_inserted() {
        // matches spec.md §4.4 step 6: type tags that don't already end in
        // "pt" get "_pt_supervoxel_id" rather than "_supervoxel_id".
        let g = GeometryColumn {
            column_name: "anchor_position".to_string(),
            prefix: "anchor".to_string(),
        };
        assert_eq!(g.supervoxel_column_name(), "anchor_pt_supervoxel_id");
    }

    #[test]
    fn discovers_only_position_columns() {
        let model = AnnotationTableModel::from_discovered_columns(
            "synapse",
            ["id", "valid", "pre_pt_position", "post_pt_position", "size"],
        );
        assert_eq!(model.geometry_columns.len(), 2);
        assert_eq!(model.geometry_columns[0].prefix, "pre_pt");
        assert_eq!(model.geometry_columns[1].prefix, "post_pt");
    }

    #[test]
    fn restrict_to_existing_drops_unmatched_columns() {
        let anno = AnnotationTableModel::from_discovered_columns(
            "synapse",
            ["id", "valid", "pre_pt_position", "post_pt_position"],
        );
        let seg = SegmentationTableModel::for_annotation_model("synapse__pcg", &anno)
            .restrict_to_existing(&["id".into(), "pre_pt_supervoxel_id".into(), "pre_pt_root_id".into()]);
        assert_eq!(seg.columns.len(), 1);
        assert_eq!(seg.columns[0].prefix, "pre_pt");
    }

    #[test]
    fn columns_by_suffix_skips_missing_columns() {
        let anno = AnnotationTableModel::from_discovered_columns(
            "synapse",
            ["id", "valid", "pre_pt_position", "post_pt_position"],
        );
        let seg = SegmentationTableModel::for_annotation_model("synapse__pcg", &anno)
            .restrict_to_existing(&["id".into(), "pre_pt_supervoxel_id".into(), "pre_pt_root_id".into()]);
        let cols = columns_by_suffix(&anno, &seg, "supervoxel_id");
        assert_eq!(cols.annotation_columns, vec!["pre_pt_position".to_string()]);
        assert_eq!(cols.segmentation_columns, vec!["pre_pt_supervoxel_id".to_string()]);
    }

    #[test]
    fn from_segmentation_model_round_trips_columns_by_suffix() {
        let anno = AnnotationTableModel::from_discovered_columns("synapse", ["id", "valid", "pt_position"]);
        let seg = SegmentationTableModel::for_annotation_model("synapse__pcg", &anno)
            .restrict_to_existing(&["id".into(), "pt_supervoxel_id".into(), "pt_root_id".into()]);

        let pseudo_anno = AnnotationTableModel::from_segmentation_model(&seg);
        let cols = columns_by_suffix(&pseudo_anno, &seg, "root_id");
        assert_eq!(cols.segmentation_columns, vec!["pt_root_id".to_string()]);
    }
}
