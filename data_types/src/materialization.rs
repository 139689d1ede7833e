use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Point3;

/// Immutable-during-a-run metadata for a single table's materialization,
/// spec.md §3. Threaded through every component instead of each one
/// re-deriving table/database names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializationInfo {
    pub database: String,
    pub aligned_volume: String,
    pub annotation_table_name: String,
    pub segmentation_table_name: String,
    pub schema_tag: String,
    pub pcg_table_name: String,
    pub segmentation_source: String,
    pub coord_resolution: Point3<f64>,
    pub materialization_timestamp: DateTime<Utc>,
    pub throttle_queues: bool,
}

impl MaterializationInfo {
    /// spec.md §6: "Segmentation table name equals
    /// `{annotation_table}__{pcg_table_name}`".
    pub fn derive_segmentation_table_name(annotation_table_name: &str, pcg_table_name: &str) -> String {
        format!("{annotation_table_name}__{pcg_table_name}")
    }
}

/// Row written once when a segmentation table is first created, so later
/// runs can tell it already exists without re-querying `information_schema`
/// (spec.md §9 design note on dynamic schemas; grounded on
/// `original_source`'s `create_missing_segmentation_table`, which checks
/// this exact row before creating the table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationMetadata {
    pub annotation_table: String,
    pub schema_type: String,
    pub table_name: String,
    pub valid: bool,
    pub created: DateTime<Utc>,
    pub pcg_table_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segmentation_table_naming() {
        assert_eq!(
            MaterializationInfo::derive_segmentation_table_name("synapse", "pcg_vnc1"),
            "synapse__pcg_vnc1"
        );
    }
}
