use crate::AnnotationTableModel;

/// A small built-in registry of the schema tags this crate has seen in
/// practice, used to pre-populate an `AnnotationTableModel` before a table
/// has ever been introspected (e.g. when creating a brand-new segmentation
/// table, spec.md §4.7 step 3). Any tag not listed here falls back to
/// runtime discovery via `AnnotationTableModel::from_discovered_columns`,
/// which is always authoritative once a table exists.
pub fn known_schema_tags() -> Vec<(&'static str, AnnotationTableModel)> {
    vec![
        (
            "synapse",
            AnnotationTableModel::from_discovered_columns(
                "synapse",
                ["id", "valid", "pre_pt_position", "post_pt_position", "size"],
            ),
        ),
        (
            "cell_type_local",
            AnnotationTableModel::from_discovered_columns(
                "cell_type_local",
                ["id", "valid", "pt_position", "cell_type"],
            ),
        ),
        (
            "bound_tag",
            AnnotationTableModel::from_discovered_columns("bound_tag", ["id", "valid", "pt_position", "tag"]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synapse_has_two_geometry_columns() {
        let tags = known_schema_tags();
        let (_, synapse) = tags.iter().find(|(tag, _)| *tag == "synapse").unwrap();
        assert_eq!(synapse.geometry_columns.len(), 2);
    }
}
