//! Spatial-lookup and segmentation-ingest pipeline core.
//!
//! Materializes point annotations against a time-evolving chunked-graph
//! segmentation: for each annotation row holding a 3D spatial point,
//! determines the supervoxel covering that point and the current root ID
//! at a chosen timestamp, persists the result into a segmentation table,
//! and keeps it consistent as annotations are added and root IDs change.
//! Two workflows share this core: full ingest and root-ID repair.

#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

pub mod chunking;
pub mod completion_monitor;
pub mod missing_roots;
pub mod model_factory;
pub mod point_wkb;
pub mod root_id_resolver;
pub mod spatial_query;
pub mod supervoxel_resolver;
pub mod upsert;
pub mod workflow_driver;

#[cfg(test)]
mod end_to_end_tests;
