//! Domain newtypes shared across every crate in this workspace: no
//! behaviour beyond small helpers and conversions lives here, only the
//! shapes every other crate agrees on.

#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

mod bbox;
mod chunk;
mod checkpoint;
mod materialization;
mod point;

pub use bbox::BoundingBox;
pub use chunk::{Chunk, ChunkIndex};
pub use checkpoint::{ChunkingStrategyTag, CheckpointRecord, WorkflowStatus};
pub use materialization::{MaterializationInfo, SegmentationMetadata};
pub use point::Point3;

/// The primary key of an annotation row / its paired segmentation row.
/// Monotonic and unique within a table, per spec.md's Annotation Row.
pub type AnnotationId = i64;

/// A supervoxel or root ID. The chunked graph and segmentation volume hand
/// these back as unsigned 64-bit integers; zero is the sentinel for
/// "not yet resolved" (spec.md §3, Segmentation Row invariant (b)).
pub type SegmentId = u64;
