//! External collaborator clients (spec.md §6): the relational store's
//! connection pool cache, the segmentation-volume client, and the
//! chunked-graph client. Every client here is a process-wide cache keyed by
//! source URL, created lazily and safe for concurrent readers (spec.md §5,
//! §9 "Global client caches").

#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

pub mod chunked_graph;
pub mod db;
pub mod segmentation_volume;

pub use chunked_graph::ChunkedGraphClient;
pub use db::DbPoolCache;
pub use segmentation_volume::SegmentationVolume;
