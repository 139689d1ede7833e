use crate::Point3;

/// A chunk's position in the deterministic total ordering the Chunking
/// Strategy produces (spec.md §4.1: "fixed order"). Zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkIndex(pub u64);

/// A cuboid in annotation space, processed as one task unit (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: ChunkIndex,
    pub min_corner: Point3<i64>,
    pub max_corner: Point3<i64>,
}

impl Chunk {
    pub fn new(index: u64, min_corner: Point3<i64>, max_corner: Point3<i64>) -> Self {
        Self {
            index: ChunkIndex(index),
            min_corner,
            max_corner,
        }
    }
}
