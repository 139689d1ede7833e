//! Chunking Strategy (spec.md §4.1).
//!
//! Determines a 3D bounding box enclosing all spatial points, picks an edge
//! length from the estimated row count, and yields `(min_corner,
//! max_corner)` cuboids in a fixed `(z, y, x)` order. Grounded on the
//! original's `materializationengine/workflows/chunking.py`
//! `ChunkingStrategy` class (not in the retrieval pack's file list, but its
//! public surface — `create_chunk_generator`, `skip_to_index`,
//! `from_checkpoint`, `select_strategy`, `total_chunks` — is exercised
//! throughout `spatial_lookup.py`, reproduced verbatim above in §4.1/§4.7).

use std::fmt::Debug;

use data_types::{BoundingBox, Chunk, ChunkingStrategyTag, Point3};

/// spec.md §4.1 contract, realized as a trait object so `SingleChunkStrategy`
/// and `UniformCubeStrategy` are interchangeable behind one interface.
pub trait ChunkingStrategy: Debug + Send + Sync {
    fn tag(&self) -> ChunkingStrategyTag;
    fn bbox(&self) -> BoundingBox;
    fn used_chunk_size(&self) -> i64;
    fn total_chunks(&self) -> u64;

    /// spec.md §4.1: yields `(min_corner, max_corner)` in a fixed order.
    /// Returns an iterator rather than a materialized `Vec` so the >10M-row
    /// streaming requirement falls out of ordinary `Iterator` laziness
    /// (SPEC_FULL.md §4.1).
    fn create_chunk_generator(&self) -> Box<dyn Iterator<Item = Chunk> + Send>;

    /// spec.md §4.1: "`skip_to_index(n)` returns a generator positioned
    /// after the first `n` pairs". Must be exact (spec.md §8 property 2).
    fn skip_to_index(&self, n: u64) -> Box<dyn Iterator<Item = Chunk> + Send>;
}

/// < 100k estimated rows, or an empty bounding box: one chunk covering the
/// whole box, or zero chunks if the box has no volume (spec.md §4.1
/// "Failure: if the bounding box is empty, total_chunks = 0").
#[derive(Debug, Clone, Copy)]
pub struct SingleChunkStrategy {
    bbox: BoundingBox,
}

impl SingleChunkStrategy {
    pub fn new(bbox: BoundingBox) -> Self {
        Self { bbox }
    }
}

impl ChunkingStrategy for SingleChunkStrategy {
    fn tag(&self) -> ChunkingStrategyTag {
        ChunkingStrategyTag::SingleChunk
    }

    fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    fn used_chunk_size(&self) -> i64 {
        self.bbox.extent().x.max(self.bbox.extent().y).max(self.bbox.extent().z)
    }

    fn total_chunks(&self) -> u64 {
        if self.bbox.is_empty() {
            0
        } else {
            1
        }
    }

    fn create_chunk_generator(&self) -> Box<dyn Iterator<Item = Chunk> + Send> {
        if self.bbox.is_empty() {
            Box::new(std::iter::empty())
        } else {
            Box::new(std::iter::once(Chunk::new(0, self.bbox.min, self.bbox.max)))
        }
    }

    fn skip_to_index(&self, n: u64) -> Box<dyn Iterator<Item = Chunk> + Send> {
        Box::new(self.create_chunk_generator().skip(n as usize))
    }
}

/// 100k-10M rows (and, unchanged in Rust, >10M since the generator is
/// already lazy): uniform cubes of edge `used_chunk_size` nm, in
/// lexicographic `(z, y, x)` order (spec.md §4.1).
#[derive(Debug, Clone, Copy)]
pub struct UniformCubeStrategy {
    bbox: BoundingBox,
    chunk_size: i64,
    counts: Point3<i64>,
}

impl UniformCubeStrategy {
    pub fn new(bbox: BoundingBox, chunk_size: i64) -> Self {
        let extent = bbox.extent();
        let counts = if bbox.is_empty() {
            Point3::new(0, 0, 0)
        } else {
            extent.map(|e| ((e + chunk_size - 1) / chunk_size).max(1))
        };
        Self { bbox, chunk_size, counts }
    }

    /// `chunk_scale_factor` maps to an edge length of `chunk_scale_factor *
    /// 1024` nm (spec.md §4.1, §6 Configuration).
    pub fn from_scale_factor(bbox: BoundingBox, chunk_scale_factor: i64) -> Self {
        Self::new(bbox, chunk_scale_factor * 1024)
    }

    fn corner_for_index(&self, index: u64) -> Option<(Point3<i64>, Point3<i64>)> {
        if index >= self.total_chunks() {
            return None;
        }
        let (nx, ny, nz) = (self.counts.x as u64, self.counts.y as u64, self.counts.z as u64);
        // lexicographic by (z, y, x): x varies fastest.
        let ix = (index % nx) as i64;
        let iy = ((index / nx) % ny) as i64;
        let iz = (index / (nx * ny)) as i64;

        let min = Point3::new(
            self.bbox.min.x + ix * self.chunk_size,
            self.bbox.min.y + iy * self.chunk_size,
            self.bbox.min.z + iz * self.chunk_size,
        );
        let max = Point3::new(
            (min.x + self.chunk_size).min(self.bbox.max.x),
            (min.y + self.chunk_size).min(self.bbox.max.y),
            (min.z + self.chunk_size).min(self.bbox.max.z),
        );
        Some((min, max))
    }
}

impl ChunkingStrategy for UniformCubeStrategy {
    fn tag(&self) -> ChunkingStrategyTag {
        ChunkingStrategyTag::UniformCube
    }

    fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    fn used_chunk_size(&self) -> i64 {
        self.chunk_size
    }

    fn total_chunks(&self) -> u64 {
        (self.counts.x * self.counts.y * self.counts.z).max(0) as u64
    }

    fn create_chunk_generator(&self) -> Box<dyn Iterator<Item = Chunk> + Send> {
        self.skip_to_index(0)
    }

    fn skip_to_index(&self, n: u64) -> Box<dyn Iterator<Item = Chunk> + Send> {
        let strategy = *self;
        let total = strategy.total_chunks();
        Box::new((n..total).map(move |index| {
            let (min, max) = strategy
                .corner_for_index(index)
                .expect("index is bounded by total_chunks in the range above");
            Chunk::new(index, min, max)
        }))
    }
}
