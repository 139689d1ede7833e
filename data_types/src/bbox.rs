use serde::{Deserialize, Serialize};

use crate::Point3;

/// A min/max enclosing box over annotation positions, in nanometers.
/// Corners are integral — spec.md §3 defines `min_enclosing_bbox` as a
/// `2x3 int` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point3<i64>,
    pub max: Point3<i64>,
}

impl BoundingBox {
    pub fn new(min: Point3<i64>, max: Point3<i64>) -> Self {
        Self { min, max }
    }

    /// An empty box has no volume on at least one axis. spec.md §4.1:
    /// "if the bounding box is empty, total_chunks = 0".
    pub fn is_empty(&self) -> bool {
        self.min.x >= self.max.x || self.min.y >= self.max.y || self.min.z >= self.max.z
    }

    pub fn extent(&self) -> Point3<i64> {
        self.max.sub(self.min)
    }

    /// Does `point` lie strictly inside this box (half-open: `[min, max)`
    /// on every axis)? This is the predicate spec.md §8 property 4 (union-
    /// select coverage) requires chunk membership to satisfy exactly once.
    pub fn contains_half_open(&self, point: Point3<i64>) -> bool {
        point.x >= self.min.x
            && point.x < self.max.x
            && point.y >= self.min.y
            && point.y < self.max.y
            && point.z >= self.min.z
            && point.z < self.max.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_when_degenerate() {
        let bbox = BoundingBox::new(Point3::new(0, 0, 0), Point3::new(0, 5, 5));
        assert!(bbox.is_empty());
    }

    #[test]
    fn half_open_containment() {
        let bbox = BoundingBox::new(Point3::new(0, 0, 0), Point3::new(10, 10, 10));
        assert!(bbox.contains_half_open(Point3::new(0, 0, 0)));
        assert!(!bbox.contains_half_open(Point3::new(10, 0, 0)));
        assert!(bbox.contains_half_open(Point3::new(9, 9, 9)));
    }
}
