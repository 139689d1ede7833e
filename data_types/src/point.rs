use std::ops::{Div, Sub};

use serde::{Deserialize, Serialize};

/// A 3D coordinate. Used both for nanometer annotation positions (`f64`)
/// and for integer voxel/chunk coordinates (`i64`) — see spec.md §4.4 for
/// the scaling pipeline that turns one into the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Point3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T> Point3<T> {
    pub fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Point3<U> {
        Point3::new(f(self.x), f(self.y), f(self.z))
    }

    pub fn zip_with<U, V>(self, other: Point3<U>, mut f: impl FnMut(T, U) -> V) -> Point3<V> {
        Point3::new(f(self.x, other.x), f(self.y, other.y), f(self.z, other.z))
    }
}

impl Point3<f64> {
    /// `floor(self / scale)`, componentwise — the exact operation spec.md
    /// §4.4 step 2 requires to go from a physical point to the segmentation
    /// volume's scaled integer key.
    pub fn floor_div(self, scale: Point3<f64>) -> Point3<i64> {
        self.zip_with(scale, |p, s| (p / s).floor() as i64)
    }
}

impl Point3<i64> {
    pub fn as_f64(self) -> Point3<f64> {
        self.map(|v| v as f64)
    }
}

impl<T: Sub<Output = T> + Copy> Point3<T> {
    pub fn sub(self, other: Point3<T>) -> Point3<T> {
        self.zip_with(other, |a, b| a - b)
    }
}

impl<T: Div<Output = T> + Copy> Point3<T> {
    pub fn div(self, other: Point3<T>) -> Point3<T> {
        self.zip_with(other, |a, b| a / b)
    }
}

impl From<(f64, f64, f64)> for Point3<f64> {
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Self::new(x, y, z)
    }
}

impl From<(i64, i64, i64)> for Point3<i64> {
    fn from((x, y, z): (i64, i64, i64)) -> Self {
        Self::new(x, y, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_key_matches_s1_scenario() {
        // S1: pt=(10,20,30), coord_resolution=(4,4,40), seg resolution=(8,8,40)
        // => scale=(2,2,1), scaled=(5,10,30)
        let pt = Point3::new(10.0, 20.0, 30.0);
        let scale = Point3::new(2.0, 2.0, 1.0);
        assert_eq!(pt.floor_div(scale), Point3::new(5, 10, 30));
    }
}
