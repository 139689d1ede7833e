//! Segmentation volume client (spec.md §6): the remote object-store backed
//! volume the Supervoxel Resolver calls into. Grounded on the original's
//! `cloudvolume.CloudVolume` usage in
//! `materializationengine/workflows/spatial_lookup.py` (`cv.resolution`,
//! `cv.voxel_offset`, `cv.graph_chunk_size`, `cv.watershed_mip`,
//! `cv.scattered_points`).

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use data_types::{Point3, SegmentId};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("segmentation volume request to {source} failed: {message}")]
    Request { source: String, message: String },
}

/// spec.md §6 "Segmentation volume" external interface.
#[async_trait]
pub trait SegmentationVolume: Debug + Send + Sync {
    /// Nanometers per voxel at the given mip level.
    async fn resolution(&self, mip: u32) -> Result<Point3<f64>, Error>;

    async fn voxel_offset(&self, mip: u32) -> Result<Point3<i64>, Error>;

    async fn graph_chunk_size(&self) -> Result<Point3<i64>, Error>;

    async fn watershed_mip(&self) -> Result<u32, Error>;

    /// Scattered-point supervoxel lookup, spec.md §4.4 step 4: given
    /// physical `points` and the annotation table's `coord_resolution`,
    /// returns a map from the point's *scaled* voxel-space key to its
    /// supervoxel ID.
    async fn scattered_points(
        &self,
        points: &[Point3<f64>],
        coord_resolution: Point3<f64>,
    ) -> Result<HashMap<Point3<i64>, SegmentId>, Error>;
}

/// HTTP-backed implementation, talking to a CloudVolume-compatible
/// info-server endpoint over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpSegmentationVolume {
    source: String,
    client: reqwest::Client,
}

impl HttpSegmentationVolume {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            client: reqwest::Client::new(),
        }
    }

    fn err(&self, message: impl Into<String>) -> Error {
        Error::Request {
            source: self.source.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl SegmentationVolume for HttpSegmentationVolume {
    async fn resolution(&self, mip: u32) -> Result<Point3<f64>, Error> {
        #[derive(serde::Deserialize)]
        struct Resp {
            resolution: [f64; 3],
        }
        let url = format!("{}/info/resolution/{}", self.source, mip);
        let resp: Resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.err(e.to_string()))?
            .json()
            .await
            .map_err(|e| self.err(e.to_string()))?;
        Ok(Point3::new(resp.resolution[0], resp.resolution[1], resp.resolution[2]))
    }

    async fn voxel_offset(&self, mip: u32) -> Result<Point3<i64>, Error> {
        #[derive(serde::Deserialize)]
        struct Resp {
            voxel_offset: [i64; 3],
        }
        let url = format!("{}/info/voxel_offset/{}", self.source, mip);
        let resp: Resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.err(e.to_string()))?
            .json()
            .await
            .map_err(|e| self.err(e.to_string()))?;
        Ok(Point3::new(resp.voxel_offset[0], resp.voxel_offset[1], resp.voxel_offset[2]))
    }

    async fn graph_chunk_size(&self) -> Result<Point3<i64>, Error> {
        #[derive(serde::Deserialize)]
        struct Resp {
            graph_chunk_size: [i64; 3],
        }
        let url = format!("{}/info/graph_chunk_size", self.source);
        let resp: Resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.err(e.to_string()))?
            .json()
            .await
            .map_err(|e| self.err(e.to_string()))?;
        Ok(Point3::new(
            resp.graph_chunk_size[0],
            resp.graph_chunk_size[1],
            resp.graph_chunk_size[2],
        ))
    }

    async fn watershed_mip(&self) -> Result<u32, Error> {
        #[derive(serde::Deserialize)]
        struct Resp {
            watershed_mip: u32,
        }
        let url = format!("{}/info/watershed_mip", self.source);
        let resp: Resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.err(e.to_string()))?
            .json()
            .await
            .map_err(|e| self.err(e.to_string()))?;
        Ok(resp.watershed_mip)
    }

    async fn scattered_points(
        &self,
        points: &[Point3<f64>],
        coord_resolution: Point3<f64>,
    ) -> Result<HashMap<Point3<i64>, SegmentId>, Error> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            points: &'a [[f64; 3]],
            coord_resolution: [f64; 3],
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            // (x, y, z, supervoxel_id) tuples, since a JSON object can't key
            // on a composite point.
            results: Vec<(i64, i64, i64, u64)>,
        }
        let flat: Vec<[f64; 3]> = points.iter().map(|p| [p.x, p.y, p.z]).collect();
        let url = format!("{}/scattered_points", self.source);
        let resp: Resp = self
            .client
            .post(&url)
            .json(&Req {
                points: &flat,
                coord_resolution: [coord_resolution.x, coord_resolution.y, coord_resolution.z],
            })
            .send()
            .await
            .map_err(|e| self.err(e.to_string()))?
            .json()
            .await
            .map_err(|e| self.err(e.to_string()))?;
        Ok(resp
            .results
            .into_iter()
            .map(|(x, y, z, sv)| (Point3::new(x, y, z), sv))
            .collect())
    }
}

/// In-memory mock, keyed by the exact `scaled` key the caller will look up
/// (spec.md §8 property 5, "scaled-key round trip").
#[derive(Debug, Clone, Default)]
pub struct InMemorySegmentationVolume {
    pub resolution_by_mip: HashMap<u32, Point3<f64>>,
    pub voxel_offset_by_mip: HashMap<u32, Point3<i64>>,
    pub graph_chunk_size: Point3<i64>,
    pub watershed_mip: u32,
    pub scattered: Arc<Mutex<HashMap<Point3<i64>, SegmentId>>>,
}

impl InMemorySegmentationVolume {
    pub fn new(resolution: Point3<f64>) -> Self {
        let mut resolution_by_mip = HashMap::new();
        resolution_by_mip.insert(0, resolution);
        Self {
            resolution_by_mip,
            voxel_offset_by_mip: HashMap::new(),
            graph_chunk_size: Point3::new(64, 64, 64),
            watershed_mip: 0,
            scattered: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn seed(&self, key: Point3<i64>, supervoxel_id: SegmentId) {
        self.scattered.lock().insert(key, supervoxel_id);
    }
}

#[async_trait]
impl SegmentationVolume for InMemorySegmentationVolume {
    async fn resolution(&self, mip: u32) -> Result<Point3<f64>, Error> {
        Ok(self
            .resolution_by_mip
            .get(&mip)
            .copied()
            .unwrap_or_else(|| Point3::new(1.0, 1.0, 1.0)))
    }

    async fn voxel_offset(&self, mip: u32) -> Result<Point3<i64>, Error> {
        Ok(self.voxel_offset_by_mip.get(&mip).copied().unwrap_or_default())
    }

    async fn graph_chunk_size(&self) -> Result<Point3<i64>, Error> {
        Ok(self.graph_chunk_size)
    }

    async fn watershed_mip(&self) -> Result<u32, Error> {
        Ok(self.watershed_mip)
    }

    async fn scattered_points(
        &self,
        points: &[Point3<f64>],
        coord_resolution: Point3<f64>,
    ) -> Result<HashMap<Point3<i64>, SegmentId>, Error> {
        let resolution = self.resolution(0).await?;
        let scale = resolution.div(coord_resolution);
        let table = self.scattered.lock();
        let mut out = HashMap::new();
        for p in points {
            let key = p.floor_div(scale);
            if let Some(sv) = table.get(&key) {
                out.insert(key, *sv);
            }
        }
        Ok(out)
    }
}

/// Process-wide cache of segmentation-volume clients, keyed by source URL
/// (spec.md §5 "Global client caches"; §9 "created lazily, thread-safe for
/// concurrent readers").
static VOLUME_CACHE: Lazy<Mutex<HashMap<String, Arc<dyn SegmentationVolume>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub fn cached_http_volume(source: &str) -> Arc<dyn SegmentationVolume> {
    let mut cache = VOLUME_CACHE.lock();
    cache
        .entry(source.to_string())
        .or_insert_with(|| Arc::new(HttpSegmentationVolume::new(source)))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scattered_points_matches_s1_scenario() {
        // S1: pt=(10,20,30), coord_resolution=(4,4,40), seg resolution=(8,8,40)
        // => scale=(2,2,1), scaled=(5,10,30), scattered_points returns {(5,10,30): 111}
        let volume = InMemorySegmentationVolume::new(Point3::new(8.0, 8.0, 40.0));
        volume.seed(Point3::new(5, 10, 30), 111);

        let result = volume
            .scattered_points(&[Point3::new(10.0, 20.0, 30.0)], Point3::new(4.0, 4.0, 40.0))
            .await
            .unwrap();
        assert_eq!(result.get(&Point3::new(5, 10, 30)), Some(&111));
    }
}
