//! Workflow configuration (SPEC_FULL.md §10). A `clap::Parser`/`clap::Args`
//! struct with `env` fallback per field, parsed once at binary startup and
//! threaded through every subcommand.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use data_types::{MaterializationInfo, Point3};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read datastack info file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse datastack info file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// spec.md §6 "Configuration": per-workflow parameters. The HTTP
/// datastack-info lookup is out of scope (spec.md non-goals), so
/// `datastack_info` names a local JSON file instead (SPEC_FULL.md §10).
#[derive(Debug, Clone, clap::Args)]
pub struct WorkflowConfig {
    /// Path to a JSON file describing the materialization info that would
    /// otherwise come from the datastack-info HTTP service.
    #[clap(long, env = "MATERIALIZE_DATASTACK_INFO")]
    pub datastack_info: PathBuf,

    /// Annotation table to run this workflow on.
    #[clap(long, env = "MATERIALIZE_TABLE_NAME")]
    pub table_name: String,

    #[clap(long, env = "MATERIALIZE_CHUNK_SCALE_FACTOR", default_value = "1")]
    pub chunk_scale_factor: i64,

    #[clap(long, env = "MATERIALIZE_SUPERVOXEL_BATCH_SIZE", default_value = "50")]
    pub supervoxel_batch_size: usize,

    #[clap(long, env = "MATERIALIZE_GET_ROOT_IDS", default_value = "true")]
    pub get_root_ids: bool,

    #[clap(long, env = "MATERIALIZE_UPLOAD_TO_DATABASE", default_value = "true")]
    pub upload_to_database: bool,

    #[clap(long, env = "MATERIALIZE_USE_STAGING_DATABASE", default_value = "false")]
    pub use_staging_database: bool,

    #[clap(long, env = "MATERIALIZE_RESUME_FROM_CHECKPOINT", default_value = "true")]
    pub resume_from_checkpoint: bool,

    /// Caps the `process` queue's in-flight length during submission; set
    /// only when `throttle_queues` is enabled for this datastack (spec.md
    /// §4.7 step 6). `None` disables throttling.
    #[clap(long, env = "MATERIALIZE_THROTTLE_THRESHOLD")]
    pub throttle_threshold: Option<usize>,
}

/// Ambient connection configuration, env-only since it names no parameter
/// in spec.md §6 (SPEC_FULL.md §10: "additional env-only ambient config,
/// not named by spec.md but required for any runnable binary").
#[derive(Debug, Clone, clap::Args)]
pub struct ConnectionConfig {
    #[clap(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[clap(long, env = "STAGING_DATABASE_URL")]
    pub staging_database_url: Option<String>,

    #[clap(long, env = "REDIS_URL")]
    pub redis_url: String,

    #[clap(long, env = "SEGMENTATION_VOLUME_BASE_URL")]
    pub segmentation_volume_base_url: String,

    #[clap(long, env = "CHUNKED_GRAPH_BASE_URL")]
    pub chunked_graph_base_url: String,
}

impl WorkflowConfig {
    pub fn database_url<'a>(&self, connection: &'a ConnectionConfig) -> &'a str {
        if self.use_staging_database {
            connection
                .staging_database_url
                .as_deref()
                .unwrap_or(&connection.database_url)
        } else {
            &connection.database_url
        }
    }
}

/// Deserialized shape of the `datastack_info` JSON file (SPEC_FULL.md §10).
#[derive(Debug, Clone, Deserialize)]
pub struct DatastackInfoFile {
    pub database: String,
    pub aligned_volume: String,
    pub schema_tag: String,
    pub pcg_table_name: String,
    pub segmentation_source: String,
    pub coord_resolution: [f64; 3],
    #[serde(default)]
    pub throttle_queues: bool,
}

impl DatastackInfoFile {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds the `MaterializationInfo` threaded through every component,
    /// timestamped at the moment this workflow run starts (spec.md §4.7
    /// step 1: "timestamp workflow start").
    pub fn into_materialization_info(self, table_name: String, materialization_timestamp: DateTime<Utc>) -> MaterializationInfo {
        let segmentation_table_name = MaterializationInfo::derive_segmentation_table_name(&table_name, &self.pcg_table_name);
        MaterializationInfo {
            database: self.database,
            aligned_volume: self.aligned_volume,
            annotation_table_name: table_name,
            segmentation_table_name,
            schema_tag: self.schema_tag,
            pcg_table_name: self.pcg_table_name,
            segmentation_source: self.segmentation_source,
            coord_resolution: Point3::new(self.coord_resolution[0], self.coord_resolution[1], self.coord_resolution[2]),
            materialization_timestamp,
            throttle_queues: self.throttle_queues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_datastack_info() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("materialize-test-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{
                "database": "minnie65",
                "aligned_volume": "minnie65_phase3",
                "schema_tag": "synapse",
                "pcg_table_name": "minnie3_v1",
                "segmentation_source": "precomputed://gs://bucket/seg",
                "coord_resolution": [4.0, 4.0, 40.0]
            }"#,
        )
        .unwrap();

        let info = DatastackInfoFile::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(info.database, "minnie65");
        assert_eq!(info.coord_resolution, [4.0, 4.0, 40.0]);
        assert!(!info.throttle_queues);

        let mat_info = info.into_materialization_info("synapse".to_string(), Utc::now());
        assert_eq!(mat_info.segmentation_table_name, "synapse__minnie3_v1");
    }
}
