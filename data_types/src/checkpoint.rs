use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BoundingBox;

/// Lifecycle status of a per-table checkpoint, spec.md §3 Checkpoint Record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Initializing,
    Processing,
    Submitted,
    Completed,
    Error,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Processing => "processing",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(Self::Initializing),
            "processing" => Ok(Self::Processing),
            "submitted" => Ok(Self::Submitted),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown workflow status: {other}")),
        }
    }
}

/// Which `ChunkingStrategy` implementation produced a checkpoint's chunk
/// plan, so a resumed run can reconstruct the same strategy (spec.md §4.7
/// step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategyTag {
    SingleChunk,
    UniformCube,
}

impl std::str::FromStr for ChunkingStrategyTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single_chunk" => Ok(Self::SingleChunk),
            "uniform_cube" => Ok(Self::UniformCube),
            other => Err(format!("unknown chunking strategy: {other}")),
        }
    }
}

impl ChunkingStrategyTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleChunk => "single_chunk",
            Self::UniformCube => "uniform_cube",
        }
    }
}

/// One record per `(database, table)`, spec.md §3 Checkpoint Record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub table_name: String,
    pub task_id: String,
    pub status: WorkflowStatus,
    pub min_enclosing_bbox: Option<BoundingBox>,
    pub total_chunks: u64,
    pub completed_chunks: u64,
    pub chunking_strategy_tag: Option<ChunkingStrategyTag>,
    pub used_chunk_size: Option<i64>,
    pub total_row_estimate: Option<u64>,
    pub total_time_seconds: Option<f64>,
    pub last_error: Option<String>,
    pub index_rebuild_complete: bool,
    pub created_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// A freshly-initialized checkpoint, spec.md §4.2 `initialize`.
    pub fn new(table_name: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            task_id: task_id.into(),
            status: WorkflowStatus::Initializing,
            min_enclosing_bbox: None,
            total_chunks: 0,
            completed_chunks: 0,
            chunking_strategy_tag: None,
            used_chunk_size: None,
            total_row_estimate: None,
            total_time_seconds: None,
            last_error: None,
            index_rebuild_complete: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total_chunks > 0 && self.completed_chunks >= self.total_chunks
    }
}
