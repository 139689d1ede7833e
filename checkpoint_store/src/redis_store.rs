use chrono::Utc;
use data_types::{BoundingBox, CheckpointRecord, ChunkingStrategyTag, WorkflowStatus};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::str::FromStr;

use crate::{CheckpointStore, CheckpointUpdate, Error};

/// Redis-backed `CheckpointStore` (spec.md §4.2, §6 "Key-value store").
/// Grounded on the original's `RedisCheckpointManager`
/// (`materializationengine/blueprints/upload/checkpoint_manager.py`), which
/// keeps one Redis hash per `(database, table)` and uses `HINCRBY` for the
/// completed-chunk counter. This crate keeps that exact shape: a hash at
/// `checkpoint:{database}:{table}`, atomic `HINCRBY` on `completed_chunks`,
/// plain `HSET` for every other field.
#[derive(Debug, Clone)]
pub struct RedisCheckpointStore {
    conn: ConnectionManager,
}

impl RedisCheckpointStore {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    fn key(database: &str, table: &str) -> String {
        format!("checkpoint:{database}:{table}")
    }
}

#[async_trait::async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn initialize(&self, database: &str, table: &str, task_id: &str) -> Result<CheckpointRecord, Error> {
        let mut conn = self.conn.clone();
        let key = Self::key(database, table);

        // create-if-absent: a hash already present for this (database,
        // table) means a resumed run, so only `task_id`/`status` are
        // touched here — `completed_chunks` and the chunking strategy
        // fields must survive (spec.md §3, §8 S2).
        if let Some(mut existing) = self.get(database, table).await? {
            existing.task_id = task_id.to_string();
            existing.status = WorkflowStatus::Initializing;
            let fields = vec![
                ("task_id".to_string(), existing.task_id.clone()),
                ("status".to_string(), existing.status.as_str().to_string()),
            ];
            let _: () = conn.hset_multiple(&key, &fields).await?;
            return Ok(existing);
        }

        let record = CheckpointRecord::new(table, task_id);
        let fields = record_to_fields(&record);
        let _: () = conn.hset_multiple(&key, &fields).await?;
        Ok(record)
    }

    async fn update(&self, database: &str, table: &str, update: CheckpointUpdate) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let key = Self::key(database, table);
        let fields = update_to_fields(&update);
        if !fields.is_empty() {
            let _: () = conn.hset_multiple(&key, &fields).await?;
        }
        Ok(())
    }

    async fn increment_completed(&self, database: &str, table: &str, _rows_processed: u64) -> Result<u64, Error> {
        let mut conn = self.conn.clone();
        let key = Self::key(database, table);
        let new_value: u64 = conn.hincr(&key, "completed_chunks", 1i64).await?;
        Ok(new_value)
    }

    async fn get(&self, database: &str, table: &str) -> Result<Option<CheckpointRecord>, Error> {
        let mut conn = self.conn.clone();
        let key = Self::key(database, table);
        let fields: std::collections::HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        fields_to_record(database, table, &fields).map(Some)
    }
}

fn record_to_fields(record: &CheckpointRecord) -> Vec<(String, String)> {
    let mut fields = vec![
        ("table_name".to_string(), record.table_name.clone()),
        ("task_id".to_string(), record.task_id.clone()),
        ("status".to_string(), record.status.as_str().to_string()),
        ("total_chunks".to_string(), record.total_chunks.to_string()),
        ("completed_chunks".to_string(), record.completed_chunks.to_string()),
        (
            "index_rebuild_complete".to_string(),
            record.index_rebuild_complete.to_string(),
        ),
        ("created_at".to_string(), record.created_at.to_rfc3339()),
    ];
    if let Some(bbox) = record.min_enclosing_bbox {
        fields.push((
            "min_enclosing_bbox".to_string(),
            serde_json::to_string(&bbox).expect("BoundingBox is always serializable"),
        ));
    }
    if let Some(tag) = record.chunking_strategy_tag {
        fields.push(("chunking_strategy_tag".to_string(), tag.as_str().to_string()));
    }
    if let Some(v) = record.used_chunk_size {
        fields.push(("used_chunk_size".to_string(), v.to_string()));
    }
    if let Some(v) = record.total_row_estimate {
        fields.push(("total_row_estimate".to_string(), v.to_string()));
    }
    if let Some(v) = record.total_time_seconds {
        fields.push(("total_time_seconds".to_string(), v.to_string()));
    }
    if let Some(v) = &record.last_error {
        fields.push(("last_error".to_string(), v.clone()));
    }
    fields
}

fn update_to_fields(update: &CheckpointUpdate) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    if let Some(status) = update.status {
        fields.push(("status".to_string(), status.as_str().to_string()));
    }
    if let Some(bbox) = update.min_enclosing_bbox {
        fields.push((
            "min_enclosing_bbox".to_string(),
            serde_json::to_string(&bbox).expect("BoundingBox is always serializable"),
        ));
    }
    if let Some(v) = update.total_chunks {
        fields.push(("total_chunks".to_string(), v.to_string()));
    }
    if let Some(tag) = update.chunking_strategy_tag {
        fields.push(("chunking_strategy_tag".to_string(), tag.as_str().to_string()));
    }
    if let Some(v) = update.used_chunk_size {
        fields.push(("used_chunk_size".to_string(), v.to_string()));
    }
    if let Some(v) = update.total_row_estimate {
        fields.push(("total_row_estimate".to_string(), v.to_string()));
    }
    if let Some(v) = update.total_time_seconds {
        fields.push(("total_time_seconds".to_string(), v.to_string()));
    }
    if let Some(v) = &update.last_error {
        fields.push(("last_error".to_string(), v.clone()));
    }
    if let Some(v) = update.index_rebuild_complete {
        fields.push(("index_rebuild_complete".to_string(), v.to_string()));
    }
    fields
}

fn fields_to_record(
    database: &str,
    table: &str,
    fields: &std::collections::HashMap<String, String>,
) -> Result<CheckpointRecord, Error> {
    let malformed = |reason: String| Error::Malformed {
        database: database.to_string(),
        table: table.to_string(),
        reason,
    };

    let status = fields
        .get("status")
        .map(|s| WorkflowStatus::from_str(s))
        .transpose()
        .map_err(malformed)?
        .unwrap_or(WorkflowStatus::Initializing);

    let min_enclosing_bbox = fields
        .get("min_enclosing_bbox")
        .map(|s| serde_json::from_str::<BoundingBox>(s))
        .transpose()
        .map_err(|e| malformed(e.to_string()))?;

    let chunking_strategy_tag = fields
        .get("chunking_strategy_tag")
        .map(|s| ChunkingStrategyTag::from_str(s))
        .transpose()
        .map_err(malformed)?;

    Ok(CheckpointRecord {
        table_name: fields.get("table_name").cloned().unwrap_or_else(|| table.to_string()),
        task_id: fields.get("task_id").cloned().unwrap_or_default(),
        status,
        min_enclosing_bbox,
        total_chunks: parse_or(fields.get("total_chunks"), 0)?,
        completed_chunks: parse_or(fields.get("completed_chunks"), 0)?,
        chunking_strategy_tag,
        used_chunk_size: parse_opt(fields.get("used_chunk_size"))?,
        total_row_estimate: parse_opt(fields.get("total_row_estimate"))?,
        total_time_seconds: parse_opt(fields.get("total_time_seconds"))?,
        last_error: fields.get("last_error").cloned(),
        index_rebuild_complete: fields
            .get("index_rebuild_complete")
            .map(|s| s == "true")
            .unwrap_or(false),
        created_at: fields
            .get("created_at")
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
    })
}

fn parse_or<T: FromStr>(value: Option<&String>, default: T) -> Result<T, Error> {
    match value {
        Some(s) => s
            .parse()
            .map_err(|_| Error::Malformed {
                database: String::new(),
                table: String::new(),
                reason: format!("could not parse {s:?}"),
            }),
        None => Ok(default),
    }
}

fn parse_opt<T: FromStr>(value: Option<&String>) -> Result<Option<T>, Error> {
    match value {
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| Error::Malformed {
                database: String::new(),
                table: String::new(),
                reason: format!("could not parse {s:?}"),
            }),
        None => Ok(None),
    }
}
