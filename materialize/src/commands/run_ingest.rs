//! `materialize run-ingest`: wires every collaborator crate together and
//! runs one full Workflow Driver pass (spec.md §4.7), then starts the
//! Completion Monitor (spec.md §4.8) as a background task.

use std::sync::Arc;

use chrono::Utc;
use external_clients::{cached_http_client, cached_http_volume, DbPoolCache};
use observability_deps::tracing::info;
use spatial_lookup::{model_factory, workflow_driver};

use crate::commands::Result;
use crate::config::{ConnectionConfig, DatastackInfoFile, WorkflowConfig};

#[derive(Debug, clap::Args)]
pub struct Config {
    #[clap(flatten)]
    pub workflow: WorkflowConfig,

    #[clap(flatten)]
    pub connection: ConnectionConfig,
}

pub async fn command(config: Config) -> Result<()> {
    let Config { workflow, connection } = config;

    let datastack = DatastackInfoFile::load(&workflow.datastack_info)?;
    let mat_info = datastack.into_materialization_info(workflow.table_name.clone(), Utc::now());

    let db_base_url = workflow.database_url(&connection).to_string();
    let pool_cache = DbPoolCache::new(db_base_url);
    let pool = pool_cache.get(&mat_info.database).await.map_err(sqlx_connect_err)?;

    let volume = cached_http_volume(&connection.segmentation_volume_base_url);
    let graph = cached_http_client(&connection.chunked_graph_base_url, &mat_info.pcg_table_name);
    let checkpoint: Arc<dyn checkpoint_store::CheckpointStore> =
        Arc::new(checkpoint_store::RedisCheckpointStore::connect(&connection.redis_url).await?);
    let task_queue: Arc<dyn task_runtime::TaskQueue> = Arc::new(task_runtime::InProcessTaskQueue::new());

    let annotation_model = model_factory::introspect_annotation_model(&pool, &mat_info.annotation_table_name).await?;
    let (segmentation_model, created) = model_factory::ensure_segmentation_table(&pool, &mat_info, &annotation_model).await?;
    if created {
        info!(table = %mat_info.segmentation_table_name, "segmentation table created");
    }

    let task_id = uuid::Uuid::new_v4().to_string();

    workflow_driver::run_ingest_workflow(
        &pool,
        volume,
        graph,
        checkpoint.clone(),
        task_queue.clone(),
        mat_info.clone(),
        workflow.chunk_scale_factor,
        workflow.supervoxel_batch_size,
        workflow.resume_from_checkpoint,
        workflow.throttle_threshold,
        &task_id,
    )
    .await?;

    // step 7: the Completion Monitor runs concurrently with submission,
    // not after it, so it is spawned rather than awaited inline.
    let monitor_pool = pool.clone();
    tokio::spawn(async move {
        if let Err(e) = spatial_lookup::completion_monitor::run(
            &monitor_pool,
            checkpoint.as_ref(),
            task_queue.as_ref(),
            &mat_info,
            &segmentation_model,
        )
        .await
        {
            observability_deps::tracing::error!(error = %e, "completion monitor exited with an error");
        }
    });

    Ok(())
}

fn sqlx_connect_err(e: external_clients::db::Error) -> crate::commands::Error {
    crate::commands::Error::Database(match e {
        external_clients::db::Error::Connect { source, .. } => source,
    })
}
