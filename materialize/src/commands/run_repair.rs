//! `materialize run-repair`: the Missing-Roots Repair entry point
//! (spec.md §4.9, SPEC_FULL.md §14), run standalone against an existing
//! segmentation table.

use std::sync::Arc;

use chrono::Utc;
use external_clients::{cached_http_client, DbPoolCache};

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
    let pool = pool_cache
        .get(&mat_info.database)
        .await
        .map_err(|external_clients::db::Error::Connect { source, .. }| crate::commands::Error::Database(source))?;

    let graph = cached_http_client(&connection.chunked_graph_base_url, &mat_info.pcg_table_name);
    let task_queue: Arc<dyn task_runtime::TaskQueue> = Arc::new(task_runtime::InProcessTaskQueue::new());

    let annotation_model = spatial_lookup::model_factory::introspect_annotation_model(&pool, &mat_info.annotation_table_name).await?;
    let (segmentation_model, _created) =
        spatial_lookup::model_factory::ensure_segmentation_table(&pool, &mat_info, &annotation_model).await?;

    spatial_lookup::missing_roots::run_repair_workflow(&pool, graph, task_queue, mat_info, segmentation_model).await?;

    Ok(())
}
