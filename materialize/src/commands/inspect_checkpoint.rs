//! `materialize inspect-checkpoint`: reads and prints a table's checkpoint
//! record (spec.md §4.2 `get`), for operators checking on an in-flight or
//! stalled workflow.

use checkpoint_store::{CheckpointStore, RedisCheckpointStore};

use crate::commands::Result;
use crate::config::ConnectionConfig;

#[derive(Debug, clap::Args)]
pub struct Config {
    /// Database (aligned volume) the checkpoint was recorded under.
    #[clap(long)]
    pub database: String,

    /// Annotation table name the checkpoint tracks.
    #[clap(long)]
    pub table_name: String,

    #[clap(flatten)]
    pub connection: ConnectionConfig,
}

pub async fn command(config: Config) -> Result<()> {
    let checkpoint = RedisCheckpointStore::connect(&config.connection.redis_url).await?;
    match checkpoint.get(&config.database, &config.table_name).await? {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record).expect("CheckpointRecord is always serializable"));
        }
        None => {
            println!("no checkpoint found for {}/{}", config.database, config.table_name);
        }
    }
    Ok(())
}
