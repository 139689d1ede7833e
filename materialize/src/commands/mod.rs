//! Subcommand implementations: one file per subcommand, each exposing a
//! `Config` (clap args) and a `command` entry point.

pub mod inspect_checkpoint;
pub mod run_ingest;
pub mod run_repair;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] crate::config::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Checkpoint(#[from] checkpoint_store::Error),

    #[error(transparent)]
    ModelFactory(#[from] spatial_lookup::model_factory::Error),

    #[error(transparent)]
    WorkflowDriver(#[from] spatial_lookup::workflow_driver::Error),

    #[error(transparent)]
    CompletionMonitor(#[from] spatial_lookup::completion_monitor::Error),

    #[error(transparent)]
    MissingRoots(#[from] spatial_lookup::missing_roots::Error),
}
