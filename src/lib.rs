pub mod cli;
pub mod config;
pub mod ledger;
pub mod models;
pub mod pipeline;

use std::sync::Arc;

use chrono::Local;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use pipeline::{
    CommandExtractor, CommandUploader, Reconciler, RunError, RunSummary, SnapshotRegistry,
};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}

/// Load the configuration, wire the production collaborators and run once.
pub fn run(cli: &Cli) -> Result<RunSummary, RunError> {
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = cli.load_config()?;
    config.validate()?;

    let catalog = Arc::new(config.payers.clone());
    let extractor = CommandExtractor::new(config.extractor.clone(), catalog);
    let registry = SnapshotRegistry::new(&config.task_snapshot);
    let mut uploader = CommandUploader::new(config.uploader.clone());

    let reconciler = Reconciler::new(&config, Box::new(extractor));
    reconciler.run(&registry, &mut uploader, Local::now())
}
