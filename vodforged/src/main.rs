use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vodforge_core::{
    load_vodforge_config, ControlEndpoint, ExecutionTracker, FsObjectStorage, MediaPipeline,
    ObjectStorage, QueueDrain, RecordingQueueStore, Scheduler, Sweeper,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "vodforge recording pipeline daemon", long_about = None)]
struct Cli {
    /// Path to vodforge.toml
    #[arg(long, default_value = "configs/vodforge.toml")]
    config: PathBuf,
}

#[derive(Debug, Error)]
enum DaemonError {
    #[error("config error: {0}")]
    Config(#[from] vodforge_core::ConfigError),
    #[error("queue error: {0}")]
    Queue(#[from] vodforge_core::QueueError),
    #[error("control error: {0}")]
    Control(#[from] vodforge_core::ControlError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), DaemonError> {
    let config = load_vodforge_config(&cli.config)?;
    std::fs::create_dir_all(&config.paths.data_dir)?;
    std::fs::create_dir_all(&config.paths.work_dir)?;

    let database = config.database_path();
    let store = RecordingQueueStore::builder().path(&database).build()?;
    store.initialize()?;
    let tracker = ExecutionTracker::new(&database);

    let pipeline = Arc::new(MediaPipeline::new(&config.media, None));
    let storage: Arc<dyn ObjectStorage> = Arc::new(FsObjectStorage::new(&config.storage.root));
    let drain = QueueDrain::new(
        store.clone(),
        pipeline,
        storage,
        &config.paths.work_dir,
        config.recording.proximity_threshold_ms,
    );
    let sweeper = Sweeper::new(store.clone());

    let mut scheduler = Scheduler::new(store, tracker);
    let every = Duration::from_secs(config.jobs.interval_seconds);
    scheduler.register(Arc::new(drain), every);
    scheduler.register(Arc::new(sweeper), every);
    let scheduler = Arc::new(scheduler);

    info!(
        node = %config.system.node_name,
        environment = %config.system.environment,
        "vodforge daemon ready"
    );

    let endpoint = ControlEndpoint::bind(scheduler, &config.control.bind_addr).await?;
    endpoint.serve().await?;
    Ok(())
}
