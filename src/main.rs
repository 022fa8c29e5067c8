use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vision_scheduler::{
    config::Config,
    job_scheduling::{BindingScheduler, BindingSchedulerSettings, JobEngine, WorkflowScheduler},
    observability::SchedulerMetrics,
    repositories::{EntityStore, InMemoryStore},
    services::{
        HttpInferenceClient, LoggingWorkflowEngine, MediaProcessManager, PreviewManager,
        PreviewStrategy, RecordManager, SlotPools,
    },
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "vision-scheduler")]
#[command(version)]
#[command(about = "Recurring frame inference and workflow scheduling over bounded ffmpeg processes")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// JSON file of streams, algorithms, bindings and workflows to load
    #[arg(short, long, value_name = "FILE")]
    seed: Option<PathBuf>,
}

fn init_tracing(cli: &Cli) {
    let log_filter = format!("vision_scheduler={}", cli.log_level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!("Starting vision-scheduler v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_from_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    info!("Configuration loaded from: {}", cli.config.display());
    info!(
        "Process limits: record={}, frame={}, preview={}",
        config.ffmpeg.max_record, config.ffmpeg.max_frame, config.preview.max_preview
    );

    let (metrics, meter_provider) = SchedulerMetrics::init();

    let store: Arc<InMemoryStore> = match &cli.seed {
        Some(path) => Arc::new(
            InMemoryStore::from_json_file(path)
                .await
                .with_context(|| format!("loading seed {}", path.display()))?,
        ),
        None => {
            warn!("No seed file given, starting with an empty store");
            Arc::new(InMemoryStore::new())
        }
    };
    let store: Arc<dyn EntityStore> = store;

    let pools = SlotPools::new(
        config.ffmpeg.max_record,
        config.ffmpeg.max_frame,
        config.preview.max_preview,
        metrics.clone(),
    );
    let media = MediaProcessManager::from_config(&config, pools);
    let inference = Arc::new(HttpInferenceClient::new(&config.inference)?);
    let engine = Arc::new(JobEngine::new());

    let binding_scheduler = BindingScheduler::new(
        store.clone(),
        inference,
        media.clone(),
        engine.clone(),
        BindingSchedulerSettings::from(&config),
        metrics.clone(),
    );
    let workflow_scheduler = WorkflowScheduler::new(
        store.clone(),
        Arc::new(LoggingWorkflowEngine::new(store.clone())),
        engine.clone(),
        metrics.clone(),
        config.scheduler.shutdown_grace,
    );
    let previews = PreviewManager::new(PreviewStrategy::from_config(&config.preview), media.clone());
    let recordings = RecordManager::new(media, &config.record);

    binding_scheduler.start().await?;
    workflow_scheduler.start().await?;

    info!("Scheduler running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    binding_scheduler.stop().await;
    workflow_scheduler.stop().await;
    previews.stop_all().await;
    recordings.stop_all().await;
    engine.shutdown(config.scheduler.shutdown_grace).await;

    if let Err(e) = meter_provider.shutdown() {
        error!("Failed to shut down meter provider: {}", e);
    }
    info!("vision-scheduler stopped");
    Ok(())
}
