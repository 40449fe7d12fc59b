//! vespa-pipeline - derived-data pipeline service
//!
//! Fetches raw photometry from the external archive, derives magnitude
//! statistics and lightcurve images in background jobs, and sweeps the
//! catalogue for stale artifacts on fixed intervals. Serves a small status
//! API plus the generated blobs.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vespa_common::Config;
use vespa_pipeline::jobs::TokioJobRunner;
use vespa_pipeline::pipeline::{Pipeline, PipelineExecutor};
use vespa_pipeline::{build_router, AppState};

#[derive(Parser, Debug)]
#[command(name = "vespa-pipeline", version, about = "Variable-star derived-data pipeline")]
struct Cli {
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root folder for the database and generated blobs
    #[arg(long)]
    root_folder: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(Config::load(
        cli.config.as_deref(),
        cli.root_folder.as_deref(),
    )?);

    info!("Starting vespa-pipeline");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Root folder: {}", config.root_folder.display());
    info!("Archive: {}", config.archive_base_url);

    config.ensure_directories()?;

    let db_path = config.database_path();
    info!("Database: {}", db_path.display());
    let pool = vespa_pipeline::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    let executor = Arc::new(PipelineExecutor::new(pool.clone(), config.clone()));
    let runner = Arc::new(TokioJobRunner::new(executor));
    let pipeline = Arc::new(Pipeline::new(pool, config.clone(), runner));

    vespa_pipeline::sweep::start_sweeps(pipeline.clone());

    let state = AppState::new(pipeline);
    let app = build_router(state);

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Listening on http://{}", bind);

    axum::serve(listener, app).await?;

    Ok(())
}
