use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::{fmt::Debug, path::PathBuf};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cloudtune_server::config::{AppConfig, CliConfig, EnvConfig, FileConfig};
use cloudtune_server::library::{GuardedLibraryStore, SqliteLibraryStore};
use cloudtune_server::server::{run_server, RequestsLoggingLevel};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override flags and environment.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database file. Defaults to cloudtune.db inside the uploads root.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Root directory of uploaded content (env: CLOUD_UPLOADS_PATH).
    #[clap(long, value_parser = parse_path)]
    pub uploads_path: Option<PathBuf>,

    /// Largest accepted upload in bytes (env: CLOUD_MAX_UPLOAD_SIZE_BYTES).
    #[clap(long)]
    pub max_upload_bytes: Option<u64>,

    /// Storage quota of each user in bytes (env: CLOUD_STORAGE_QUOTA_BYTES).
    #[clap(long)]
    pub quota_bytes: Option<u64>,

    /// Uploads processed at the same time before rejecting new ones
    /// (env: CLOUD_MAX_PARALLEL_UPLOADS).
    #[clap(long)]
    pub max_parallel_uploads: Option<usize>,

    /// The port to listen on.
    #[clap(short, long)]
    pub port: Option<u16>,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long)]
    pub metrics_port: Option<u16>,

    /// The level of logging to perform on each request.
    #[clap(long)]
    pub logging_level: Option<RequestsLoggingLevel>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_path: self.db_path.clone(),
            uploads_path: self.uploads_path.clone(),
            max_upload_bytes: self.max_upload_bytes,
            storage_quota_bytes: self.quota_bytes,
            max_parallel_uploads: self.max_parallel_uploads,
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}...", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(
        &cli_args.to_cli_config(),
        &EnvConfig::from_process_env(),
        file_config,
    )?;
    info!(
        "Uploads under {:?}, max upload {:#}, quota {:#}, {} parallel uploads",
        config.uploads.uploads_root,
        byte_unit::Byte::from(config.uploads.max_upload_bytes),
        byte_unit::Byte::from(config.uploads.storage_quota_bytes),
        config.uploads.max_parallel_uploads
    );

    std::fs::create_dir_all(config.uploads.songs_dir())
        .with_context(|| format!("Failed to create {:?}", config.uploads.songs_dir()))?;
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }

    info!("Opening SQLite database at {:?}...", config.db_path);
    let store: GuardedLibraryStore = Arc::new(SqliteLibraryStore::new(&config.db_path)?);
    info!("Database holds {} songs", store.count_songs()?);

    run_server(
        config.server_config(),
        config.metrics_port,
        store,
        &config.uploads,
    )
    .await
}
