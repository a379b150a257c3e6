mod file_config;

pub use file_config::FileConfig;

use crate::server::{RequestsLoggingLevel, ServerConfig};
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_UPLOADS_PATH: &str = "./uploads";
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_STORAGE_QUOTA_BYTES: u64 = 3 * 1024 * 1024 * 1024;
pub const DEFAULT_MAX_PARALLEL_UPLOADS: usize = 4;
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_METRICS_PORT: u16 = 9091;
pub const DB_FILE_NAME: &str = "cloudtune.db";

pub const ENV_UPLOADS_PATH: &str = "CLOUD_UPLOADS_PATH";
pub const ENV_MAX_UPLOAD_SIZE_BYTES: &str = "CLOUD_MAX_UPLOAD_SIZE_BYTES";
pub const ENV_STORAGE_QUOTA_BYTES: &str = "CLOUD_STORAGE_QUOTA_BYTES";
pub const ENV_MAX_PARALLEL_UPLOADS: &str = "CLOUD_MAX_PARALLEL_UPLOADS";

/// CLI arguments that take part in config resolution. Unset options fall
/// through to the defaults.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub uploads_path: Option<PathBuf>,
    pub max_upload_bytes: Option<u64>,
    pub storage_quota_bytes: Option<u64>,
    pub max_parallel_uploads: Option<usize>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<RequestsLoggingLevel>,
}

/// The recognized environment variables, already parsed. Invalid or
/// non-positive values are dropped with a warning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub uploads_path: Option<PathBuf>,
    pub max_upload_bytes: Option<u64>,
    pub storage_quota_bytes: Option<u64>,
    pub max_parallel_uploads: Option<usize>,
}

fn positive_env<T>(vars: &HashMap<String, String>, key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let raw = vars.get(key)?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<T>() {
        Ok(value) if value > T::default() => Some(value),
        _ => {
            warn!("Ignoring invalid value {:?} of {}", raw, key);
            None
        }
    }
}

impl EnvConfig {
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        EnvConfig {
            uploads_path: vars
                .get(ENV_UPLOADS_PATH)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            max_upload_bytes: positive_env(vars, ENV_MAX_UPLOAD_SIZE_BYTES),
            storage_quota_bytes: positive_env(vars, ENV_STORAGE_QUOTA_BYTES),
            max_parallel_uploads: positive_env(vars, ENV_MAX_PARALLEL_UPLOADS),
        }
    }

    /// Reads the process environment once.
    pub fn from_process_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }
}

/// Where uploads go and how much of them is admitted.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSettings {
    pub uploads_root: PathBuf,
    pub max_upload_bytes: u64,
    pub storage_quota_bytes: u64,
    pub max_parallel_uploads: usize,
}

impl UploadSettings {
    /// Final song files live here, next to their staging files.
    pub fn songs_dir(&self) -> PathBuf {
        self.uploads_root.join("songs")
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        UploadSettings {
            uploads_root: PathBuf::from(DEFAULT_UPLOADS_PATH),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            storage_quota_bytes: DEFAULT_STORAGE_QUOTA_BYTES,
            max_parallel_uploads: DEFAULT_MAX_PARALLEL_UPLOADS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub uploads: UploadSettings,
}

impl AppConfig {
    /// Resolves the configuration, lowest to highest precedence: defaults,
    /// CLI, environment, TOML file.
    pub fn resolve(cli: &CliConfig, env: &EnvConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let uploads_root = file
            .uploads_path
            .map(PathBuf::from)
            .or_else(|| env.uploads_path.clone())
            .or_else(|| cli.uploads_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOADS_PATH));

        if uploads_root.exists() && !uploads_root.is_dir() {
            bail!("uploads path is not a directory: {:?}", uploads_root);
        }

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .unwrap_or_else(|| uploads_root.join(DB_FILE_NAME));

        let max_upload_bytes = file
            .max_upload_bytes
            .filter(|v| *v > 0)
            .or(env.max_upload_bytes)
            .or(cli.max_upload_bytes.filter(|v| *v > 0))
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        let storage_quota_bytes = file
            .storage_quota_bytes
            .filter(|v| *v > 0)
            .or(env.storage_quota_bytes)
            .or(cli.storage_quota_bytes.filter(|v| *v > 0))
            .unwrap_or(DEFAULT_STORAGE_QUOTA_BYTES);
        let max_parallel_uploads = file
            .max_parallel_uploads
            .filter(|v| *v > 0)
            .or(env.max_parallel_uploads)
            .or(cli.max_parallel_uploads.filter(|v| *v > 0))
            .unwrap_or(DEFAULT_MAX_PARALLEL_UPLOADS);

        let port = file.port.or(cli.port).unwrap_or(DEFAULT_PORT);
        let metrics_port = file
            .metrics_port
            .or(cli.metrics_port)
            .unwrap_or(DEFAULT_METRICS_PORT);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .or_else(|| cli.logging_level.clone())
            .unwrap_or_default();

        if port == metrics_port {
            bail!("port and metrics_port must differ (both {})", port);
        }

        Ok(Self {
            db_path,
            port,
            metrics_port,
            logging_level,
            uploads: UploadSettings {
                uploads_root,
                max_upload_bytes,
                storage_quota_bytes,
                max_parallel_uploads,
            },
        })
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            requests_logging_level: self.logging_level.clone(),
            port: self.port,
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    let level = RequestsLoggingLevel::from_str(s, true).ok();
    if level.is_none() {
        warn!("Ignoring unknown logging level {:?}", s);
    }
    level
}
