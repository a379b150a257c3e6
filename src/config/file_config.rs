use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Contents of the optional TOML config file. Every key is optional and
/// overrides the CLI and environment when present.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FileConfig {
    pub db_path: Option<String>,
    pub uploads_path: Option<String>,
    pub max_upload_bytes: Option<u64>,
    pub storage_quota_bytes: Option<u64>,
    pub max_parallel_uploads: Option<usize>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "uploads_path = \"/srv/music\"\nstorage_quota_bytes = 1024\nlogging_level = \"headers\""
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.uploads_path.as_deref(), Some("/srv/music"));
        assert_eq!(config.storage_quota_bytes, Some(1024));
        assert_eq!(config.logging_level.as_deref(), Some("headers"));
        assert!(config.port.is_none());
        assert!(config.max_parallel_uploads.is_none());
    }

    #[test]
    fn reports_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();
        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }
}
