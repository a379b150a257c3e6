//! Streams an upload to a temporary file next to its final destination,
//! hashing and measuring it on the way.

use super::sniff::{is_supported_mime_type, sniff, SNIFF_LEN};
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Uploaded file is empty")]
    Empty,

    #[error("File too large (max: {max} bytes)")]
    TooLarge { max: u64 },

    #[error("Unsupported audio type: {detected}")]
    UnsupportedMime { detected: String },

    #[error("Failed to read upload: {0}")]
    Read(String),
}

/// A temporary file that is deleted on drop unless it was promoted.
struct StagedFile {
    path: PathBuf,
    armed: bool,
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staged file {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staged file {:?}: {}", self.path, e),
        }
    }
}

/// Fully received upload content, not yet visible under a final name.
pub struct StagedContent {
    /// Hex SHA-256 of the full content.
    pub digest: String,
    pub size: u64,
    pub mime_type: String,
    /// Including the leading dot, may be empty.
    pub extension: String,
    file: StagedFile,
}

impl StagedContent {
    pub fn path(&self) -> &Path {
        &self.file.path
    }

    /// Moves the staged file to `final_path`. Both live in the same
    /// directory, so this is a rename and never a copy.
    pub async fn promote(mut self, final_path: &Path) -> std::io::Result<PathBuf> {
        fs::rename(&self.file.path, final_path).await?;
        self.file.armed = false;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                fs::set_permissions(final_path, std::fs::Permissions::from_mode(0o644)).await
            {
                warn!("Failed to set permissions on {:?}: {}", final_path, e);
            }
        }

        Ok(final_path.to_path_buf())
    }
}

pub struct ContentStager {
    /// Directory holding both staged and final song files.
    songs_dir: PathBuf,
    max_upload_bytes: u64,
}

impl ContentStager {
    pub fn new(songs_dir: impl Into<PathBuf>, max_upload_bytes: u64) -> Self {
        Self {
            songs_dir: songs_dir.into(),
            max_upload_bytes,
        }
    }

    pub fn songs_dir(&self) -> &Path {
        &self.songs_dir
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Stages `stream`. Nothing touches the disk until the leading bytes
    /// have been sniffed and accepted; from then on the temporary file is
    /// removed on every error path, including the caller dropping the result.
    pub async fn stage<S, B, E>(
        &self,
        declared_size: Option<u64>,
        stream: S,
    ) -> Result<StagedContent, StageError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        if let Some(declared) = declared_size {
            if declared > self.max_upload_bytes {
                return Err(StageError::TooLarge {
                    max: self.max_upload_bytes,
                });
            }
        }

        let mut stream = std::pin::pin!(stream);

        let mut head: Vec<u8> = Vec::with_capacity(SNIFF_LEN);
        while head.len() < SNIFF_LEN {
            match stream.next().await {
                Some(chunk) => {
                    let chunk = chunk.map_err(|e| StageError::Read(e.to_string()))?;
                    head.extend_from_slice(chunk.as_ref());
                    if head.len() as u64 > self.max_upload_bytes {
                        return Err(StageError::TooLarge {
                            max: self.max_upload_bytes,
                        });
                    }
                }
                None => break,
            }
        }

        if head.is_empty() {
            return Err(StageError::Empty);
        }

        let sniffed = sniff(&head);
        if !is_supported_mime_type(&sniffed.mime_type) {
            return Err(StageError::UnsupportedMime {
                detected: sniffed.mime_type,
            });
        }

        fs::create_dir_all(&self.songs_dir).await?;
        let staged = StagedFile {
            path: self.songs_dir.join(format!(
                ".incoming-{}{}",
                uuid::Uuid::new_v4(),
                sniffed.extension
            )),
            armed: true,
        };
        let mut file = fs::File::create(&staged.path).await?;

        let mut hasher = Sha256::new();
        hasher.update(&head);
        file.write_all(&head).await?;
        let mut size = head.len() as u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StageError::Read(e.to_string()))?;
            let bytes = chunk.as_ref();
            size += bytes.len() as u64;
            if size > self.max_upload_bytes {
                return Err(StageError::TooLarge {
                    max: self.max_upload_bytes,
                });
            }
            hasher.update(bytes);
            file.write_all(bytes).await?;
        }

        file.flush().await?;
        file.sync_all().await?;

        Ok(StagedContent {
            digest: format!("{:x}", hasher.finalize()),
            size,
            mime_type: sniffed.mime_type,
            extension: sniffed.extension,
            file: staged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    fn mp3_bytes(len: usize) -> Vec<u8> {
        let mut bytes = b"ID3\x03\x00\x00\x00\x00\x00\x00".to_vec();
        bytes.resize(len, 0x55);
        bytes
    }

    fn chunked(data: &[u8], chunk: usize) -> Vec<Result<Vec<u8>, String>> {
        data.chunks(chunk).map(|c| Ok(c.to_vec())).collect()
    }

    fn dir_entries(dir: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => vec![],
        }
    }

    #[tokio::test]
    async fn stages_and_hashes_chunked_stream() {
        let temp_dir = TempDir::new().unwrap();
        let stager = ContentStager::new(temp_dir.path().join("songs"), 1024 * 1024);
        let data = mp3_bytes(5000);

        let staged = stager
            .stage(None, stream::iter(chunked(&data, 7)))
            .await
            .unwrap();
        assert_eq!(staged.size, 5000);
        assert_eq!(staged.mime_type, "audio/mpeg");
        assert_eq!(staged.digest, format!("{:x}", Sha256::digest(&data)));
        assert_eq!(std::fs::read(staged.path()).unwrap(), data);
        assert!(staged
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(".incoming-"));
    }

    #[tokio::test]
    async fn dropping_staged_content_removes_the_file() {
        let temp_dir = TempDir::new().unwrap();
        let songs_dir = temp_dir.path().join("songs");
        let stager = ContentStager::new(&songs_dir, 1024 * 1024);

        let staged = stager
            .stage(None, stream::iter(chunked(&mp3_bytes(100), 64)))
            .await
            .unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn promote_keeps_the_file() {
        let temp_dir = TempDir::new().unwrap();
        let songs_dir = temp_dir.path().join("songs");
        let stager = ContentStager::new(&songs_dir, 1024 * 1024);

        let staged = stager
            .stage(None, stream::iter(chunked(&mp3_bytes(100), 64)))
            .await
            .unwrap();
        let final_path = songs_dir.join("1_123.mp3");
        staged.promote(&final_path).await.unwrap();
        assert_eq!(dir_entries(&songs_dir), vec![final_path]);
    }

    #[tokio::test]
    async fn rejects_empty_input() {
        let temp_dir = TempDir::new().unwrap();
        let stager = ContentStager::new(temp_dir.path().join("songs"), 1024);
        let result = stager
            .stage(None, stream::iter(Vec::<Result<Vec<u8>, String>>::new()))
            .await;
        assert!(matches!(result, Err(StageError::Empty)));
    }

    #[tokio::test]
    async fn rejects_declared_size_before_reading() {
        let temp_dir = TempDir::new().unwrap();
        let songs_dir = temp_dir.path().join("songs");
        let stager = ContentStager::new(&songs_dir, 100);
        let result = stager
            .stage(Some(101), stream::iter(chunked(&mp3_bytes(50), 10)))
            .await;
        assert!(matches!(result, Err(StageError::TooLarge { max: 100 })));
        assert!(!songs_dir.exists());
    }

    #[tokio::test]
    async fn rejects_oversized_stream_and_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let songs_dir = temp_dir.path().join("songs");
        let stager = ContentStager::new(&songs_dir, 2000);

        // Declared size lies; the actual byte count is enforced.
        let result = stager
            .stage(Some(10), stream::iter(chunked(&mp3_bytes(3000), 256)))
            .await;
        assert!(matches!(result, Err(StageError::TooLarge { max: 2000 })));
        assert!(dir_entries(&songs_dir).is_empty());
    }

    #[tokio::test]
    async fn rejects_unsupported_type_without_writing() {
        let temp_dir = TempDir::new().unwrap();
        let songs_dir = temp_dir.path().join("songs");
        let stager = ContentStager::new(&songs_dir, 1024);
        let result = stager
            .stage(None, stream::iter(chunked(b"hello, this is a text file", 4)))
            .await;
        match result {
            Err(StageError::UnsupportedMime { detected }) => {
                assert_eq!(detected, "application/octet-stream")
            }
            _ => panic!("Expected unsupported mime"),
        }
        assert!(!songs_dir.exists());
    }

    #[tokio::test]
    async fn read_error_midway_removes_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let songs_dir = temp_dir.path().join("songs");
        let stager = ContentStager::new(&songs_dir, 1024 * 1024);

        let mut chunks = chunked(&mp3_bytes(1024), 512);
        chunks.push(Err("connection reset".to_string()));
        let result = stager.stage(None, stream::iter(chunks)).await;
        assert!(matches!(result, Err(StageError::Read(_))));
        assert!(dir_entries(&songs_dir).is_empty());
    }
}
