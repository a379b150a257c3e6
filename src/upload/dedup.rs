use crate::library::{GuardedLibraryStore, Song};
use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

const HASH_BUFFER_LEN: usize = 64 * 1024;

#[derive(Debug, PartialEq)]
pub enum Resolution {
    Existing(Song),
    NotFound,
}

/// Finds the stored song holding some content, if any.
pub struct DeduplicationResolver {
    store: GuardedLibraryStore,
}

impl DeduplicationResolver {
    pub fn new(store: GuardedLibraryStore) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, digest: &str, size: u64) -> Result<Resolution> {
        if let Some(song) = self.store.find_song_by_digest(digest)? {
            return Ok(Resolution::Existing(song));
        }
        self.resolve_legacy(digest, size).await
    }

    /// Rows stored before digests were recorded are hashed on demand when an
    /// upload of the same size arrives, and their digest is persisted.
    /// Can go once no song row lacks a digest.
    async fn resolve_legacy(&self, digest: &str, size: u64) -> Result<Resolution> {
        let candidates = self.store.find_undigested_songs_by_size(size)?;
        if candidates.is_empty() {
            return Ok(Resolution::NotFound);
        }
        debug!(
            "Rehashing {} legacy candidates of {} bytes",
            candidates.len(),
            size
        );

        for candidate in candidates {
            let candidate_digest = match hash_file(&candidate.filepath).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(
                        "Skipping legacy song {} ({:?}): {}",
                        candidate.id, candidate.filepath, e
                    );
                    continue;
                }
            };

            match self.store.backfill_digest(candidate.id, &candidate_digest) {
                Ok(true) => info!("Backfilled digest of song {}", candidate.id),
                Ok(false) => {}
                Err(e) => warn!("Failed to backfill digest of song {}: {}", candidate.id, e),
            }

            if candidate_digest == digest {
                return Ok(Resolution::Existing(Song {
                    content_hash: Some(candidate_digest),
                    ..candidate
                }));
            }
        }

        Ok(Resolution::NotFound)
    }
}

/// Hex SHA-256 of the file at `path`.
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_LEN];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
