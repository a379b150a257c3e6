use super::admission::{AdmissionController, AdmissionPermit};
use super::dedup::{DeduplicationResolver, Resolution};
use super::quota::QuotaEnforcer;
use super::stager::{ContentStager, StageError, StagedContent};
use crate::config::UploadSettings;
use crate::library::{
    remove_blob, GuardedLibraryStore, LinkOutcome, NewSong, NewSongOutcome, Song, SongMetadata,
};
use anyhow::anyhow;
use futures::Stream;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("File is required")]
    FileMissing,

    #[error("File is empty")]
    FileEmpty,

    #[error("File too large")]
    FileTooLarge { max_upload_bytes: u64 },

    #[error("Unsupported audio format")]
    UnsupportedMime { detected_mime: String },

    #[error("Too many concurrent uploads. Please retry shortly")]
    ParallelUploadLimit,

    #[error("Storage quota exceeded")]
    QuotaExceeded { used_bytes: u64, quota_bytes: u64 },

    #[error("Error reading uploaded file: {0}")]
    Read(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl UploadError {
    /// Machine-readable reason reported to clients and used as metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            UploadError::FileMissing => "file_missing",
            UploadError::FileEmpty => "file_empty",
            UploadError::FileTooLarge { .. } => "file_too_large",
            UploadError::UnsupportedMime { .. } => "unsupported_mime",
            UploadError::ParallelUploadLimit => "parallel_upload_limit",
            UploadError::QuotaExceeded { .. } => "storage_quota_exceeded",
            UploadError::Read(_) => "file_read_error",
            UploadError::Io(_) | UploadError::Store(_) => "internal_error",
        }
    }
}

impl From<StageError> for UploadError {
    fn from(err: StageError) -> Self {
        match err {
            StageError::Io(e) => UploadError::Io(e),
            StageError::Empty => UploadError::FileEmpty,
            StageError::TooLarge { max } => UploadError::FileTooLarge {
                max_upload_bytes: max,
            },
            StageError::UnsupportedMime { detected } => UploadError::UnsupportedMime {
                detected_mime: detected,
            },
            StageError::Read(e) => UploadError::Read(e),
        }
    }
}

/// What the client told us about the file besides its bytes.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub original_filename: String,
    pub metadata: SongMetadata,
}

#[derive(Debug)]
pub struct UploadReceipt {
    pub song: Song,
    /// The content was already stored; no new song row was created.
    pub deduplicated: bool,
    /// The song was not in the uploader's library before.
    pub newly_linked: bool,
}

/// Runs an upload from admission to a committed library entry.
pub struct UploadService {
    admission: AdmissionController,
    stager: ContentStager,
    resolver: DeduplicationResolver,
    quota: QuotaEnforcer,
    store: GuardedLibraryStore,
}

impl UploadService {
    pub fn new(store: GuardedLibraryStore, settings: &UploadSettings) -> Self {
        Self {
            admission: AdmissionController::new(settings.max_parallel_uploads),
            stager: ContentStager::new(settings.songs_dir(), settings.max_upload_bytes),
            resolver: DeduplicationResolver::new(store.clone()),
            quota: QuotaEnforcer::new(store.clone(), settings.storage_quota_bytes),
            store,
        }
    }

    pub fn quota(&self) -> &QuotaEnforcer {
        &self.quota
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.stager.max_upload_bytes()
    }

    /// Takes an upload slot or fails right away. Hold the permit for the
    /// whole upload.
    pub fn try_admit(&self) -> Result<AdmissionPermit, UploadError> {
        self.admission.try_acquire().ok_or_else(|| {
            debug!(
                "Rejecting upload, {} already in flight",
                self.admission.in_flight()
            );
            UploadError::ParallelUploadLimit
        })
    }

    pub async fn stage<S, B, E>(
        &self,
        declared_size: Option<u64>,
        stream: S,
    ) -> Result<StagedContent, UploadError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        Ok(self.stager.stage(declared_size, stream).await?)
    }

    /// Admits, stages and commits in one go.
    pub async fn upload<S, B, E>(
        &self,
        user_id: usize,
        request: &UploadRequest,
        declared_size: Option<u64>,
        stream: S,
    ) -> Result<UploadReceipt, UploadError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let _permit = self.try_admit()?;
        let staged = self.stage(declared_size, stream).await?;
        self.commit(user_id, request, staged).await
    }

    /// Turns staged content into a library entry of `user_id`, either by
    /// linking the song that already holds the content or by storing it as
    /// a new song. The staged file never outlives this call unless promoted.
    pub async fn commit(
        &self,
        user_id: usize,
        request: &UploadRequest,
        staged: StagedContent,
    ) -> Result<UploadReceipt, UploadError> {
        if let Resolution::Existing(song) =
            self.resolver.resolve(&staged.digest, staged.size).await?
        {
            match self.link_existing(user_id, song)? {
                Some(receipt) => return Ok(receipt),
                None => debug!(
                    "Song holding {} was deleted meanwhile, storing the upload as new",
                    staged.digest
                ),
            }
        }
        self.store_new(user_id, request, staged).await
    }

    /// Returns Ok(None) when the song was deleted before it could be linked.
    fn link_existing(
        &self,
        user_id: usize,
        song: Song,
    ) -> Result<Option<UploadReceipt>, UploadError> {
        if !self.store.is_song_in_library(user_id, song.id)? {
            let decision = self.quota.can_admit(user_id, song.filesize as i64)?;
            if !decision.allowed {
                return Err(UploadError::QuotaExceeded {
                    used_bytes: decision.used_bytes,
                    quota_bytes: decision.quota_bytes,
                });
            }
        }

        let newly_linked =
            match self
                .store
                .link_song_within_quota(user_id, song.id, self.quota.quota_bytes())?
            {
                LinkOutcome::Linked => true,
                LinkOutcome::AlreadyLinked => false,
                LinkOutcome::QuotaExceeded {
                    used_bytes,
                    quota_bytes,
                } => {
                    return Err(UploadError::QuotaExceeded {
                        used_bytes,
                        quota_bytes,
                    })
                }
                LinkOutcome::SongGone => return Ok(None),
            };

        info!(
            "Deduplicated upload of user {} onto song {} (newly linked: {})",
            user_id, song.id, newly_linked
        );
        Ok(Some(UploadReceipt {
            song,
            deduplicated: true,
            newly_linked,
        }))
    }

    async fn store_new(
        &self,
        user_id: usize,
        request: &UploadRequest,
        staged: StagedContent,
    ) -> Result<UploadReceipt, UploadError> {
        let decision = self.quota.can_admit(user_id, staged.size as i64)?;
        if !decision.allowed {
            return Err(UploadError::QuotaExceeded {
                used_bytes: decision.used_bytes,
                quota_bytes: decision.quota_bytes,
            });
        }

        let filename = final_filename(user_id, &staged.extension);
        let new_song = NewSong {
            filename: filename.clone(),
            original_filename: request.original_filename.clone(),
            filepath: self.stager.songs_dir().join(&filename),
            filesize: staged.size,
            content_hash: staged.digest.clone(),
            mime_type: staged.mime_type.clone(),
            metadata: request.metadata.clone(),
            uploader_id: user_id,
        };
        let filepath: PathBuf = staged.promote(&new_song.filepath).await?;

        // The song found on a digest conflict can itself be deleted before
        // it is linked; the content is then inserted again.
        for _ in 0..MAX_INSERT_ATTEMPTS {
            let outcome = match self
                .store
                .insert_song_and_link(&new_song, self.quota.quota_bytes())
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Failed to store song {:?}: {:#}", filepath, e);
                    remove_blob(&filepath).await;
                    return Err(UploadError::Store(e));
                }
            };

            match outcome {
                NewSongOutcome::Inserted(song) => {
                    info!(
                        "Stored new song {} ({} bytes) for user {}",
                        song.id, song.filesize, user_id
                    );
                    return Ok(UploadReceipt {
                        song,
                        deduplicated: false,
                        newly_linked: true,
                    });
                }
                NewSongOutcome::DigestExists(existing) => {
                    warn!(
                        "Identical content was stored concurrently as song {}, linking instead",
                        existing.id
                    );
                    match self.link_existing(user_id, existing) {
                        Ok(Some(receipt)) => {
                            remove_blob(&filepath).await;
                            return Ok(receipt);
                        }
                        Ok(None) => continue,
                        Err(e) => {
                            remove_blob(&filepath).await;
                            return Err(e);
                        }
                    }
                }
                NewSongOutcome::QuotaExceeded {
                    used_bytes,
                    quota_bytes,
                } => {
                    remove_blob(&filepath).await;
                    return Err(UploadError::QuotaExceeded {
                        used_bytes,
                        quota_bytes,
                    });
                }
            }
        }

        remove_blob(&filepath).await;
        Err(UploadError::Store(anyhow!(
            "Song holding {} kept disappearing while storing it",
            new_song.content_hash
        )))
    }
}

const MAX_INSERT_ATTEMPTS: usize = 3;

/// `<user>_<nanos>_<random><ext>`. The random part keeps names unique even
/// when two uploads of one user share a timestamp, since promotion by rename
/// would replace an existing file.
fn final_filename(user_id: usize, extension: &str) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}{}", user_id, nanos, &random[..8], extension)
}
