use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A unique piece of stored audio content, shared by every library that
/// references it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Song {
    pub id: usize,
    pub filename: String,
    pub original_filename: String,
    #[serde(skip)]
    pub filepath: PathBuf,
    pub filesize: u64,
    /// Hex SHA-256 of the content. `None` only for rows stored before
    /// digests were recorded and not yet backfilled.
    #[serde(skip)]
    pub content_hash: Option<String>,
    pub mime_type: Option<String>,
    #[serde(flatten)]
    pub metadata: SongMetadata,
    #[serde(skip)]
    pub uploader_id: Option<usize>,
    pub upload_date: i64,
}

/// Optional descriptive fields supplied by the client, stored as-is.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SongMetadata {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
}

#[derive(Clone, Debug)]
pub struct NewSong {
    pub filename: String,
    pub original_filename: String,
    pub filepath: PathBuf,
    pub filesize: u64,
    pub content_hash: String,
    pub mime_type: String,
    pub metadata: SongMetadata,
    pub uploader_id: usize,
}

#[derive(Debug, PartialEq)]
pub enum NewSongOutcome {
    /// The song row and the uploader's library link were created.
    Inserted(Song),
    /// Another row already carries this digest; nothing was written.
    DigestExists(Song),
    QuotaExceeded { used_bytes: u64, quota_bytes: u64 },
}

#[derive(Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    AlreadyLinked,
    QuotaExceeded { used_bytes: u64, quota_bytes: u64 },
    /// The song row was deleted after it was looked up.
    SongGone,
}

#[derive(Debug, PartialEq)]
pub enum RemoveSongOutcome {
    NotInLibrary,
    /// The association is gone. `orphaned_file` is set when it was the last
    /// one and the song row was deleted too; the caller owns removing it.
    Removed { orphaned_file: Option<PathBuf> },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Playlist {
    pub id: usize,
    pub owner_id: usize,
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub is_favorite: bool,
    pub created: i64,
    pub updated: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlaylistSummary {
    #[serde(flatten)]
    pub playlist: Playlist,
    pub song_count: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlaylistSong {
    pub position: i64,
    #[serde(flatten)]
    pub song: Song,
}

/// Create-or-update request for a playlist, already validated.
#[derive(Clone, Debug)]
pub struct PlaylistUpsert {
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub is_favorite: bool,
    pub replace_existing: bool,
}

#[derive(Debug, PartialEq)]
pub enum PlaylistUpsertOutcome {
    Created(Playlist),
    Updated(Playlist),
    /// A concurrent writer created the owner's favorites playlist first.
    FavoriteConflict,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended { position: i64 },
    PlaylistNotFound,
    NotOwner,
    SongNotInLibrary,
    AlreadyPresent,
}

#[derive(Debug, Default, PartialEq)]
pub struct UserDeletion {
    pub library_links_removed: usize,
    pub playlists_removed: usize,
    pub songs_deleted: usize,
    pub orphaned_files: Vec<PathBuf>,
}
