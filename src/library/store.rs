use super::auth::{AuthToken, AuthTokenValue};
use super::models::*;
use super::pagination::{ListQuery, Page};
use anyhow::Result;
use std::collections::HashSet;

pub trait UserStore: Send + Sync {
    /// Creates a new user and returns the user id.
    fn create_user(&self, user_handle: &str) -> Result<usize>;

    /// Returns Ok(None) if no user has the given handle.
    fn get_user_id(&self, user_handle: &str) -> Result<Option<usize>>;

    fn get_all_user_handles(&self) -> Result<Vec<String>>;

    fn add_auth_token(&self, user_id: usize, value: &AuthTokenValue) -> Result<()>;

    /// Returns Ok(None) if the token does not exist.
    fn get_auth_token(&self, value: &AuthTokenValue) -> Result<Option<AuthToken>>;

    fn update_auth_token_last_used(&self, value: &AuthTokenValue) -> Result<()>;

    /// Deletes the user together with its library links, playlists and
    /// tokens, then deletes every song of its library that no other library
    /// references. Files of deleted songs are returned, not removed.
    /// Returns Ok(None) if the user does not exist.
    fn delete_user(&self, user_id: usize) -> Result<Option<UserDeletion>>;
}

pub trait SongStore: Send + Sync {
    /// Returns the song carrying exactly this digest, if any.
    fn find_song_by_digest(&self, digest: &str) -> Result<Option<Song>>;

    /// Songs of the given size that have no digest yet, oldest first.
    fn find_undigested_songs_by_size(&self, filesize: u64) -> Result<Vec<Song>>;

    /// Records a digest on a song that has none. Returns false if the row
    /// already had one (or is gone). Fails if the digest belongs to another row.
    fn backfill_digest(&self, song_id: usize, digest: &str) -> Result<bool>;

    /// Inserts a new song and links it to its uploader in one write
    /// transaction, re-checking the uploader's quota under the same lock.
    fn insert_song_and_link(&self, song: &NewSong, quota_bytes: u64) -> Result<NewSongOutcome>;

    /// Idempotent link, no quota involved.
    /// Returns true if the association was newly created.
    fn link_song(&self, user_id: usize, song_id: usize) -> Result<bool>;

    /// Links an existing song if the user's usage stays within `quota_bytes`.
    /// An already existing link never counts against the quota. A song that
    /// no longer exists is reported as `SongGone`, not as an error.
    fn link_song_within_quota(
        &self,
        user_id: usize,
        song_id: usize,
        quota_bytes: u64,
    ) -> Result<LinkOutcome>;

    fn is_song_in_library(&self, user_id: usize, song_id: usize) -> Result<bool>;

    /// Returns Ok(None) if the song is not in the user's library.
    fn get_library_song(&self, user_id: usize, song_id: usize) -> Result<Option<Song>>;

    /// Which of `song_ids` are in the user's library.
    fn filter_library_song_ids(&self, user_id: usize, song_ids: &[usize])
        -> Result<HashSet<usize>>;

    fn list_library(&self, user_id: usize, query: &ListQuery) -> Result<Page<Song>>;

    /// Sum of the sizes of every song in the user's library.
    fn library_usage_bytes(&self, user_id: usize) -> Result<u64>;

    /// Removes a song from the user's library and from the user's playlists,
    /// deleting the song row when no library references it anymore.
    fn remove_song_from_library(&self, user_id: usize, song_id: usize)
        -> Result<RemoveSongOutcome>;

    fn count_songs(&self) -> Result<usize>;
}

pub trait PlaylistStore: Send + Sync {
    fn get_playlist(&self, playlist_id: usize) -> Result<Option<Playlist>>;

    /// The owner's favorites playlist (lowest id if legacy data has several).
    fn find_favorites_playlist(&self, owner_id: usize) -> Result<Option<Playlist>>;

    /// Inserts the favorites playlist unless one already exists.
    /// Returns Ok(None) when the insert lost against an existing row.
    fn insert_favorites_playlist(
        &self,
        owner_id: usize,
        name: &str,
        description: &str,
    ) -> Result<Option<Playlist>>;

    /// Updates the playlist matched by favorite flag (if requested) or by
    /// case-insensitive name, or inserts a new one.
    fn upsert_playlist(&self, owner_id: usize, request: &PlaylistUpsert)
        -> Result<PlaylistUpsertOutcome>;

    /// Returns false if the playlist did not exist.
    fn delete_playlist(&self, playlist_id: usize) -> Result<bool>;

    fn list_playlists(&self, owner_id: usize, query: &ListQuery) -> Result<Page<PlaylistSummary>>;

    fn list_playlist_songs(&self, playlist_id: usize, query: &ListQuery)
        -> Result<Page<PlaylistSong>>;

    /// Which of `song_ids` are already members of the playlist.
    fn filter_playlist_song_ids(
        &self,
        playlist_id: usize,
        song_ids: &[usize],
    ) -> Result<HashSet<usize>>;

    /// Appends one song at `MAX(position) + 1`, checking ownership, library
    /// membership and duplicates inside the same write transaction.
    fn append_song(&self, playlist_id: usize, user_id: usize, song_id: usize)
        -> Result<AppendOutcome>;

    /// Appends songs in the given order under the playlist write lock.
    /// Songs that became members concurrently are skipped without consuming
    /// a position. Returns the (song, position) pairs actually inserted.
    fn append_songs(&self, playlist_id: usize, song_ids: &[usize]) -> Result<Vec<(usize, i64)>>;
}

pub trait LibraryStore: UserStore + SongStore + PlaylistStore {}

impl<T: UserStore + SongStore + PlaylistStore> LibraryStore for T {}
