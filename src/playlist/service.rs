use super::bulk::{normalize_unique_ids, BulkAppendReport};
use crate::library::{
    AppendOutcome, GuardedLibraryStore, ListQuery, Page, Playlist, PlaylistSong,
    PlaylistSummary, PlaylistUpsert, PlaylistUpsertOutcome,
};
use anyhow::{anyhow, Context};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

pub const FAVORITES_PLAYLIST_NAME: &str = "Liked songs";
pub const FAVORITES_PLAYLIST_DESCRIPTION: &str = "System favorites playlist";

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("Playlist not found")]
    NotFound,

    #[error("You don't have permission to modify this playlist")]
    Forbidden,

    #[error("Song not found in your library")]
    SongNotInLibrary,

    #[error("Song is already in the playlist")]
    AlreadyPresent,

    #[error("The favorites playlist cannot be deleted")]
    FavoritesUndeletable,

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Body of a create-or-update request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaylistRequest {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    pub is_public: Option<bool>,
    pub is_favorite: Option<bool>,
    pub replace_existing: Option<bool>,
}

impl PlaylistRequest {
    fn into_upsert(self) -> Result<PlaylistUpsert, PlaylistError> {
        let is_favorite = self.is_favorite.unwrap_or(false);
        let mut name = self.name.trim().to_string();
        if name.is_empty() && is_favorite {
            name = FAVORITES_PLAYLIST_NAME.to_string();
        }
        if name.is_empty() {
            return Err(PlaylistError::Invalid(
                "Playlist name is required".to_string(),
            ));
        }
        Ok(PlaylistUpsert {
            name,
            description: self.description,
            is_public: self.is_public.unwrap_or(false),
            is_favorite,
            replace_existing: self.replace_existing.unwrap_or(false),
        })
    }
}

#[derive(Clone)]
pub struct PlaylistService {
    store: GuardedLibraryStore,
}

impl PlaylistService {
    pub fn new(store: GuardedLibraryStore) -> Self {
        Self { store }
    }

    /// Returns the user's favorites playlist, creating it on first use.
    /// The flag is true when this call created it.
    pub fn ensure_favorites(&self, user_id: usize) -> Result<(Playlist, bool), PlaylistError> {
        if let Some(existing) = self.store.find_favorites_playlist(user_id)? {
            return Ok((existing, false));
        }

        match self.store.insert_favorites_playlist(
            user_id,
            FAVORITES_PLAYLIST_NAME,
            FAVORITES_PLAYLIST_DESCRIPTION,
        )? {
            Some(created) => {
                info!("Created favorites playlist {} for user {}", created.id, user_id);
                Ok((created, true))
            }
            None => {
                // Someone else created it in between.
                debug!("Favorites of user {} created concurrently", user_id);
                let existing = self
                    .store
                    .find_favorites_playlist(user_id)?
                    .context("Favorites insert conflicted but no favorites playlist exists")?;
                Ok((existing, false))
            }
        }
    }

    /// Updates the playlist matching the request (favorite flag or name,
    /// case-insensitively) or creates it. The flag is true when created.
    pub fn create_or_update(
        &self,
        user_id: usize,
        request: PlaylistRequest,
    ) -> Result<(Playlist, bool), PlaylistError> {
        let upsert = request.into_upsert()?;

        // A conflict means a concurrent writer created the favorites row;
        // the second round finds and updates it.
        for _ in 0..2 {
            match self.store.upsert_playlist(user_id, &upsert)? {
                PlaylistUpsertOutcome::Created(playlist) => return Ok((playlist, true)),
                PlaylistUpsertOutcome::Updated(playlist) => return Ok((playlist, false)),
                PlaylistUpsertOutcome::FavoriteConflict => {
                    debug!("Favorites upsert of user {} conflicted, retrying", user_id)
                }
            }
        }
        Err(PlaylistError::Store(anyhow!(
            "Favorites playlist of user {} kept conflicting",
            user_id
        )))
    }

    fn owned_playlist(&self, user_id: usize, playlist_id: usize) -> Result<Playlist, PlaylistError> {
        let playlist = self
            .store
            .get_playlist(playlist_id)?
            .ok_or(PlaylistError::NotFound)?;
        if playlist.owner_id != user_id {
            return Err(PlaylistError::Forbidden);
        }
        Ok(playlist)
    }

    pub fn delete(&self, user_id: usize, playlist_id: usize) -> Result<(), PlaylistError> {
        let playlist = self.owned_playlist(user_id, playlist_id)?;
        if playlist.is_favorite {
            return Err(PlaylistError::FavoritesUndeletable);
        }
        if !self.store.delete_playlist(playlist_id)? {
            return Err(PlaylistError::NotFound);
        }
        info!("Deleted playlist {} of user {}", playlist_id, user_id);
        Ok(())
    }

    /// Appends one song at the end and returns its position.
    pub fn append(
        &self,
        user_id: usize,
        playlist_id: usize,
        song_id: usize,
    ) -> Result<i64, PlaylistError> {
        match self.store.append_song(playlist_id, user_id, song_id)? {
            AppendOutcome::Appended { position } => Ok(position),
            AppendOutcome::PlaylistNotFound => Err(PlaylistError::NotFound),
            AppendOutcome::NotOwner => Err(PlaylistError::Forbidden),
            AppendOutcome::SongNotInLibrary => Err(PlaylistError::SongNotInLibrary),
            AppendOutcome::AlreadyPresent => Err(PlaylistError::AlreadyPresent),
        }
    }

    /// Appends the songs of `raw_song_ids` that the user owns and that are
    /// not members yet, in request order.
    pub fn bulk_append(
        &self,
        user_id: usize,
        playlist_id: usize,
        raw_song_ids: &[i64],
    ) -> Result<BulkAppendReport, PlaylistError> {
        let unique = normalize_unique_ids(raw_song_ids);
        if unique.is_empty() {
            return Err(PlaylistError::Invalid(
                "song_ids must contain at least one positive integer".to_string(),
            ));
        }
        self.owned_playlist(user_id, playlist_id)?;

        let owned = self.store.filter_library_song_ids(user_id, &unique)?;
        let allowed: Vec<usize> = unique
            .iter()
            .copied()
            .filter(|id| owned.contains(id))
            .collect();

        let present = self.store.filter_playlist_song_ids(playlist_id, &allowed)?;
        let to_insert: Vec<usize> = allowed
            .iter()
            .copied()
            .filter(|id| !present.contains(id))
            .collect();

        let appended = if to_insert.is_empty() {
            vec![]
        } else {
            self.store.append_songs(playlist_id, &to_insert)?
        };

        let report = BulkAppendReport {
            requested_count: raw_song_ids.len(),
            unique_count: unique.len(),
            allowed_count: allowed.len(),
            added_count: appended.len(),
            skipped_not_in_library: unique.len() - allowed.len(),
            skipped_existing: allowed.len() - appended.len(),
            first_position: appended.first().map(|(_, p)| *p).unwrap_or(0),
            last_position: appended.last().map(|(_, p)| *p).unwrap_or(0),
        };
        debug!("Bulk add to playlist {}: {:?}", playlist_id, report);
        Ok(report)
    }

    /// Lists the user's playlists, favorites first. Makes sure the
    /// favorites playlist exists before listing.
    pub fn list(
        &self,
        user_id: usize,
        query: &ListQuery,
    ) -> Result<Page<PlaylistSummary>, PlaylistError> {
        self.ensure_favorites(user_id)?;
        Ok(self.store.list_playlists(user_id, query)?)
    }

    /// Songs of a playlist the user owns, or of a public one.
    pub fn list_songs(
        &self,
        user_id: usize,
        playlist_id: usize,
        query: &ListQuery,
    ) -> Result<Page<PlaylistSong>, PlaylistError> {
        let playlist = self
            .store
            .get_playlist(playlist_id)?
            .ok_or(PlaylistError::NotFound)?;
        if playlist.owner_id != user_id && !playlist.is_public {
            return Err(PlaylistError::Forbidden);
        }
        Ok(self.store.list_playlist_songs(playlist_id, query)?)
    }
}
