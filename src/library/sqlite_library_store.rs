use super::auth::{AuthToken, AuthTokenValue};
use super::models::*;
use super::pagination::{ListQuery, Page};
use super::schema::{
    AUTH_TOKEN_TABLE_V_0, PLAYLIST_SONG_TABLE_V_0, PLAYLIST_TABLE_V_1, SONG_TABLE_V_1,
    USER_LIBRARY_TABLE_V_0, USER_TABLE_V_0, VERSIONED_SCHEMAS,
};
use super::store::{PlaylistStore, SongStore, UserStore};
use crate::sqlite_persistence::{open_versioned_db, DEFAULT_TIMESTAMP};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SONG_COLUMNS: &str = "s.id, s.filename, s.original_filename, s.filepath, s.filesize, \
     s.mime_type, s.artist, s.title, s.album, s.genre, s.year, s.uploader_id, s.upload_date, \
     s.content_hash";

const PLAYLIST_COLUMNS: &str =
    "p.id, p.owner_id, p.name, p.description, p.is_public, p.is_favorite, p.created, p.updated";

/// `?1` is the user id, `?2` the lowercase LIKE pattern (empty matches all).
const LIBRARY_FILTER: &str = "ul.user_id = ?1 AND (?2 = '' \
     OR lower(s.original_filename) LIKE ?2 \
     OR lower(s.filename) LIKE ?2 \
     OR lower(COALESCE(s.title, '')) LIKE ?2 \
     OR lower(COALESCE(s.artist, '')) LIKE ?2 \
     OR lower(COALESCE(s.album, '')) LIKE ?2 \
     OR lower(COALESCE(s.genre, '')) LIKE ?2)";

const PLAYLIST_FILTER: &str = "p.owner_id = ?1 AND (?2 = '' \
     OR lower(p.name) LIKE ?2 \
     OR lower(COALESCE(p.description, '')) LIKE ?2)";

fn row_to_song(row: &Row, offset: usize) -> rusqlite::Result<Song> {
    Ok(Song {
        id: row.get(offset)?,
        filename: row.get(offset + 1)?,
        original_filename: row.get(offset + 2)?,
        filepath: PathBuf::from(row.get::<_, String>(offset + 3)?),
        filesize: row.get(offset + 4)?,
        mime_type: row.get(offset + 5)?,
        metadata: SongMetadata {
            artist: row.get(offset + 6)?,
            title: row.get(offset + 7)?,
            album: row.get(offset + 8)?,
            genre: row.get(offset + 9)?,
            year: row.get(offset + 10)?,
        },
        uploader_id: row.get(offset + 11)?,
        upload_date: row.get(offset + 12)?,
        content_hash: row
            .get::<_, Option<String>>(offset + 13)?
            .filter(|digest| !digest.is_empty()),
    })
}

fn row_to_playlist(row: &Row) -> rusqlite::Result<Playlist> {
    Ok(Playlist {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        is_public: row.get(4)?,
        is_favorite: row.get(5)?,
        created: row.get(6)?,
        updated: row.get(7)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn query_song(conn: &Connection, song_id: usize) -> Result<Option<Song>> {
    conn.query_row(
        &format!("SELECT {} FROM {} s WHERE s.id = ?1", SONG_COLUMNS, SONG_TABLE_V_1.name),
        params![song_id],
        |row| row_to_song(row, 0),
    )
    .optional()
    .with_context(|| format!("Failed to load song {}", song_id))
}

fn query_song_by_digest(conn: &Connection, digest: &str) -> Result<Option<Song>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM {} s WHERE s.content_hash = ?1 ORDER BY s.id LIMIT 1",
            SONG_COLUMNS, SONG_TABLE_V_1.name
        ),
        params![digest],
        |row| row_to_song(row, 0),
    )
    .optional()
    .context("Failed to look up song by digest")
}

fn query_playlist(conn: &Connection, playlist_id: usize) -> Result<Option<Playlist>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM {} p WHERE p.id = ?1",
            PLAYLIST_COLUMNS, PLAYLIST_TABLE_V_1.name
        ),
        params![playlist_id],
        row_to_playlist,
    )
    .optional()
    .with_context(|| format!("Failed to load playlist {}", playlist_id))
}

fn query_favorites(conn: &Connection, owner_id: usize) -> Result<Option<Playlist>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM {} p WHERE p.owner_id = ?1 AND p.is_favorite = 1 ORDER BY p.id LIMIT 1",
            PLAYLIST_COLUMNS, PLAYLIST_TABLE_V_1.name
        ),
        params![owner_id],
        row_to_playlist,
    )
    .optional()
    .context("Failed to look up favorites playlist")
}

fn query_usage(conn: &Connection, user_id: usize) -> Result<u64> {
    let used: i64 = conn
        .query_row(
            &format!(
                "SELECT COALESCE(SUM(s.filesize), 0) FROM {} s JOIN {} ul ON ul.song_id = s.id WHERE ul.user_id = ?1",
                SONG_TABLE_V_1.name, USER_LIBRARY_TABLE_V_0.name
            ),
            params![user_id],
            |row| row.get(0),
        )
        .with_context(|| format!("Failed to compute storage usage of user {}", user_id))?;
    Ok(used.max(0) as u64)
}

fn query_in_library(conn: &Connection, user_id: usize, song_id: usize) -> Result<bool> {
    conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE user_id = ?1 AND song_id = ?2)",
            USER_LIBRARY_TABLE_V_0.name
        ),
        params![user_id, song_id],
        |row| row.get(0),
    )
    .context("Failed to check library membership")
}

fn insert_link(conn: &Connection, user_id: usize, song_id: usize) -> Result<bool> {
    let inserted = conn
        .execute(
            &format!(
                "INSERT INTO {} (user_id, song_id) VALUES (?1, ?2) ON CONFLICT(user_id, song_id) DO NOTHING",
                USER_LIBRARY_TABLE_V_0.name
            ),
            params![user_id, song_id],
        )
        .with_context(|| format!("Failed to link song {} to user {}", song_id, user_id))?;
    Ok(inserted > 0)
}

fn touch_playlist(conn: &Connection, playlist_id: usize) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE {} SET updated = {} WHERE id = ?1",
            PLAYLIST_TABLE_V_1.name, DEFAULT_TIMESTAMP
        ),
        params![playlist_id],
    )?;
    Ok(())
}

fn max_position(conn: &Connection, playlist_id: usize) -> Result<i64> {
    conn.query_row(
        &format!(
            "SELECT COALESCE(MAX(position), 0) FROM {} WHERE playlist_id = ?1",
            PLAYLIST_SONG_TABLE_V_0.name
        ),
        params![playlist_id],
        |row| row.get(0),
    )
    .context("Failed to read playlist max position")
}

#[derive(Clone)]
pub struct SqliteLibraryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLibraryStore {
    pub fn new<T: AsRef<Path>>(db_path: T) -> Result<Self> {
        let conn = open_versioned_db(db_path.as_ref(), VERSIONED_SCHEMAS)?;
        info!("Opened library database at {:?}", db_path.as_ref());
        Ok(SqliteLibraryStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl UserStore for SqliteLibraryStore {
    fn create_user(&self, user_handle: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("INSERT INTO {} (handle) VALUES (?1)", USER_TABLE_V_0.name),
            params![user_handle],
        )
        .with_context(|| format!("Failed to create user {}", user_handle))?;
        Ok(conn.last_insert_rowid() as usize)
    }

    fn get_user_id(&self, user_handle: &str) -> Result<Option<usize>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT id FROM {} WHERE handle = ?1", USER_TABLE_V_0.name),
            params![user_handle],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to look up user")
    }

    fn get_all_user_handles(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT handle FROM {} ORDER BY id",
            USER_TABLE_V_0.name
        ))?;
        let handles = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(handles)
    }

    fn add_auth_token(&self, user_id: usize, value: &AuthTokenValue) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {} (user_id, value) VALUES (?1, ?2)",
                AUTH_TOKEN_TABLE_V_0.name
            ),
            params![user_id, value.0],
        )
        .with_context(|| format!("Failed to add auth token for user {}", user_id))?;
        Ok(())
    }

    fn get_auth_token(&self, value: &AuthTokenValue) -> Result<Option<AuthToken>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!(
                "SELECT user_id, value, created, last_used FROM {} WHERE value = ?1",
                AUTH_TOKEN_TABLE_V_0.name
            ),
            params![value.0],
            |row| {
                Ok(AuthToken {
                    user_id: row.get(0)?,
                    value: AuthTokenValue(row.get(1)?),
                    created: row.get(2)?,
                    last_used: row.get(3)?,
                })
            },
        )
        .optional()
        .context("Failed to look up auth token")
    }

    fn update_auth_token_last_used(&self, value: &AuthTokenValue) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "UPDATE {} SET last_used = {} WHERE value = ?1",
                AUTH_TOKEN_TABLE_V_0.name, DEFAULT_TIMESTAMP
            ),
            params![value.0],
        )?;
        Ok(())
    }

    fn delete_user(&self, user_id: usize) -> Result<Option<UserDeletion>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)",
                USER_TABLE_V_0.name
            ),
            params![user_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(None);
        }

        let song_ids = {
            let mut stmt = tx.prepare(&format!(
                "SELECT song_id FROM {} WHERE user_id = ?1 ORDER BY song_id",
                USER_LIBRARY_TABLE_V_0.name
            ))?;
            let ids = stmt
                .query_map(params![user_id], |row| row.get::<_, usize>(0))?
                .collect::<Result<Vec<usize>, _>>()?;
            ids
        };
        let playlists_removed: usize = tx.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE owner_id = ?1",
                PLAYLIST_TABLE_V_1.name
            ),
            params![user_id],
            |row| row.get(0),
        )?;

        // Tokens, library links and playlists cascade; uploader_id is nulled.
        tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", USER_TABLE_V_0.name),
            params![user_id],
        )
        .with_context(|| format!("Failed to delete user {}", user_id))?;

        let mut deletion = UserDeletion {
            library_links_removed: song_ids.len(),
            playlists_removed,
            ..Default::default()
        };
        for song_id in song_ids {
            let remaining: usize = tx.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE song_id = ?1",
                    USER_LIBRARY_TABLE_V_0.name
                ),
                params![song_id],
                |row| row.get(0),
            )?;
            if remaining > 0 {
                continue;
            }
            let filepath: Option<String> = tx
                .query_row(
                    &format!("SELECT filepath FROM {} WHERE id = ?1", SONG_TABLE_V_1.name),
                    params![song_id],
                    |row| row.get(0),
                )
                .optional()?;
            tx.execute(
                &format!("DELETE FROM {} WHERE id = ?1", SONG_TABLE_V_1.name),
                params![song_id],
            )?;
            deletion.songs_deleted += 1;
            if let Some(filepath) = filepath {
                deletion.orphaned_files.push(PathBuf::from(filepath));
            }
        }

        tx.commit()?;
        info!(
            "Deleted user {}: {} library links, {} playlists, {} songs",
            user_id,
            deletion.library_links_removed,
            deletion.playlists_removed,
            deletion.songs_deleted
        );
        Ok(Some(deletion))
    }
}

impl SongStore for SqliteLibraryStore {
    fn find_song_by_digest(&self, digest: &str) -> Result<Option<Song>> {
        let conn = self.conn.lock().unwrap();
        query_song_by_digest(&conn, digest)
    }

    fn find_undigested_songs_by_size(&self, filesize: u64) -> Result<Vec<Song>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} s WHERE s.filesize = ?1 AND COALESCE(s.content_hash, '') = '' ORDER BY s.id",
            SONG_COLUMNS, SONG_TABLE_V_1.name
        ))?;
        let songs = stmt
            .query_map(params![filesize], |row| row_to_song(row, 0))?
            .collect::<Result<Vec<Song>, _>>()
            .context("Failed to look up undigested songs")?;
        Ok(songs)
    }

    fn backfill_digest(&self, song_id: usize, digest: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                &format!(
                    "UPDATE {} SET content_hash = ?1 WHERE id = ?2 AND COALESCE(content_hash, '') = ''",
                    SONG_TABLE_V_1.name
                ),
                params![digest, song_id],
            )
            .with_context(|| format!("Failed to backfill digest of song {}", song_id))?;
        Ok(updated > 0)
    }

    fn insert_song_and_link(&self, song: &NewSong, quota_bytes: u64) -> Result<NewSongOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let used_bytes = query_usage(&tx, song.uploader_id)?;
        if used_bytes.saturating_add(song.filesize) > quota_bytes {
            return Ok(NewSongOutcome::QuotaExceeded {
                used_bytes,
                quota_bytes,
            });
        }

        let inserted = tx
            .execute(
                &format!(
                    "INSERT INTO {} (filename, original_filename, filepath, filesize, mime_type, \
                     artist, title, album, genre, year, uploader_id, content_hash) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
                     ON CONFLICT(content_hash) DO NOTHING",
                    SONG_TABLE_V_1.name
                ),
                params![
                    song.filename,
                    song.original_filename,
                    song.filepath.to_string_lossy(),
                    song.filesize,
                    song.mime_type,
                    song.metadata.artist,
                    song.metadata.title,
                    song.metadata.album,
                    song.metadata.genre,
                    song.metadata.year,
                    song.uploader_id,
                    song.content_hash,
                ],
            )
            .context("Failed to insert song")?;

        if inserted == 0 {
            let existing = query_song_by_digest(&tx, &song.content_hash)?
                .context("Digest conflict reported but no song carries the digest")?;
            debug!(
                "Digest {} already stored as song {}",
                song.content_hash, existing.id
            );
            return Ok(NewSongOutcome::DigestExists(existing));
        }

        let song_id = tx.last_insert_rowid() as usize;
        insert_link(&tx, song.uploader_id, song_id)?;
        let stored = query_song(&tx, song_id)?.context("Inserted song vanished")?;
        tx.commit()?;
        Ok(NewSongOutcome::Inserted(stored))
    }

    fn link_song(&self, user_id: usize, song_id: usize) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        insert_link(&conn, user_id, song_id)
    }

    fn link_song_within_quota(
        &self,
        user_id: usize,
        song_id: usize,
        quota_bytes: u64,
    ) -> Result<LinkOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if query_in_library(&tx, user_id, song_id)? {
            return Ok(LinkOutcome::AlreadyLinked);
        }

        let filesize: u64 = match tx
            .query_row(
                &format!("SELECT filesize FROM {} WHERE id = ?1", SONG_TABLE_V_1.name),
                params![song_id],
                |row| row.get(0),
            )
            .optional()?
        {
            Some(size) => size,
            None => return Ok(LinkOutcome::SongGone),
        };

        let used_bytes = query_usage(&tx, user_id)?;
        if used_bytes.saturating_add(filesize) > quota_bytes {
            return Ok(LinkOutcome::QuotaExceeded {
                used_bytes,
                quota_bytes,
            });
        }

        let linked = insert_link(&tx, user_id, song_id)?;
        tx.commit()?;
        Ok(if linked {
            LinkOutcome::Linked
        } else {
            LinkOutcome::AlreadyLinked
        })
    }

    fn is_song_in_library(&self, user_id: usize, song_id: usize) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        query_in_library(&conn, user_id, song_id)
    }

    fn get_library_song(&self, user_id: usize, song_id: usize) -> Result<Option<Song>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!(
                "SELECT {} FROM {} s JOIN {} ul ON ul.song_id = s.id WHERE ul.user_id = ?1 AND s.id = ?2",
                SONG_COLUMNS, SONG_TABLE_V_1.name, USER_LIBRARY_TABLE_V_0.name
            ),
            params![user_id, song_id],
            |row| row_to_song(row, 0),
        )
        .optional()
        .with_context(|| format!("Failed to load song {} for user {}", song_id, user_id))
    }

    fn filter_library_song_ids(
        &self,
        user_id: usize,
        song_ids: &[usize],
    ) -> Result<HashSet<usize>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT 1 FROM {} WHERE user_id = ?1 AND song_id = ?2",
            USER_LIBRARY_TABLE_V_0.name
        ))?;
        let mut owned = HashSet::new();
        for song_id in song_ids {
            if stmt.exists(params![user_id, song_id])? {
                owned.insert(*song_id);
            }
        }
        Ok(owned)
    }

    fn list_library(&self, user_id: usize, query: &ListQuery) -> Result<Page<Song>> {
        let conn = self.conn.lock().unwrap();
        let pattern = query.like_pattern();

        let total: usize = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} s JOIN {} ul ON ul.song_id = s.id WHERE {}",
                SONG_TABLE_V_1.name, USER_LIBRARY_TABLE_V_0.name, LIBRARY_FILTER
            ),
            params![user_id, pattern],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} s JOIN {} ul ON ul.song_id = s.id WHERE {} \
             ORDER BY ul.added DESC, ul.id DESC LIMIT ?3 OFFSET ?4",
            SONG_COLUMNS,
            SONG_TABLE_V_1.name,
            USER_LIBRARY_TABLE_V_0.name,
            LIBRARY_FILTER
        ))?;
        let items = stmt
            .query_map(params![user_id, pattern, query.limit, query.offset], |row| {
                row_to_song(row, 0)
            })?
            .collect::<Result<Vec<Song>, _>>()
            .with_context(|| format!("Failed to list library of user {}", user_id))?;

        Ok(Page { items, total })
    }

    fn library_usage_bytes(&self, user_id: usize) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        query_usage(&conn, user_id)
    }

    fn remove_song_from_library(
        &self,
        user_id: usize,
        song_id: usize,
    ) -> Result<RemoveSongOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let filepath: Option<String> = tx
            .query_row(
                &format!(
                    "SELECT s.filepath FROM {} s JOIN {} ul ON ul.song_id = s.id WHERE s.id = ?1 AND ul.user_id = ?2",
                    SONG_TABLE_V_1.name, USER_LIBRARY_TABLE_V_0.name
                ),
                params![song_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(filepath) = filepath else {
            return Ok(RemoveSongOutcome::NotInLibrary);
        };

        tx.execute(
            &format!(
                "DELETE FROM {} WHERE song_id = ?1 AND playlist_id IN (SELECT id FROM {} WHERE owner_id = ?2)",
                PLAYLIST_SONG_TABLE_V_0.name, PLAYLIST_TABLE_V_1.name
            ),
            params![song_id, user_id],
        )
        .context("Failed to remove song from user playlists")?;
        tx.execute(
            &format!(
                "DELETE FROM {} WHERE user_id = ?1 AND song_id = ?2",
                USER_LIBRARY_TABLE_V_0.name
            ),
            params![user_id, song_id],
        )
        .context("Failed to remove song from library")?;

        let remaining: usize = tx.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE song_id = ?1",
                USER_LIBRARY_TABLE_V_0.name
            ),
            params![song_id],
            |row| row.get(0),
        )?;
        if remaining == 0 {
            tx.execute(
                &format!("DELETE FROM {} WHERE id = ?1", SONG_TABLE_V_1.name),
                params![song_id],
            )
            .with_context(|| format!("Failed to delete song {}", song_id))?;
        }
        tx.commit()?;

        Ok(RemoveSongOutcome::Removed {
            orphaned_file: (remaining == 0).then(|| PathBuf::from(filepath)),
        })
    }

    fn count_songs(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", SONG_TABLE_V_1.name),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl PlaylistStore for SqliteLibraryStore {
    fn get_playlist(&self, playlist_id: usize) -> Result<Option<Playlist>> {
        let conn = self.conn.lock().unwrap();
        query_playlist(&conn, playlist_id)
    }

    fn find_favorites_playlist(&self, owner_id: usize) -> Result<Option<Playlist>> {
        let conn = self.conn.lock().unwrap();
        query_favorites(&conn, owner_id)
    }

    fn insert_favorites_playlist(
        &self,
        owner_id: usize,
        name: &str,
        description: &str,
    ) -> Result<Option<Playlist>> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn
            .execute(
                &format!(
                    "INSERT INTO {} (owner_id, name, description, is_public, is_favorite) \
                     VALUES (?1, ?2, ?3, 0, 1) ON CONFLICT DO NOTHING",
                    PLAYLIST_TABLE_V_1.name
                ),
                params![owner_id, name, description],
            )
            .with_context(|| format!("Failed to create favorites playlist of user {}", owner_id))?;
        if inserted == 0 {
            return Ok(None);
        }
        query_playlist(&conn, conn.last_insert_rowid() as usize)
    }

    fn upsert_playlist(
        &self,
        owner_id: usize,
        request: &PlaylistUpsert,
    ) -> Result<PlaylistUpsertOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = if request.is_favorite {
            query_favorites(&tx, owner_id)?
        } else {
            tx.query_row(
                &format!(
                    "SELECT {} FROM {} p WHERE p.owner_id = ?1 AND lower(p.name) = lower(?2) ORDER BY p.id LIMIT 1",
                    PLAYLIST_COLUMNS, PLAYLIST_TABLE_V_1.name
                ),
                params![owner_id, request.name],
                row_to_playlist,
            )
            .optional()?
        };

        if let Some(existing) = existing {
            tx.execute(
                &format!(
                    "UPDATE {} SET name = ?1, description = COALESCE(?2, description), is_public = ?3, \
                     is_favorite = (is_favorite OR ?4), updated = {} WHERE id = ?5",
                    PLAYLIST_TABLE_V_1.name, DEFAULT_TIMESTAMP
                ),
                params![
                    request.name,
                    request.description,
                    request.is_public,
                    request.is_favorite,
                    existing.id
                ],
            )
            .with_context(|| format!("Failed to update playlist {}", existing.id))?;
            if request.replace_existing {
                let cleared = tx.execute(
                    &format!(
                        "DELETE FROM {} WHERE playlist_id = ?1",
                        PLAYLIST_SONG_TABLE_V_0.name
                    ),
                    params![existing.id],
                )?;
                debug!("Cleared {} songs from playlist {}", cleared, existing.id);
            }
            let updated = query_playlist(&tx, existing.id)?.context("Updated playlist vanished")?;
            tx.commit()?;
            return Ok(PlaylistUpsertOutcome::Updated(updated));
        }

        let insert = tx.execute(
            &format!(
                "INSERT INTO {} (owner_id, name, description, is_public, is_favorite) VALUES (?1, ?2, ?3, ?4, ?5)",
                PLAYLIST_TABLE_V_1.name
            ),
            params![
                owner_id,
                request.name,
                request.description,
                request.is_public,
                request.is_favorite
            ],
        );
        match insert {
            Ok(_) => {}
            Err(err) if request.is_favorite && is_unique_violation(&err) => {
                return Ok(PlaylistUpsertOutcome::FavoriteConflict);
            }
            Err(err) => return Err(err).context("Failed to create playlist"),
        }

        let created = query_playlist(&tx, tx.last_insert_rowid() as usize)?
            .context("Created playlist vanished")?;
        tx.commit()?;
        Ok(PlaylistUpsertOutcome::Created(created))
    }

    fn delete_playlist(&self, playlist_id: usize) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .execute(
                &format!("DELETE FROM {} WHERE id = ?1", PLAYLIST_TABLE_V_1.name),
                params![playlist_id],
            )
            .with_context(|| format!("Failed to delete playlist {}", playlist_id))?;
        Ok(deleted > 0)
    }

    fn list_playlists(&self, owner_id: usize, query: &ListQuery) -> Result<Page<PlaylistSummary>> {
        let conn = self.conn.lock().unwrap();
        let pattern = query.like_pattern();

        let total: usize = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} p WHERE {}",
                PLAYLIST_TABLE_V_1.name, PLAYLIST_FILTER
            ),
            params![owner_id, pattern],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {}, (SELECT COUNT(*) FROM {} ps WHERE ps.playlist_id = p.id) \
             FROM {} p WHERE {} \
             ORDER BY p.is_favorite DESC, p.created DESC, p.id DESC LIMIT ?3 OFFSET ?4",
            PLAYLIST_COLUMNS,
            PLAYLIST_SONG_TABLE_V_0.name,
            PLAYLIST_TABLE_V_1.name,
            PLAYLIST_FILTER
        ))?;
        let items = stmt
            .query_map(params![owner_id, pattern, query.limit, query.offset], |row| {
                Ok(PlaylistSummary {
                    playlist: row_to_playlist(row)?,
                    song_count: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to list playlists of user {}", owner_id))?;

        Ok(Page { items, total })
    }

    fn list_playlist_songs(
        &self,
        playlist_id: usize,
        query: &ListQuery,
    ) -> Result<Page<PlaylistSong>> {
        let conn = self.conn.lock().unwrap();

        let total: usize = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE playlist_id = ?1",
                PLAYLIST_SONG_TABLE_V_0.name
            ),
            params![playlist_id],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT ps.position, {} FROM {} ps JOIN {} s ON s.id = ps.song_id \
             WHERE ps.playlist_id = ?1 ORDER BY ps.position LIMIT ?2 OFFSET ?3",
            SONG_COLUMNS,
            PLAYLIST_SONG_TABLE_V_0.name,
            SONG_TABLE_V_1.name
        ))?;
        let items = stmt
            .query_map(params![playlist_id, query.limit, query.offset], |row| {
                Ok(PlaylistSong {
                    position: row.get(0)?,
                    song: row_to_song(row, 1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to list songs of playlist {}", playlist_id))?;

        Ok(Page { items, total })
    }

    fn filter_playlist_song_ids(
        &self,
        playlist_id: usize,
        song_ids: &[usize],
    ) -> Result<HashSet<usize>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT 1 FROM {} WHERE playlist_id = ?1 AND song_id = ?2",
            PLAYLIST_SONG_TABLE_V_0.name
        ))?;
        let mut present = HashSet::new();
        for song_id in song_ids {
            if stmt.exists(params![playlist_id, song_id])? {
                present.insert(*song_id);
            }
        }
        Ok(present)
    }

    fn append_song(
        &self,
        playlist_id: usize,
        user_id: usize,
        song_id: usize,
    ) -> Result<AppendOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(playlist) = query_playlist(&tx, playlist_id)? else {
            return Ok(AppendOutcome::PlaylistNotFound);
        };
        if playlist.owner_id != user_id {
            return Ok(AppendOutcome::NotOwner);
        }
        if !query_in_library(&tx, user_id, song_id)? {
            return Ok(AppendOutcome::SongNotInLibrary);
        }
        let present: bool = tx.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE playlist_id = ?1 AND song_id = ?2)",
                PLAYLIST_SONG_TABLE_V_0.name
            ),
            params![playlist_id, song_id],
            |row| row.get(0),
        )?;
        if present {
            return Ok(AppendOutcome::AlreadyPresent);
        }

        let position = max_position(&tx, playlist_id)? + 1;
        tx.execute(
            &format!(
                "INSERT INTO {} (playlist_id, song_id, position) VALUES (?1, ?2, ?3)",
                PLAYLIST_SONG_TABLE_V_0.name
            ),
            params![playlist_id, song_id, position],
        )
        .with_context(|| format!("Failed to add song {} to playlist {}", song_id, playlist_id))?;
        touch_playlist(&tx, playlist_id)?;
        tx.commit()?;

        Ok(AppendOutcome::Appended { position })
    }

    fn append_songs(&self, playlist_id: usize, song_ids: &[usize]) -> Result<Vec<(usize, i64)>> {
        let mut conn = self.conn.lock().unwrap();
        // IMMEDIATE takes the write lock up front: MAX(position) cannot move
        // under us until commit.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut next_position = max_position(&tx, playlist_id)? + 1;
        let mut appended = Vec::with_capacity(song_ids.len());
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (playlist_id, song_id, position) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(playlist_id, song_id) DO NOTHING",
                PLAYLIST_SONG_TABLE_V_0.name
            ))?;
            for song_id in song_ids {
                let inserted = stmt
                    .execute(params![playlist_id, song_id, next_position])
                    .with_context(|| {
                        format!("Failed to add song {} to playlist {}", song_id, playlist_id)
                    })?;
                if inserted > 0 {
                    appended.push((*song_id, next_position));
                    next_position += 1;
                }
            }
        }
        if !appended.is_empty() {
            touch_playlist(&tx, playlist_id)?;
        }
        tx.commit()?;

        Ok(appended)
    }
}
