use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, UniqueIndex, VersionedSchema,
    DEFAULT_TIMESTAMP,
};
use rusqlite::Connection;

const USER_FK: ForeignKey = ForeignKey {
    foreign_table: "user",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const UPLOADER_FK: ForeignKey = ForeignKey {
    foreign_table: "user",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::SetNull,
};

const SONG_FK: ForeignKey = ForeignKey {
    foreign_table: "song",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const PLAYLIST_FK: ForeignKey = ForeignKey {
    foreign_table: "playlist",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

/// V 0
pub const USER_TABLE_V_0: Table = Table {
    name: "user",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_unique = true
        ),
        sqlite_column!("handle", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
    unique_constraints: &[],
    unique_indices: &[],
};

pub const AUTH_TOKEN_TABLE_V_0: Table = Table {
    name: "auth_token",
    columns: &[
        sqlite_column!(
            "user_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&USER_FK)
        ),
        sqlite_column!("value", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!("last_used", &SqlType::Integer),
    ],
    indices: &[("idx_auth_token_user_id", "user_id")],
    unique_constraints: &[],
    unique_indices: &[],
};

/// Songs as first recorded, before content digests existed.
pub const SONG_TABLE_V_0: Table = Table {
    name: "song",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("filename", &SqlType::Text, non_null = true),
        sqlite_column!("original_filename", &SqlType::Text, non_null = true),
        sqlite_column!("filepath", &SqlType::Text, non_null = true),
        sqlite_column!("filesize", &SqlType::Integer, non_null = true),
        sqlite_column!("mime_type", &SqlType::Text),
        sqlite_column!("artist", &SqlType::Text),
        sqlite_column!("title", &SqlType::Text),
        sqlite_column!("album", &SqlType::Text),
        sqlite_column!("genre", &SqlType::Text),
        sqlite_column!("year", &SqlType::Integer),
        sqlite_column!(
            "uploader_id",
            &SqlType::Integer,
            foreign_key = Some(&UPLOADER_FK)
        ),
        sqlite_column!(
            "upload_date",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_song_filesize", "filesize")],
    unique_constraints: &[],
    unique_indices: &[],
};

pub const USER_LIBRARY_TABLE_V_0: Table = Table {
    name: "user_library",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "user_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&USER_FK)
        ),
        sqlite_column!(
            "song_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&SONG_FK)
        ),
        sqlite_column!(
            "added",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_user_library_song_id", "song_id")],
    unique_constraints: &[&["user_id", "song_id"]],
    unique_indices: &[],
};

pub const PLAYLIST_TABLE_V_0: Table = Table {
    name: "playlist",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "owner_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&USER_FK)
        ),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text),
        sqlite_column!(
            "is_public",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "is_favorite",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "created",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!(
            "updated",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_playlist_owner_id", "owner_id")],
    unique_constraints: &[],
    unique_indices: &[],
};

pub const PLAYLIST_SONG_TABLE_V_0: Table = Table {
    name: "playlist_song",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "playlist_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&PLAYLIST_FK)
        ),
        sqlite_column!(
            "song_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&SONG_FK)
        ),
        sqlite_column!("position", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "added",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_playlist_song_song_id", "song_id")],
    unique_constraints: &[&["playlist_id", "position"], &["playlist_id", "song_id"]],
    unique_indices: &[],
};

/// V 1
/// Adds the content digest used for deduplication and the per-owner
/// favorites singleton. Rows migrated from V 0 keep a NULL digest until
/// the upload path backfills them.
pub const SONG_TABLE_V_1: Table = Table {
    name: "song",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("filename", &SqlType::Text, non_null = true),
        sqlite_column!("original_filename", &SqlType::Text, non_null = true),
        sqlite_column!("filepath", &SqlType::Text, non_null = true),
        sqlite_column!("filesize", &SqlType::Integer, non_null = true),
        sqlite_column!("mime_type", &SqlType::Text),
        sqlite_column!("artist", &SqlType::Text),
        sqlite_column!("title", &SqlType::Text),
        sqlite_column!("album", &SqlType::Text),
        sqlite_column!("genre", &SqlType::Text),
        sqlite_column!("year", &SqlType::Integer),
        sqlite_column!(
            "uploader_id",
            &SqlType::Integer,
            foreign_key = Some(&UPLOADER_FK)
        ),
        sqlite_column!(
            "upload_date",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!("content_hash", &SqlType::Text),
    ],
    indices: &[("idx_song_filesize", "filesize")],
    unique_constraints: &[],
    unique_indices: &[UniqueIndex {
        name: "idx_song_content_hash",
        columns: &["content_hash"],
        predicate: None,
    }],
};

pub const PLAYLIST_TABLE_V_1: Table = Table {
    name: "playlist",
    columns: PLAYLIST_TABLE_V_0.columns,
    indices: PLAYLIST_TABLE_V_0.indices,
    unique_constraints: &[],
    unique_indices: &[UniqueIndex {
        name: "idx_playlist_owner_favorite",
        columns: &["owner_id"],
        predicate: Some("is_favorite = 1"),
    }],
};

pub const VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[
            USER_TABLE_V_0,
            AUTH_TOKEN_TABLE_V_0,
            SONG_TABLE_V_0,
            USER_LIBRARY_TABLE_V_0,
            PLAYLIST_TABLE_V_0,
            PLAYLIST_SONG_TABLE_V_0,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[
            USER_TABLE_V_0,
            AUTH_TOKEN_TABLE_V_0,
            SONG_TABLE_V_1,
            USER_LIBRARY_TABLE_V_0,
            PLAYLIST_TABLE_V_1,
            PLAYLIST_SONG_TABLE_V_0,
        ],
        migration: Some(|conn: &Connection| {
            conn.execute("ALTER TABLE song ADD COLUMN content_hash TEXT", [])?;
            SONG_TABLE_V_1.unique_indices[0].create(conn, SONG_TABLE_V_1.name)?;

            // Older data may hold several favorites per owner; keep the oldest.
            conn.execute(
                "UPDATE playlist SET is_favorite = 0
                 WHERE is_favorite = 1
                   AND id NOT IN (SELECT MIN(id) FROM playlist WHERE is_favorite = 1 GROUP BY owner_id)",
                [],
            )?;
            PLAYLIST_TABLE_V_1.unique_indices[0].create(conn, PLAYLIST_TABLE_V_1.name)?;
            Ok(())
        }),
    },
];
