//! Library listing, song detail, download and removal

use super::api_error::{parse_id, ApiError};
use super::session::Session;
use super::state::ServerState;
use crate::library::{remove_blob, ListParams, ListQuery, RemoveSongOutcome};

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio::{fs::File, io::BufReader};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

const STREAM_CHUNK_SIZE: usize = 4096 * 16;
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Makes a filename safe to embed in a quoted header value.
fn sanitize_header_filename(name: &str) -> String {
    let safe: String = name
        .chars()
        .filter(|c| *c != '\r' && *c != '\n' && *c != '"')
        .collect();
    let safe = safe.trim();
    if safe.is_empty() {
        "file".to_string()
    } else {
        safe.to_string()
    }
}

async fn list_songs(
    session: Session,
    State(state): State<ServerState>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let query = ListQuery::from_params(&params);
    let page = state.store.list_library(session.user_id, &query)?;
    Ok(Json(page.into_envelope(&query)).into_response())
}

async fn get_song(
    session: Session,
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let song_id = parse_id(&id, "song")?;
    match state.store.get_library_song(session.user_id, song_id)? {
        Some(song) => Ok(Json(song).into_response()),
        None => Err(ApiError::not_found("Song not found")),
    }
}

async fn download_song(
    session: Session,
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let song_id = parse_id(&id, "song")?;
    let song = state
        .store
        .get_library_song(session.user_id, song_id)?
        .ok_or_else(|| ApiError::not_found("Song not found"))?;
    debug!("Serving song {} from {}", song.id, song.filepath.display());

    let file = match File::open(&song.filepath).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error!("File of song {} is missing: {:?}", song.id, song.filepath);
            return Err(ApiError::not_found("Song file not found"));
        }
        Err(e) => {
            error!("Failed to open {:?}: {}", song.filepath, e);
            return Err(ApiError::internal());
        }
    };
    let file_length = match file.metadata().await {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            error!("Failed to stat {:?}: {}", song.filepath, e);
            return Err(ApiError::internal());
        }
    };

    let file_reader = BufReader::with_capacity(STREAM_CHUNK_SIZE, file);
    let body = Body::from_stream(ReaderStream::with_capacity(file_reader, STREAM_CHUNK_SIZE));
    let mime_type = song.mime_type.as_deref().unwrap_or(FALLBACK_MIME_TYPE);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_type)
        .header(header::CONTENT_LENGTH, file_length)
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"",
                sanitize_header_filename(&song.original_filename)
            ),
        )
        .body(body)
        .map_err(|e| {
            error!("Failed to build download response: {}", e);
            ApiError::internal()
        })
}

async fn delete_song(
    session: Session,
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let song_id = parse_id(&id, "song")?;
    match state.store.remove_song_from_library(session.user_id, song_id)? {
        RemoveSongOutcome::NotInLibrary => Err(ApiError::not_found("Song not found in your library")),
        RemoveSongOutcome::Removed { orphaned_file } => {
            let song_deleted = orphaned_file.is_some();
            if let Some(path) = orphaned_file {
                remove_blob(&path).await;
            }
            info!(
                "User {} removed song {} from library (song deleted: {})",
                session.user_id, song_id, song_deleted
            );
            Ok(Json(json!({
                "message": "Song removed from your library",
                "song_deleted": song_deleted,
            }))
            .into_response())
        }
    }
}

#[derive(Serialize, Debug, PartialEq)]
struct StorageUsage {
    used_bytes: u64,
    quota_bytes: u64,
    remaining_bytes: u64,
}

impl StorageUsage {
    fn new(used_bytes: u64, quota_bytes: u64) -> Self {
        StorageUsage {
            used_bytes,
            quota_bytes,
            remaining_bytes: quota_bytes.saturating_sub(used_bytes),
        }
    }
}

async fn get_storage_usage(
    session: Session,
    State(state): State<ServerState>,
) -> Result<Response, ApiError> {
    let quota = state.uploads.quota();
    let used = quota.current_usage(session.user_id)?;
    Ok(Json(StorageUsage::new(used, quota.quota_bytes())).into_response())
}

pub fn song_routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(list_songs))
        .route("/{id}", get(get_song).delete(delete_song))
        .route("/{id}/download", get(download_song))
}

pub fn storage_routes() -> Router<ServerState> {
    Router::new().route("/usage", get(get_storage_usage))
}
