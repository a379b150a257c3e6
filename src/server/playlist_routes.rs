//! Playlists, favorites and playlist membership

use super::api_error::{parse_id, ApiError};
use super::session::Session;
use super::state::ServerState;
use crate::library::{ListParams, ListQuery};
use crate::playlist::{BulkAppendBody, BulkAppendReport, PlaylistRequest};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

#[derive(Deserialize, Debug)]
struct AddSongBody {
    song_id: i64,
}

#[derive(Serialize)]
struct BulkAppendResponse {
    message: String,
    #[serde(flatten)]
    report: BulkAppendReport,
}

/// Unwraps a JSON body, reporting malformed input as `invalid_request`.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            debug!("Rejected request body: {}", rejection);
            Err(ApiError::invalid_request(rejection.body_text()))
        }
    }
}

async fn list_playlists(
    session: Session,
    State(state): State<ServerState>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let query = ListQuery::from_params(&params);
    let page = state.playlists.list(session.user_id, &query)?;
    Ok(Json(page.into_envelope(&query)).into_response())
}

async fn post_playlist(
    session: Session,
    State(state): State<ServerState>,
    body: Result<Json<PlaylistRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(body)?;
    let (playlist, created) = state.playlists.create_or_update(session.user_id, request)?;
    let message = if created {
        "Playlist created"
    } else {
        "Playlist updated"
    };
    Ok(Json(json!({
        "message": message,
        "playlist_id": playlist.id,
        "created": created,
        "playlist": playlist,
    }))
    .into_response())
}

async fn ensure_favorites(
    session: Session,
    State(state): State<ServerState>,
) -> Result<Response, ApiError> {
    let (playlist, created) = state.playlists.ensure_favorites(session.user_id)?;
    Ok(Json(json!({
        "playlist_id": playlist.id,
        "created": created,
    }))
    .into_response())
}

async fn delete_playlist(
    session: Session,
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let playlist_id = parse_id(&id, "playlist")?;
    state.playlists.delete(session.user_id, playlist_id)?;
    Ok(Json(json!({"message": "Playlist deleted"})).into_response())
}

async fn list_playlist_songs(
    session: Session,
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let playlist_id = parse_id(&id, "playlist")?;
    let query = ListQuery::from_params(&params);
    let page = state
        .playlists
        .list_songs(session.user_id, playlist_id, &query)?;
    Ok(Json(page.into_envelope(&query)).into_response())
}

async fn add_playlist_song(
    session: Session,
    State(state): State<ServerState>,
    Path(id): Path<String>,
    body: Result<Json<AddSongBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let playlist_id = parse_id(&id, "playlist")?;
    let body = json_body(body)?;
    if body.song_id <= 0 {
        return Err(ApiError::invalid_request("song_id must be a positive integer"));
    }
    let position = state
        .playlists
        .append(session.user_id, playlist_id, body.song_id as usize)?;
    Ok(Json(json!({
        "message": "Song added to playlist",
        "position": position,
    }))
    .into_response())
}

async fn bulk_add_playlist_songs(
    session: Session,
    State(state): State<ServerState>,
    Path(id): Path<String>,
    body: Result<Json<BulkAppendBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let playlist_id = parse_id(&id, "playlist")?;
    let body = json_body(body)?;
    let report = state
        .playlists
        .bulk_append(session.user_id, playlist_id, &body.song_ids)?;
    Ok(Json(BulkAppendResponse {
        message: format!("Added {} songs to playlist", report.added_count),
        report,
    })
    .into_response())
}

pub fn playlist_routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(list_playlists).post(post_playlist))
        .route("/favorites", post(ensure_favorites))
        .route("/{id}", delete(delete_playlist))
        .route(
            "/{id}/songs",
            get(list_playlist_songs).post(add_playlist_song),
        )
        .route("/{id}/songs/bulk", post(bulk_add_playlist_songs))
}
