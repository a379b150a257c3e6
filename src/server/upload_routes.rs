//! Multipart song upload

use super::api_error::ApiError;
use super::session::Session;
use super::state::ServerState;
use crate::library::{Song, SongMetadata};
use crate::upload::{StagedContent, UploadError, UploadReceipt, UploadRequest};

use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, State},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

const FILE_FIELD: &str = "file";

#[derive(Serialize)]
struct UploadedSong<'a> {
    id: usize,
    filename: &'a str,
    original_filename: &'a str,
    filesize: u64,
    mime_type: Option<&'a str>,
}

impl<'a> From<&'a Song> for UploadedSong<'a> {
    fn from(song: &'a Song) -> Self {
        UploadedSong {
            id: song.id,
            filename: &song.filename,
            original_filename: &song.original_filename,
            filesize: song.filesize,
            mime_type: song.mime_type.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct UploadResponse<'a> {
    message: &'static str,
    song_id: usize,
    deduplicated: bool,
    song: UploadedSong<'a>,
}

fn upload_message(receipt: &UploadReceipt) -> &'static str {
    match (receipt.deduplicated, receipt.newly_linked) {
        (false, _) => "Song uploaded successfully",
        (true, true) => "Song already exists on server. Access granted",
        (true, false) => "Song already exists in your library",
    }
}

async fn text_value(field: Field<'_>) -> Result<Option<String>, UploadError> {
    let value = field
        .text()
        .await
        .map_err(|e| UploadError::Read(e.to_string()))?;
    let value = value.trim();
    Ok(if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    })
}

fn declared_part_size(field: &Field<'_>) -> Option<u64> {
    field
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Reads every part of the form. The file is staged as it streams by, so it
/// may come before or after the descriptive fields.
async fn read_form(
    state: &ServerState,
    multipart: &mut Multipart,
    request: &mut UploadRequest,
) -> Result<StagedContent, UploadError> {
    let mut staged: Option<StagedContent> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(UploadError::Read(e.to_string())),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FILE_FIELD if staged.is_none() => {
                request.original_filename = field.file_name().unwrap_or_default().to_string();
                let declared = declared_part_size(&field);
                staged = Some(state.uploads.stage(declared, field).await?);
            }
            FILE_FIELD => debug!("Ignoring extra file part"),
            "title" => request.metadata.title = text_value(field).await?,
            "artist" => request.metadata.artist = text_value(field).await?,
            "album" => request.metadata.album = text_value(field).await?,
            "genre" => request.metadata.genre = text_value(field).await?,
            "year" => {
                request.metadata.year = text_value(field)
                    .await?
                    .and_then(|v| v.parse::<i32>().ok())
            }
            other => debug!("Ignoring unknown form field {:?}", other),
        }
    }

    staged.ok_or(UploadError::FileMissing)
}

/// POST /upload - stores a song in the caller's library, sharing the stored
/// content with any identical upload.
async fn upload_song(
    session: Session,
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> Response {
    let start = Instant::now();

    let result = async {
        let _permit = state.uploads.try_admit()?;
        state
            .metrics
            .set_uploads_in_flight(state.uploads.admission().in_flight());

        let mut request = UploadRequest {
            original_filename: String::new(),
            metadata: SongMetadata::default(),
        };
        let staged = read_form(&state, &mut multipart, &mut request).await?;
        state.uploads.commit(session.user_id, &request, staged).await
    }
    .await;

    state
        .metrics
        .set_uploads_in_flight(state.uploads.admission().in_flight());

    match result {
        Ok(receipt) => {
            let (outcome, stored) = if receipt.deduplicated {
                ("deduplicated", 0)
            } else {
                ("created", receipt.song.filesize)
            };
            state
                .metrics
                .record_upload(outcome, "", stored, start.elapsed());
            info!(
                "User {} uploaded song {} ({})",
                session.user_id, receipt.song.id, outcome
            );
            Json(UploadResponse {
                message: upload_message(&receipt),
                song_id: receipt.song.id,
                deduplicated: receipt.deduplicated,
                song: UploadedSong::from(&receipt.song),
            })
            .into_response()
        }
        Err(err) => {
            warn!("Upload of user {} rejected: {}", session.user_id, err);
            state
                .metrics
                .record_upload("rejected", err.reason(), 0, start.elapsed());
            ApiError::from(err).into_response()
        }
    }
}

pub fn upload_routes() -> Router<ServerState> {
    // The size cap is enforced while streaming to disk.
    Router::new()
        .route("/upload", post(upload_song))
        .layer(DefaultBodyLimit::disable())
}
