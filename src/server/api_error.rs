use crate::playlist::PlaylistError;
use crate::upload::{UploadError, ALLOWED_FORMATS};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use tracing::error;

/// An error on its way out to the client as
/// `{"error": <message>, "reason": <code>, ...extra}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub reason: &'static str,
    pub message: String,
    pub extra: Map<String, Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, reason: &'static str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            reason,
            message: message.into(),
            extra: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn internal() -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Internal server error",
        )
    }
}

/// Parses a positive numeric path identifier. Ids are SQLite rowids, so
/// anything beyond `i64::MAX` is rejected like any other malformed id.
pub fn parse_id(raw: &str, what: &str) -> Result<usize, ApiError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .and_then(|id| usize::try_from(id).ok())
        .ok_or_else(|| ApiError::invalid_request(format!("Invalid {} ID", what)))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = self.extra;
        body.insert("error".to_string(), Value::String(self.message));
        body.insert("reason".to_string(), Value::String(self.reason.to_string()));
        (self.status, Json(Value::Object(body))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Request failed: {:#}", err);
        ApiError::internal()
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        let message = err.to_string();
        let reason = err.reason();
        match err {
            UploadError::FileMissing | UploadError::FileEmpty | UploadError::Read(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, reason, message)
            }
            UploadError::FileTooLarge { max_upload_bytes } => {
                ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, reason, message)
                    .with("max_upload_bytes", max_upload_bytes)
            }
            UploadError::UnsupportedMime { detected_mime } => {
                ApiError::new(StatusCode::BAD_REQUEST, reason, message)
                    .with("detected_mime", detected_mime)
                    .with("allowed_formats", json!(ALLOWED_FORMATS))
            }
            UploadError::ParallelUploadLimit => {
                ApiError::new(StatusCode::TOO_MANY_REQUESTS, reason, message)
            }
            UploadError::QuotaExceeded {
                used_bytes,
                quota_bytes,
            } => ApiError::new(StatusCode::INSUFFICIENT_STORAGE, reason, message)
                .with("used_bytes", used_bytes)
                .with("quota_bytes", quota_bytes),
            UploadError::Io(e) => {
                error!("Upload failed on I/O: {}", e);
                ApiError::internal()
            }
            UploadError::Store(e) => e.into(),
        }
    }
}

impl From<PlaylistError> for ApiError {
    fn from(err: PlaylistError) -> Self {
        let message = err.to_string();
        match err {
            PlaylistError::NotFound => ApiError::not_found(message),
            PlaylistError::Forbidden | PlaylistError::SongNotInLibrary => {
                ApiError::new(StatusCode::FORBIDDEN, "forbidden", message)
            }
            PlaylistError::AlreadyPresent => {
                ApiError::new(StatusCode::CONFLICT, "already_in_playlist", message)
            }
            PlaylistError::FavoritesUndeletable => {
                ApiError::new(StatusCode::BAD_REQUEST, "favorites_undeletable", message)
            }
            PlaylistError::Invalid(message) => ApiError::invalid_request(message),
            PlaylistError::Store(e) => e.into(),
        }
    }
}
