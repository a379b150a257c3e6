use super::state::ServerState;
use crate::library::AuthTokenValue;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde_json::json;
use tracing::{debug, error};

#[derive(Debug)]
pub struct Session {
    pub user_id: usize,
}

pub const COOKIE_SESSION_TOKEN_KEY: &str = "session_token";
pub const HEADER_SESSION_TOKEN_KEY: &str = "Authorization";

#[derive(Debug)]
pub enum SessionExtractionError {
    Unauthorized,
    InternalError,
}

impl IntoResponse for SessionExtractionError {
    fn into_response(self) -> axum::response::Response {
        match self {
            SessionExtractionError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Unauthorized", "reason": "unauthorized"})),
            )
                .into_response(),
            SessionExtractionError::InternalError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal server error", "reason": "internal_error"})),
            )
                .into_response(),
        }
    }
}

async fn extract_session_token_from_cookies(
    parts: &mut Parts,
    ctx: &ServerState,
) -> Option<AuthTokenValue> {
    let jar = match CookieJar::from_request_parts(parts, ctx).await {
        Ok(jar) => jar,
        Err(e) => match e {},
    };
    jar.get(COOKIE_SESSION_TOKEN_KEY)
        .map(Cookie::value)
        .filter(|v| !v.is_empty())
        .map(|v| AuthTokenValue(v.to_string()))
}

fn extract_session_token_from_headers(parts: &Parts) -> Option<AuthTokenValue> {
    parts
        .headers
        .get(HEADER_SESSION_TOKEN_KEY)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .and_then(|raw| AuthTokenValue::from_header(&raw))
}

async fn extract_session_from_request_parts(
    parts: &mut Parts,
    ctx: &ServerState,
) -> Result<Option<Session>, SessionExtractionError> {
    let token = match extract_session_token_from_headers(parts) {
        Some(token) => token,
        None => match extract_session_token_from_cookies(parts, ctx).await {
            Some(token) => token,
            None => {
                debug!("No token in headers nor cookies.");
                return Ok(None);
            }
        },
    };

    let auth_token = match ctx.store.get_auth_token(&token) {
        Ok(Some(auth_token)) => auth_token,
        Ok(None) => {
            debug!("Auth token not found in database");
            return Ok(None);
        }
        Err(e) => {
            error!("Failed to get auth token from database: {:#}", e);
            return Err(SessionExtractionError::InternalError);
        }
    };

    if let Err(e) = ctx.store.update_auth_token_last_used(&token) {
        debug!("Failed to update auth token last_used timestamp: {}", e);
    }

    Ok(Some(Session {
        user_id: auth_token.user_id,
    }))
}

impl FromRequestParts<ServerState> for Session {
    type Rejection = SessionExtractionError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        extract_session_from_request_parts(parts, ctx)
            .await?
            .ok_or(SessionExtractionError::Unauthorized)
    }
}
