use axum::http::{header::AUTHORIZATION, request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{extract::FromRequestParts, Json};
use tracing::warn;

use crate::db::{get_session, get_token_user, now_ts, DbPool};
use crate::error::{error_envelope, AppError};
use crate::AppState;

/// The resolved principal for a request, via session cookie or API token.
/// Handlers trust this id completely and never re-derive it.
pub struct Auth(pub i64);

/// A principal resolved via session cookie only (API tokens rejected).
/// Token management endpoints require a browser session.
pub struct SessionAuth(pub i64);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user_id) = check_session(parts, &state.db) {
            return Ok(Auth(user_id));
        }

        if let Some(user_id) = check_bearer_token(parts, &state.db)? {
            return Ok(Auth(user_id));
        }

        warn!("Unauthorized API access attempt");
        Err(AuthError::Unauthorized)
    }
}

impl FromRequestParts<AppState> for SessionAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user_id) = check_session(parts, &state.db) {
            return Ok(SessionAuth(user_id));
        }

        Err(AuthError::Unauthorized)
    }
}

fn check_session(parts: &Parts, db: &DbPool) -> Option<i64> {
    let cookies = parts
        .headers
        .get_all("cookie")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|s| s.split(';'))
        .filter_map(|s| {
            let mut parts = s.trim().splitn(2, '=');
            Some((parts.next()?, parts.next()?))
        });

    for (name, value) in cookies {
        if name == "session" {
            if let Ok(Some(session)) = get_session(db, value) {
                if session.expires_at > now_ts() {
                    return Some(session.user_id);
                }
            }
        }
    }
    None
}

fn check_bearer_token(parts: &Parts, db: &DbPool) -> Result<Option<i64>, AppError> {
    if let Some(auth_header) = parts.headers.get(AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return get_token_user(db, token);
            }
        }
    }
    Ok(None)
}

pub enum AuthError {
    Unauthorized,
    Internal(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            AuthError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(error_envelope(
                    StatusCode::UNAUTHORIZED,
                    "UNAUTHORIZED",
                    "Unauthorized".to_string(),
                    None,
                )),
            )
                .into_response(),
            AuthError::Internal(msg) => {
                tracing::error!(error = %msg, "auth lookup failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(error_envelope(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "Internal server error".to_string(),
                        None,
                    )),
                )
                    .into_response()
            }
        }
    }
}

impl From<AppError> for AuthError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(msg) => AuthError::Internal(msg),
            _ => AuthError::Unauthorized,
        }
    }
}
