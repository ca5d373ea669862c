use axum::extract::{Path, State};
use axum::{http::StatusCode, Json};
use tracing::info;

use crate::error::AppError;
use crate::handlers::respond;
use crate::middleware::Auth;
use crate::models::{Envelope, SetPreference, ViewPreference};
use crate::service;
use crate::AppState;

type Reply<T> = Result<(StatusCode, Json<Envelope<T>>), AppError>;

pub async fn list(
    Auth(user_id): Auth,
    State(state): State<AppState>,
) -> Reply<Vec<ViewPreference>> {
    let prefs = service::list_preferences(&state.db, user_id)?;
    Ok(respond(StatusCode::OK, "Preferences retrieved", prefs))
}

pub async fn set(
    Auth(user_id): Auth,
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<SetPreference>,
) -> Reply<ViewPreference> {
    let pref = service::set_preference(&state.db, user_id, &key, &req.value)?;
    info!(user_id, key = %pref.key, "Saved view preference");
    Ok(respond(StatusCode::OK, "Preference saved", pref))
}
