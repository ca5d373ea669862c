use axum::{extract::Path, extract::State, http::StatusCode, Json};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use tracing::info;

use crate::auth::{generate_session_id, generate_token, hash_password, verify_password};
use crate::db::{
    create_api_token, create_session, create_user, delete_api_token, delete_session,
    get_user_by_username, list_api_tokens, now_ts,
};
use crate::error::AppError;
use crate::handlers::respond;
use crate::middleware::SessionAuth;
use crate::models::{
    ApiToken, CreateApiToken, Envelope, LoginRequest, PublicUser, RegisterRequest, Session,
};
use crate::AppState;

const SESSION_TTL_SECS: i64 = 7 * 24 * 60 * 60;
const MAX_USERNAME_LEN: usize = 50;
const MIN_PASSWORD_LEN: usize = 8;

type Reply<T> = Result<(StatusCode, Json<Envelope<T>>), AppError>;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Reply<PublicUser> {
    let username = req.username.trim();
    if username.is_empty() || username.chars().count() > MAX_USERNAME_LEN {
        return Err(AppError::field("username", "must be 1 to 50 characters"));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::field("password", "must be at least 8 characters"));
    }
    if get_user_by_username(&state.db, username)?.is_some() {
        return Err(AppError::field("username", "is already taken"));
    }

    let user = create_user(&state.db, username, &hash_password(&req.password))?;
    info!(id = user.id, username = %user.username, "Registered user");
    Ok(respond(
        StatusCode::CREATED,
        "User registered",
        PublicUser {
            id: user.id,
            username: user.username,
            created_at: user.created_at,
        },
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, (StatusCode, Json<Envelope<PublicUser>>)), AppError> {
    let user = get_user_by_username(&state.db, req.username.trim())?;
    let user = match user {
        Some(u) if verify_password(&req.password, &u.password_hash) => u,
        // The same outcome whether the user exists or not.
        _ => return Err(AppError::Unauthorized),
    };

    let session_id = generate_session_id();
    let now = now_ts();
    let session = Session {
        id: session_id.clone(),
        user_id: user.id,
        created_at: now,
        expires_at: now + SESSION_TTL_SECS,
    };
    create_session(&state.db, &session)?;
    info!(user_id = user.id, "User logged in");

    let cookie = Cookie::build(("session", session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::days(7));

    Ok((
        jar.add(cookie),
        respond(
            StatusCode::OK,
            "Logged in",
            PublicUser {
                id: user.id,
                username: user.username,
                created_at: user.created_at,
            },
        ),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, (StatusCode, Json<Envelope<()>>)), AppError> {
    if let Some(session_cookie) = jar.get("session") {
        delete_session(&state.db, session_cookie.value())?;
    }
    info!("User logged out");

    let cookie = Cookie::build(("session", ""))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::seconds(0));

    Ok((
        jar.remove(cookie),
        respond(StatusCode::OK, "Logged out", ()),
    ))
}

pub async fn list_tokens(
    SessionAuth(user_id): SessionAuth,
    State(state): State<AppState>,
) -> Reply<Vec<ApiToken>> {
    let tokens = list_api_tokens(&state.db, user_id)?;
    Ok(respond(StatusCode::OK, "Tokens retrieved", tokens))
}

pub async fn create_token(
    SessionAuth(user_id): SessionAuth,
    State(state): State<AppState>,
    Json(req): Json<CreateApiToken>,
) -> Reply<ApiToken> {
    let token_value = generate_token();
    let token = create_api_token(&state.db, user_id, &token_value, req.name.as_deref())?;
    info!(user_id, name = ?req.name, "Created API token");
    Ok(respond(StatusCode::CREATED, "Token created", token))
}

pub async fn revoke_token(
    SessionAuth(user_id): SessionAuth,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Reply<()> {
    if delete_api_token(&state.db, user_id, id)? {
        info!(user_id, id, "Revoked API token");
        Ok(respond(StatusCode::OK, "Token revoked", ()))
    } else {
        Err(AppError::NotFound)
    }
}
