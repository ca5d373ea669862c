pub mod auth;
pub mod client;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod service;

use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};
use db::DbPool;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/api/register", post(handlers::auth::register))
        .route("/api/login", post(handlers::auth::login))
        .route("/api/logout", post(handlers::auth::logout))
        .route("/api/tokens", get(handlers::auth::list_tokens))
        .route("/api/tokens", post(handlers::auth::create_token))
        .route("/api/tokens/{id}", delete(handlers::auth::revoke_token))
        .route("/api/tasks", get(handlers::tasks::list))
        .route("/api/tasks", post(handlers::tasks::create))
        .route("/api/tasks/reorder", put(handlers::tasks::reorder))
        .route("/api/tasks/bulk/toggle", post(handlers::tasks::bulk_toggle))
        .route("/api/tasks/bulk/delete", post(handlers::tasks::bulk_delete))
        .route("/api/tasks/{id}", get(handlers::tasks::get_one))
        .route("/api/tasks/{id}", put(handlers::tasks::update))
        .route("/api/tasks/{id}", delete(handlers::tasks::soft_delete))
        .route("/api/tasks/{id}/toggle", patch(handlers::tasks::toggle))
        .route("/api/trash", get(handlers::tasks::trash))
        .route("/api/trash/{id}/restore", post(handlers::tasks::restore))
        .route("/api/trash/{id}", delete(handlers::tasks::permanent_delete))
        .route("/api/preferences", get(handlers::prefs::list))
        .route("/api/preferences/{key}", put(handlers::prefs::set))
        .layer(
            tower::ServiceBuilder::new()
                .layer(tower_http::trace::TraceLayer::new_for_http())
                .layer(tower_http::compression::CompressionLayer::new()),
        )
        .with_state(state)
}
