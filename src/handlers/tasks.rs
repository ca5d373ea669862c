use axum::extract::{Path, Query, State};
use axum::{http::StatusCode, Json};
use serde::Deserialize;
use tracing::info;

use crate::error::AppError;
use crate::handlers::respond;
use crate::middleware::Auth;
use crate::models::{
    BulkDelete, BulkDeleteData, BulkToggle, BulkToggleData, CreateTask, Envelope, ListData,
    ReorderTasks, Task, TaskFilter, TaskSort, TrashData, UpdateTask,
};
use crate::service;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

type Reply<T> = Result<(StatusCode, Json<Envelope<T>>), AppError>;

pub async fn list(Auth(user_id): Auth, State(state): State<AppState>, Query(q): Query<ListQuery>) -> Reply<ListData> {
    let filter = match q.filter.as_deref() {
        None => TaskFilter::All,
        Some(s) => TaskFilter::parse(s)
            .ok_or_else(|| AppError::field("filter", "must be one of: all, pending, completed"))?,
    };
    let sort = match q.sort.as_deref() {
        None => TaskSort::CreatedDesc,
        Some(s) => TaskSort::parse(s).ok_or_else(|| {
            AppError::field("sort", "must be one of: created_at, status, title, manual")
        })?,
    };
    let page = q.page.unwrap_or(1);
    let limit = q.limit.unwrap_or(service::DEFAULT_PAGE_LIMIT);

    let data = service::list_tasks(&state.db, user_id, filter, sort, page, limit)?;
    info!(count = data.tasks.len(), filter = filter.as_str(), "Listed tasks");
    Ok(respond(StatusCode::OK, "Tasks retrieved", data))
}

pub async fn create(
    Auth(user_id): Auth,
    State(state): State<AppState>,
    Json(req): Json<CreateTask>,
) -> Reply<Task> {
    let task = service::create_task(&state.db, user_id, req)?;
    info!(id = task.id, title = %task.title, "Created task");
    Ok(respond(StatusCode::CREATED, "Task created", task))
}

pub async fn get_one(
    Auth(user_id): Auth,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Reply<Task> {
    let task = service::get_task(&state.db, user_id, id)?;
    Ok(respond(StatusCode::OK, "Task retrieved", task))
}

pub async fn update(
    Auth(user_id): Auth,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTask>,
) -> Reply<Task> {
    let task = service::update_task(&state.db, user_id, id, req)?;
    info!(id = task.id, "Updated task");
    Ok(respond(StatusCode::OK, "Task updated", task))
}

pub async fn toggle(
    Auth(user_id): Auth,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Reply<Task> {
    let task = service::toggle_status(&state.db, user_id, id)?;
    info!(id = task.id, status = task.status.as_str(), "Toggled task");
    Ok(respond(StatusCode::OK, "Task status toggled", task))
}

pub async fn bulk_toggle(
    Auth(user_id): Auth,
    State(state): State<AppState>,
    Json(req): Json<BulkToggle>,
) -> Reply<BulkToggleData> {
    let data = service::bulk_toggle(&state.db, user_id, &req.ids, req.status)?;
    info!(
        count = data.updated_count,
        status = req.status.as_str(),
        "Bulk-updated task status"
    );
    Ok(respond(StatusCode::OK, "Tasks updated", data))
}

pub async fn soft_delete(
    Auth(user_id): Auth,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Reply<Task> {
    let task = service::soft_delete(&state.db, user_id, id)?;
    info!(id = task.id, "Moved task to trash");
    Ok(respond(StatusCode::OK, "Task moved to trash", task))
}

pub async fn bulk_delete(
    Auth(user_id): Auth,
    State(state): State<AppState>,
    Json(req): Json<BulkDelete>,
) -> Reply<BulkDeleteData> {
    let data = service::bulk_soft_delete(&state.db, user_id, &req.ids)?;
    info!(count = data.deleted_count, "Bulk-moved tasks to trash");
    Ok(respond(StatusCode::OK, "Tasks moved to trash", data))
}

pub async fn trash(
    Auth(user_id): Auth,
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Reply<TrashData> {
    let page = q.page.unwrap_or(1);
    let limit = q.limit.unwrap_or(service::DEFAULT_PAGE_LIMIT);
    let data = service::get_trash(&state.db, user_id, page, limit)?;
    info!(count = data.tasks.len(), "Listed trash");
    Ok(respond(StatusCode::OK, "Trash retrieved", data))
}

pub async fn restore(
    Auth(user_id): Auth,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Reply<Task> {
    let task = service::restore(&state.db, user_id, id)?;
    info!(id = task.id, "Restored task");
    Ok(respond(StatusCode::OK, "Task restored", task))
}

pub async fn permanent_delete(
    Auth(user_id): Auth,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Reply<()> {
    service::permanent_delete(&state.db, user_id, id)?;
    info!(id, "Permanently deleted task");
    Ok(respond(StatusCode::OK, "Task permanently deleted", ()))
}

pub async fn reorder(
    Auth(user_id): Auth,
    State(state): State<AppState>,
    Json(req): Json<ReorderTasks>,
) -> Reply<Vec<Task>> {
    let tasks = service::reorder(&state.db, user_id, &req.ids)?;
    info!(count = tasks.len(), "Reordered tasks");
    Ok(respond(StatusCode::OK, "Tasks reordered", tasks))
}
