//! Business rules over the task row store: ownership scoping, soft-delete
//! lifecycle, pagination policy, and bulk-size bounds. Stateless; all state
//! lives in the row store. "Doesn't exist", "belongs to someone else", and
//! "wrong lifecycle state" all collapse into the same not-found outcome so
//! task existence never leaks across tenants.

use std::collections::HashSet;

use crate::db::{self, DbPool};
use crate::error::AppError;
use crate::models::{
    BulkDeleteData, BulkToggleData, CreateTask, ListData, Pagination, Task, TaskFilter,
    TaskPriority, TaskSort, TaskStatus, TrashData, UpdateTask, ViewPreference,
};

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;
pub const MAX_BULK_IDS: usize = 50;
pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 2000;
pub const MAX_PREFERENCE_LEN: usize = 255;

fn validate_paging(page: i64, limit: i64) -> Result<i64, AppError> {
    if page < 1 {
        return Err(AppError::field("page", "must be 1 or greater"));
    }
    if limit < 1 || limit > MAX_PAGE_LIMIT {
        return Err(AppError::field("limit", "must be between 1 and 100"));
    }
    Ok((page - 1) * limit)
}

fn paginate(page: i64, limit: i64, total_items: i64) -> Pagination {
    let total_pages = (total_items + limit - 1) / limit;
    Pagination {
        page,
        limit,
        total_items,
        total_pages,
        has_next: page < total_pages,
        has_prev: page > 1,
    }
}

fn validate_bulk_ids(ids: &[i64]) -> Result<(), AppError> {
    if ids.is_empty() || ids.len() > MAX_BULK_IDS {
        return Err(AppError::field("ids", "must contain between 1 and 50 ids"));
    }
    let distinct: HashSet<i64> = ids.iter().copied().collect();
    if distinct.len() != ids.len() {
        return Err(AppError::field("ids", "must not contain duplicates"));
    }
    Ok(())
}

fn validate_title(title: &str) -> Result<(), AppError> {
    if title.is_empty() {
        return Err(AppError::field("title", "must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::field("title", "must be at most 255 characters"));
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<(), AppError> {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(AppError::field(
            "description",
            "must be at most 2000 characters",
        ));
    }
    Ok(())
}

pub fn list_tasks(
    pool: &DbPool,
    user_id: i64,
    filter: TaskFilter,
    sort: TaskSort,
    page: i64,
    limit: i64,
) -> Result<ListData, AppError> {
    let offset = validate_paging(page, limit)?;
    let tasks = db::list_active(pool, user_id, filter, sort, limit, offset)?;
    let total_items = db::count_active(pool, user_id, filter)?;
    let metadata = db::metadata(pool, user_id)?;
    Ok(ListData {
        tasks,
        metadata,
        pagination: paginate(page, limit, total_items),
    })
}

pub fn get_trash(pool: &DbPool, user_id: i64, page: i64, limit: i64) -> Result<TrashData, AppError> {
    let offset = validate_paging(page, limit)?;
    let tasks = db::list_trashed(pool, user_id, limit, offset)?;
    let total_items = db::count_trashed(pool, user_id)?;
    Ok(TrashData {
        tasks,
        pagination: paginate(page, limit, total_items),
    })
}

pub fn create_task(pool: &DbPool, user_id: i64, req: CreateTask) -> Result<Task, AppError> {
    let title = req.title.trim();
    validate_title(title)?;

    let description = match req.description.as_deref().map(str::trim) {
        Some(d) if !d.is_empty() => {
            validate_description(d)?;
            Some(d)
        }
        _ => None,
    };

    let priority = req.priority.unwrap_or(TaskPriority::Medium);
    db::insert_task(pool, user_id, title, description, priority)
}

pub fn get_task(pool: &DbPool, user_id: i64, id: i64) -> Result<Task, AppError> {
    db::get_active_task(pool, user_id, id)?.ok_or(AppError::NotFound)
}

/// At least one field must be provided and differ (after trim) from the
/// stored value; anything else is rejected as a no-op so clients get an
/// explicit signal to skip the request.
pub fn update_task(pool: &DbPool, user_id: i64, id: i64, req: UpdateTask) -> Result<Task, AppError> {
    if req.title.is_none() && req.description.is_none() {
        return Err(AppError::validation(
            "Provide at least one of title or description",
        ));
    }

    let task = db::get_active_task(pool, user_id, id)?.ok_or(AppError::NotFound)?;

    let new_title = match req.title.as_deref().map(str::trim) {
        Some(t) => {
            validate_title(t)?;
            if t != task.title {
                Some(t.to_string())
            } else {
                None
            }
        }
        None => None,
    };

    // An empty description clears the field.
    let new_description = match req.description.as_deref().map(str::trim) {
        Some(d) => {
            validate_description(d)?;
            let normalized = if d.is_empty() {
                None
            } else {
                Some(d.to_string())
            };
            if normalized != task.description {
                Some(normalized)
            } else {
                None
            }
        }
        None => None,
    };

    if new_title.is_none() && new_description.is_none() {
        return Err(AppError::validation("No changes to apply"));
    }

    db::update_task_fields(
        pool,
        user_id,
        id,
        new_title.as_deref(),
        new_description.as_ref().map(|d| d.as_deref()),
    )?
    .ok_or(AppError::NotFound)
}

/// The new state is always the logical negation of the current one; there is
/// no way to set an arbitrary status through this operation.
pub fn toggle_status(pool: &DbPool, user_id: i64, id: i64) -> Result<Task, AppError> {
    let task = db::get_active_task(pool, user_id, id)?.ok_or(AppError::NotFound)?;
    let next = task.status.toggled();
    let completed_at = match next {
        TaskStatus::Completed => Some(db::now_ts()),
        TaskStatus::Pending => None,
    };
    db::set_task_status(pool, user_id, id, next, completed_at)?.ok_or(AppError::NotFound)
}

/// Bulk status changes are settable rather than flip-based: a mixed batch
/// flipping individually would be surprising, so the whole batch converges
/// on one explicit target status.
pub fn bulk_toggle(
    pool: &DbPool,
    user_id: i64,
    ids: &[i64],
    target: TaskStatus,
) -> Result<BulkToggleData, AppError> {
    validate_bulk_ids(ids)?;
    let tasks = db::bulk_set_status(pool, user_id, ids, target)?.ok_or(AppError::NotFound)?;
    Ok(BulkToggleData {
        updated_count: tasks.len() as i64,
        tasks,
    })
}

pub fn soft_delete(pool: &DbPool, user_id: i64, id: i64) -> Result<Task, AppError> {
    db::soft_delete_task(pool, user_id, id)?.ok_or(AppError::NotFound)
}

pub fn bulk_soft_delete(
    pool: &DbPool,
    user_id: i64,
    ids: &[i64],
) -> Result<BulkDeleteData, AppError> {
    validate_bulk_ids(ids)?;
    let tasks = db::bulk_soft_delete(pool, user_id, ids)?.ok_or(AppError::NotFound)?;
    Ok(BulkDeleteData {
        deleted_count: tasks.len() as i64,
        tasks,
    })
}

pub fn restore(pool: &DbPool, user_id: i64, id: i64) -> Result<Task, AppError> {
    db::restore_task(pool, user_id, id)?.ok_or(AppError::NotFound)
}

/// Hard deletion must go through the trash first; a task that was never
/// soft-deleted is not found here.
pub fn permanent_delete(pool: &DbPool, user_id: i64, id: i64) -> Result<(), AppError> {
    if db::purge_task(pool, user_id, id)? {
        Ok(())
    } else {
        Err(AppError::NotFound)
    }
}

/// Assign user-defined ordering by list position and return the full
/// manually-ordered active list.
pub fn reorder(pool: &DbPool, user_id: i64, ids: &[i64]) -> Result<Vec<Task>, AppError> {
    if ids.is_empty() {
        return Err(AppError::field("ids", "must not be empty"));
    }
    let distinct: HashSet<i64> = ids.iter().copied().collect();
    if distinct.len() != ids.len() {
        return Err(AppError::field("ids", "must not contain duplicates"));
    }
    db::set_manual_order(pool, user_id, ids)?.ok_or(AppError::NotFound)?;
    db::list_active(pool, user_id, TaskFilter::All, TaskSort::Manual, -1, 0)
}

pub fn list_preferences(pool: &DbPool, user_id: i64) -> Result<Vec<ViewPreference>, AppError> {
    db::list_preferences(pool, user_id)
}

pub fn set_preference(
    pool: &DbPool,
    user_id: i64,
    key: &str,
    value: &str,
) -> Result<ViewPreference, AppError> {
    let key = key.trim();
    if key.is_empty() || key.chars().count() > MAX_PREFERENCE_LEN {
        return Err(AppError::field("key", "must be 1 to 255 characters"));
    }
    if value.chars().count() > MAX_PREFERENCE_LEN {
        return Err(AppError::field("value", "must be at most 255 characters"));
    }
    db::upsert_preference(pool, user_id, key, value)
}
