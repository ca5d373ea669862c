use std::sync::{Arc, Mutex};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result, Row};

use crate::error::AppError;
use crate::models::{
    ApiToken, Session, Task, TaskFilter, TaskMetadata, TaskPriority, TaskSort, TaskStatus, User,
    ViewPreference,
};

pub type DbPool = Arc<Mutex<Connection>>;

const TASK_COLS: &str = "id, user_id, title, description, status, priority, manual_order, \
                         created_at, updated_at, completed_at, deleted_at";

pub fn now_ts() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

pub fn init_db(path: &str) -> Result<DbPool> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            created_at INTEGER DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id),
            created_at INTEGER DEFAULT (strftime('%s', 'now')),
            expires_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS api_tokens (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id),
            token TEXT UNIQUE NOT NULL,
            name TEXT,
            created_at INTEGER DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id),
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            priority TEXT NOT NULL DEFAULT 'medium',
            manual_order INTEGER,
            created_at INTEGER DEFAULT (strftime('%s', 'now')),
            updated_at INTEGER DEFAULT (strftime('%s', 'now')),
            completed_at INTEGER,
            deleted_at INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_user_deleted
            ON tasks (user_id, deleted_at);

        CREATE TABLE IF NOT EXISTS view_preferences (
            user_id INTEGER NOT NULL REFERENCES users(id),
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at INTEGER DEFAULT (strftime('%s', 'now')),
            PRIMARY KEY (user_id, key)
        );
        ",
    )?;

    Ok(Arc::new(Mutex::new(conn)))
}

fn user_from_row(row: &Row<'_>) -> Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn task_from_row(row: &Row<'_>) -> Result<Task> {
    let status: String = row.get(4)?;
    let priority: String = row.get(5)?;
    Ok(Task {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: if status == "completed" {
            TaskStatus::Completed
        } else {
            TaskStatus::Pending
        },
        priority: match priority.as_str() {
            "low" => TaskPriority::Low,
            "high" => TaskPriority::High,
            _ => TaskPriority::Medium,
        },
        manual_order: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        completed_at: row.get(9)?,
        deleted_at: row.get(10)?,
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

// User operations

pub fn create_user(pool: &DbPool, username: &str, password_hash: &str) -> Result<User, AppError> {
    let conn = pool.lock().unwrap();
    conn.execute(
        "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
        (username, password_hash),
    )?;
    let id = conn.last_insert_rowid();
    let user = conn.query_row(
        "SELECT id, username, password_hash, created_at FROM users WHERE id = ?1",
        [id],
        user_from_row,
    )?;
    Ok(user)
}

pub fn get_user_by_username(pool: &DbPool, username: &str) -> Result<Option<User>, AppError> {
    let conn = pool.lock().unwrap();
    let user = conn
        .query_row(
            "SELECT id, username, password_hash, created_at FROM users WHERE username = ?1",
            [username],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

// Session operations

pub fn create_session(pool: &DbPool, session: &Session) -> Result<(), AppError> {
    let conn = pool.lock().unwrap();
    conn.execute(
        "INSERT INTO sessions (id, user_id, expires_at) VALUES (?1, ?2, ?3)",
        (&session.id, session.user_id, session.expires_at),
    )?;
    Ok(())
}

pub fn get_session(pool: &DbPool, id: &str) -> Result<Option<Session>, AppError> {
    let conn = pool.lock().unwrap();
    let session = conn
        .query_row(
            "SELECT id, user_id, created_at, expires_at FROM sessions WHERE id = ?1",
            [id],
            |row| {
                Ok(Session {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    created_at: row.get(2)?,
                    expires_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(session)
}

pub fn delete_session(pool: &DbPool, id: &str) -> Result<(), AppError> {
    let conn = pool.lock().unwrap();
    conn.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
    Ok(())
}

pub fn cleanup_expired_sessions(pool: &DbPool) -> Result<(), AppError> {
    let conn = pool.lock().unwrap();
    conn.execute("DELETE FROM sessions WHERE expires_at < ?1", [now_ts()])?;
    Ok(())
}

// API token operations

pub fn create_api_token(
    pool: &DbPool,
    user_id: i64,
    token: &str,
    name: Option<&str>,
) -> Result<ApiToken, AppError> {
    let conn = pool.lock().unwrap();
    conn.execute(
        "INSERT INTO api_tokens (user_id, token, name) VALUES (?1, ?2, ?3)",
        (user_id, token, name),
    )?;
    let id = conn.last_insert_rowid();

    let token = conn.query_row(
        "SELECT id, token, name, created_at FROM api_tokens WHERE id = ?1",
        [id],
        |row| {
            Ok(ApiToken {
                id: row.get(0)?,
                token: row.get(1)?,
                name: row.get(2)?,
                created_at: row.get(3)?,
            })
        },
    )?;
    Ok(token)
}

/// Resolve a bearer token to its owning user.
pub fn get_token_user(pool: &DbPool, token: &str) -> Result<Option<i64>, AppError> {
    let conn = pool.lock().unwrap();
    let user_id = conn
        .query_row(
            "SELECT user_id FROM api_tokens WHERE token = ?1",
            [token],
            |row| row.get(0),
        )
        .optional()?;
    Ok(user_id)
}

pub fn list_api_tokens(pool: &DbPool, user_id: i64) -> Result<Vec<ApiToken>, AppError> {
    let conn = pool.lock().unwrap();
    let mut stmt = conn.prepare(
        "SELECT id, token, name, created_at FROM api_tokens WHERE user_id = ?1 \
         ORDER BY created_at DESC",
    )?;
    let tokens = stmt
        .query_map([user_id], |row| {
            Ok(ApiToken {
                id: row.get(0)?,
                token: row.get(1)?,
                name: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tokens)
}

pub fn delete_api_token(pool: &DbPool, user_id: i64, id: i64) -> Result<bool, AppError> {
    let conn = pool.lock().unwrap();
    let rows = conn.execute(
        "DELETE FROM api_tokens WHERE id = ?1 AND user_id = ?2",
        [id, user_id],
    )?;
    Ok(rows > 0)
}

// Task operations. Every query is scoped by user_id; active and trashed
// subsets are discriminated by deleted_at.

pub fn insert_task(
    pool: &DbPool,
    user_id: i64,
    title: &str,
    description: Option<&str>,
    priority: TaskPriority,
) -> Result<Task, AppError> {
    let conn = pool.lock().unwrap();
    conn.execute(
        "INSERT INTO tasks (user_id, title, description, priority) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, title, description, priority.as_str()],
    )?;
    let id = conn.last_insert_rowid();
    let task = conn.query_row(
        &format!("SELECT {TASK_COLS} FROM tasks WHERE id = ?1"),
        [id],
        task_from_row,
    )?;
    Ok(task)
}

fn get_task_internal(
    conn: &Connection,
    user_id: i64,
    id: i64,
    trashed: bool,
) -> Result<Option<Task>, AppError> {
    let predicate = if trashed {
        "deleted_at IS NOT NULL"
    } else {
        "deleted_at IS NULL"
    };
    let task = conn
        .query_row(
            &format!(
                "SELECT {TASK_COLS} FROM tasks WHERE id = ?1 AND user_id = ?2 AND {predicate}"
            ),
            [id, user_id],
            task_from_row,
        )
        .optional()?;
    Ok(task)
}

pub fn get_active_task(pool: &DbPool, user_id: i64, id: i64) -> Result<Option<Task>, AppError> {
    let conn = pool.lock().unwrap();
    get_task_internal(&conn, user_id, id, false)
}

pub fn get_trashed_task(pool: &DbPool, user_id: i64, id: i64) -> Result<Option<Task>, AppError> {
    let conn = pool.lock().unwrap();
    get_task_internal(&conn, user_id, id, true)
}

fn filter_clause(filter: TaskFilter) -> &'static str {
    match filter {
        TaskFilter::All => "",
        TaskFilter::Pending => " AND status = 'pending'",
        TaskFilter::Completed => " AND status = 'completed'",
    }
}

fn order_clause(sort: TaskSort) -> &'static str {
    match sort {
        TaskSort::CreatedDesc => " ORDER BY created_at DESC, id DESC",
        TaskSort::Status => {
            " ORDER BY CASE status WHEN 'pending' THEN 0 ELSE 1 END, created_at DESC, id DESC"
        }
        TaskSort::TitleAsc => " ORDER BY title COLLATE NOCASE ASC, created_at DESC, id DESC",
        TaskSort::Manual => " ORDER BY manual_order IS NULL, manual_order ASC, created_at DESC, id DESC",
    }
}

/// List a page of the active set. A negative limit means no limit.
pub fn list_active(
    pool: &DbPool,
    user_id: i64,
    filter: TaskFilter,
    sort: TaskSort,
    limit: i64,
    offset: i64,
) -> Result<Vec<Task>, AppError> {
    let conn = pool.lock().unwrap();
    let sql = format!(
        "SELECT {TASK_COLS} FROM tasks WHERE user_id = ?1 AND deleted_at IS NULL{}{} \
         LIMIT ?2 OFFSET ?3",
        filter_clause(filter),
        order_clause(sort),
    );
    let mut stmt = conn.prepare(&sql)?;
    let tasks = stmt
        .query_map(params![user_id, limit, offset], task_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tasks)
}

pub fn count_active(pool: &DbPool, user_id: i64, filter: TaskFilter) -> Result<i64, AppError> {
    let conn = pool.lock().unwrap();
    let sql = format!(
        "SELECT COUNT(*) FROM tasks WHERE user_id = ?1 AND deleted_at IS NULL{}",
        filter_clause(filter),
    );
    let count = conn.query_row(&sql, [user_id], |row| row.get(0))?;
    Ok(count)
}

pub fn list_trashed(
    pool: &DbPool,
    user_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<Task>, AppError> {
    let conn = pool.lock().unwrap();
    let sql = format!(
        "SELECT {TASK_COLS} FROM tasks WHERE user_id = ?1 AND deleted_at IS NOT NULL \
         ORDER BY deleted_at DESC, id DESC LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let tasks = stmt
        .query_map(params![user_id, limit, offset], task_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tasks)
}

pub fn count_trashed(pool: &DbPool, user_id: i64) -> Result<i64, AppError> {
    let conn = pool.lock().unwrap();
    let count = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE user_id = ?1 AND deleted_at IS NOT NULL",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Aggregate counts over the user's full task set, in one pass.
pub fn metadata(pool: &DbPool, user_id: i64) -> Result<TaskMetadata, AppError> {
    let conn = pool.lock().unwrap();
    let meta = conn.query_row(
        "SELECT \
            COALESCE(SUM(CASE WHEN deleted_at IS NULL AND status = 'pending' THEN 1 ELSE 0 END), 0), \
            COALESCE(SUM(CASE WHEN deleted_at IS NULL AND status = 'completed' THEN 1 ELSE 0 END), 0), \
            COALESCE(SUM(CASE WHEN deleted_at IS NULL THEN 1 ELSE 0 END), 0), \
            COALESCE(SUM(CASE WHEN deleted_at IS NOT NULL THEN 1 ELSE 0 END), 0) \
         FROM tasks WHERE user_id = ?1",
        [user_id],
        |row| {
            Ok(TaskMetadata {
                total_pending: row.get(0)?,
                total_completed: row.get(1)?,
                total_active: row.get(2)?,
                total_deleted: row.get(3)?,
            })
        },
    )?;
    Ok(meta)
}

/// Apply the provided field changes to an active task. `description` set to
/// `Some(None)` clears the column. Returns None when no active row matched.
pub fn update_task_fields(
    pool: &DbPool,
    user_id: i64,
    id: i64,
    title: Option<&str>,
    description: Option<Option<&str>>,
) -> Result<Option<Task>, AppError> {
    let conn = pool.lock().unwrap();

    let mut updates: Vec<&str> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(t) = title {
        updates.push("title = ?");
        values.push(Box::new(t.to_string()));
    }
    match description {
        Some(Some(d)) => {
            updates.push("description = ?");
            values.push(Box::new(d.to_string()));
        }
        Some(None) => updates.push("description = NULL"),
        None => {}
    }
    updates.push("updated_at = ?");
    values.push(Box::new(now_ts()));

    let query = format!(
        "UPDATE tasks SET {} WHERE id = ? AND user_id = ? AND deleted_at IS NULL",
        updates.join(", ")
    );
    values.push(Box::new(id));
    values.push(Box::new(user_id));

    let value_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let rows = conn.execute(&query, value_refs.as_slice())?;
    if rows == 0 {
        return Ok(None);
    }
    get_task_internal(&conn, user_id, id, false)
}

pub fn set_task_status(
    pool: &DbPool,
    user_id: i64,
    id: i64,
    status: TaskStatus,
    completed_at: Option<i64>,
) -> Result<Option<Task>, AppError> {
    let conn = pool.lock().unwrap();
    let rows = conn.execute(
        "UPDATE tasks SET status = ?1, completed_at = ?2, updated_at = ?3 \
         WHERE id = ?4 AND user_id = ?5 AND deleted_at IS NULL",
        params![status.as_str(), completed_at, now_ts(), id, user_id],
    )?;
    if rows == 0 {
        return Ok(None);
    }
    get_task_internal(&conn, user_id, id, false)
}

/// Set every listed task to the target status in one transaction. Returns
/// None without mutating anything unless all ids are owned and active.
pub fn bulk_set_status(
    pool: &DbPool,
    user_id: i64,
    ids: &[i64],
    target: TaskStatus,
) -> Result<Option<Vec<Task>>, AppError> {
    let mut conn = pool.lock().unwrap();
    let tx = conn.transaction()?;
    let ph = placeholders(ids.len());

    let mut scope_args: Vec<i64> = ids.to_vec();
    scope_args.push(user_id);

    let count: i64 = tx.query_row(
        &format!(
            "SELECT COUNT(*) FROM tasks WHERE id IN ({ph}) AND user_id = ? AND deleted_at IS NULL"
        ),
        params_from_iter(scope_args.iter()),
        |row| row.get(0),
    )?;
    if count != ids.len() as i64 {
        return Ok(None);
    }

    let now = now_ts();
    // An already-completed task keeps its original completed_at.
    let (update_sql, mut update_args) = match target {
        TaskStatus::Completed => (
            format!(
                "UPDATE tasks SET status = 'completed', completed_at = COALESCE(completed_at, ?), \
                 updated_at = ? WHERE id IN ({ph}) AND user_id = ?"
            ),
            vec![now, now],
        ),
        TaskStatus::Pending => (
            format!(
                "UPDATE tasks SET status = 'pending', completed_at = NULL, updated_at = ? \
                 WHERE id IN ({ph}) AND user_id = ?"
            ),
            vec![now],
        ),
    };
    update_args.extend_from_slice(ids);
    update_args.push(user_id);
    tx.execute(&update_sql, params_from_iter(update_args.iter()))?;

    let tasks = {
        let mut stmt = tx.prepare(&format!(
            "SELECT {TASK_COLS} FROM tasks WHERE id IN ({ph}) AND user_id = ? \
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(scope_args.iter()), task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    tx.commit()?;
    Ok(Some(tasks))
}

pub fn soft_delete_task(pool: &DbPool, user_id: i64, id: i64) -> Result<Option<Task>, AppError> {
    let conn = pool.lock().unwrap();
    let now = now_ts();
    let rows = conn.execute(
        "UPDATE tasks SET deleted_at = ?1, updated_at = ?1 \
         WHERE id = ?2 AND user_id = ?3 AND deleted_at IS NULL",
        params![now, id, user_id],
    )?;
    if rows == 0 {
        return Ok(None);
    }
    get_task_internal(&conn, user_id, id, true)
}

/// Soft-delete every listed task in one transaction, all-or-nothing.
pub fn bulk_soft_delete(
    pool: &DbPool,
    user_id: i64,
    ids: &[i64],
) -> Result<Option<Vec<Task>>, AppError> {
    let mut conn = pool.lock().unwrap();
    let tx = conn.transaction()?;
    let ph = placeholders(ids.len());

    let mut scope_args: Vec<i64> = ids.to_vec();
    scope_args.push(user_id);

    let count: i64 = tx.query_row(
        &format!(
            "SELECT COUNT(*) FROM tasks WHERE id IN ({ph}) AND user_id = ? AND deleted_at IS NULL"
        ),
        params_from_iter(scope_args.iter()),
        |row| row.get(0),
    )?;
    if count != ids.len() as i64 {
        return Ok(None);
    }

    let now = now_ts();
    let mut update_args: Vec<i64> = vec![now, now];
    update_args.extend_from_slice(ids);
    update_args.push(user_id);
    tx.execute(
        &format!(
            "UPDATE tasks SET deleted_at = ?, updated_at = ? WHERE id IN ({ph}) AND user_id = ?"
        ),
        params_from_iter(update_args.iter()),
    )?;

    let tasks = {
        let mut stmt = tx.prepare(&format!(
            "SELECT {TASK_COLS} FROM tasks WHERE id IN ({ph}) AND user_id = ? \
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(scope_args.iter()), task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    tx.commit()?;
    Ok(Some(tasks))
}

pub fn restore_task(pool: &DbPool, user_id: i64, id: i64) -> Result<Option<Task>, AppError> {
    let conn = pool.lock().unwrap();
    let rows = conn.execute(
        "UPDATE tasks SET deleted_at = NULL, updated_at = ?1 \
         WHERE id = ?2 AND user_id = ?3 AND deleted_at IS NOT NULL",
        params![now_ts(), id, user_id],
    )?;
    if rows == 0 {
        return Ok(None);
    }
    get_task_internal(&conn, user_id, id, false)
}

/// Hard delete, only valid from the trash.
pub fn purge_task(pool: &DbPool, user_id: i64, id: i64) -> Result<bool, AppError> {
    let conn = pool.lock().unwrap();
    let rows = conn.execute(
        "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NOT NULL",
        [id, user_id],
    )?;
    Ok(rows > 0)
}

/// Assign manual_order by list position, transactionally. Returns None
/// without mutating anything unless all ids are owned and active.
pub fn set_manual_order(pool: &DbPool, user_id: i64, ids: &[i64]) -> Result<Option<()>, AppError> {
    let mut conn = pool.lock().unwrap();
    let tx = conn.transaction()?;
    let ph = placeholders(ids.len());

    let mut scope_args: Vec<i64> = ids.to_vec();
    scope_args.push(user_id);

    let count: i64 = tx.query_row(
        &format!(
            "SELECT COUNT(*) FROM tasks WHERE id IN ({ph}) AND user_id = ? AND deleted_at IS NULL"
        ),
        params_from_iter(scope_args.iter()),
        |row| row.get(0),
    )?;
    if count != ids.len() as i64 {
        return Ok(None);
    }

    let now = now_ts();
    for (position, id) in ids.iter().enumerate() {
        tx.execute(
            "UPDATE tasks SET manual_order = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
            params![position as i64, now, id, user_id],
        )?;
    }

    tx.commit()?;
    Ok(Some(()))
}

// View preference operations

pub fn upsert_preference(
    pool: &DbPool,
    user_id: i64,
    key: &str,
    value: &str,
) -> Result<ViewPreference, AppError> {
    let conn = pool.lock().unwrap();
    conn.execute(
        "INSERT INTO view_preferences (user_id, key, value, updated_at) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(user_id, key) DO UPDATE SET value = excluded.value, \
         updated_at = excluded.updated_at",
        params![user_id, key, value, now_ts()],
    )?;
    let pref = conn.query_row(
        "SELECT key, value, updated_at FROM view_preferences WHERE user_id = ?1 AND key = ?2",
        params![user_id, key],
        |row| {
            Ok(ViewPreference {
                key: row.get(0)?,
                value: row.get(1)?,
                updated_at: row.get(2)?,
            })
        },
    )?;
    Ok(pref)
}

pub fn list_preferences(pool: &DbPool, user_id: i64) -> Result<Vec<ViewPreference>, AppError> {
    let conn = pool.lock().unwrap();
    let mut stmt = conn.prepare(
        "SELECT key, value, updated_at FROM view_preferences WHERE user_id = ?1 ORDER BY key ASC",
    )?;
    let prefs = stmt
        .query_map([user_id], |row| {
            Ok(ViewPreference {
                key: row.get(0)?,
                value: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(prefs)
}
