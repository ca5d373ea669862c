//! Typed HTTP client for the task API, holding the query cache and the
//! snapshot / speculative-apply / confirm-or-rollback protocol for every
//! mutating operation.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::client::cache::{CacheSnapshot, QueryCache, QueryKey, TaskPage};
use crate::client::selection::SelectionSet;
use crate::models::{
    BulkDelete, BulkDeleteData, BulkToggle, BulkToggleData, CreateApiToken, CreateTask, Envelope,
    ErrorEnvelope, FieldError, ListData, LoginRequest, PublicUser, RegisterRequest, SetPreference,
    Task, TaskFilter, TaskPriority, TaskSort, TaskStatus, TrashData, UpdateTask, ViewPreference,
};

const DEFAULT_STALENESS: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum ClientError {
    /// The server answered with a failure envelope. Every category triggers
    /// the same rollback; the code/message only matter for what the user is
    /// shown.
    Api {
        status: u16,
        code: String,
        message: String,
        details: Vec<FieldError>,
    },
    Transport(reqwest::Error),
    Decode(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Api { code, message, .. } => write!(f, "{code}: {message}"),
            ClientError::Transport(err) => write!(f, "transport error: {err}"),
            ClientError::Decode(msg) => write!(f, "malformed response: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err)
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status().as_u16();
    let body = resp.bytes().await?;
    if (200..300).contains(&status) {
        let envelope: Envelope<T> =
            serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(envelope.data)
    } else {
        Err(match serde_json::from_slice::<ErrorEnvelope>(&body) {
            Ok(envelope) => ClientError::Api {
                status,
                code: envelope.error.code,
                message: envelope.error.message,
                details: envelope.details.unwrap_or_default(),
            },
            Err(_) => ClientError::Api {
                status,
                code: "UNKNOWN".to_string(),
                message: "Unrecognized error response".to_string(),
                details: Vec::new(),
            },
        })
    }
}

pub struct TaskClient {
    http: reqwest::Client,
    base_url: String,
    cache: QueryCache,
    pub selection: SelectionSet,
}

impl TaskClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_staleness(base_url, DEFAULT_STALENESS)
    }

    pub fn with_staleness(
        base_url: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(TaskClient {
            http,
            base_url: base_url.into(),
            cache: QueryCache::new(ttl),
            selection: SelectionSet::new(),
        })
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // Account plumbing

    pub async fn register(&self, username: &str, password: &str) -> Result<PublicUser, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/register"))
            .json(&RegisterRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<PublicUser, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/login"))
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        decode(resp).await
    }

    /// Ends the session and tears down all client-session state.
    pub async fn logout(&mut self) -> Result<(), ClientError> {
        let resp = self.http.post(self.url("/api/logout")).send().await?;
        decode::<()>(resp).await?;
        self.cache.clear();
        self.selection.clear();
        Ok(())
    }

    pub async fn create_api_token(&self, name: Option<&str>) -> Result<crate::models::ApiToken, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/tokens"))
            .json(&CreateApiToken {
                name: name.map(String::from),
            })
            .send()
            .await?;
        decode(resp).await
    }

    // Read path

    /// Serves from cache while the entry is fresh; otherwise fetches and
    /// caches. Distinct (filter, sort, page, limit) combinations are
    /// independent entries.
    pub async fn list_tasks(
        &mut self,
        filter: TaskFilter,
        sort: TaskSort,
        page: i64,
        limit: i64,
    ) -> Result<TaskPage, ClientError> {
        let key = QueryKey::Active {
            filter,
            sort,
            page,
            limit,
        };
        if let Some(cached) = self.cache.get_fresh(&key) {
            return Ok(cached.clone());
        }
        let fetched = self.fetch_page(&key).await?;
        self.cache.insert(key, fetched.clone());
        Ok(fetched)
    }

    pub async fn trash(&mut self, page: i64, limit: i64) -> Result<TaskPage, ClientError> {
        let key = QueryKey::Trash { page, limit };
        if let Some(cached) = self.cache.get_fresh(&key) {
            return Ok(cached.clone());
        }
        let fetched = self.fetch_page(&key).await?;
        self.cache.insert(key, fetched.clone());
        Ok(fetched)
    }

    async fn fetch_page(&self, key: &QueryKey) -> Result<TaskPage, ClientError> {
        match key {
            QueryKey::Active {
                filter,
                sort,
                page,
                limit,
            } => {
                let resp = self
                    .http
                    .get(self.url("/api/tasks"))
                    .query(&[
                        ("filter", filter.as_str().to_string()),
                        ("sort", sort.as_str().to_string()),
                        ("page", page.to_string()),
                        ("limit", limit.to_string()),
                    ])
                    .send()
                    .await?;
                let data: ListData = decode(resp).await?;
                Ok(TaskPage {
                    tasks: data.tasks,
                    metadata: Some(data.metadata),
                    pagination: data.pagination,
                })
            }
            QueryKey::Trash { page, limit } => {
                let resp = self
                    .http
                    .get(self.url("/api/trash"))
                    .query(&[("page", page.to_string()), ("limit", limit.to_string())])
                    .send()
                    .await?;
                let data: TrashData = decode(resp).await?;
                Ok(TaskPage {
                    tasks: data.tasks,
                    metadata: None,
                    pagination: data.pagination,
                })
            }
        }
    }

    /// Refetch every invalidated entry so optimistic approximations are
    /// reconciled against authoritative server state. An entry whose refetch
    /// fails is evicted, so the next read goes back to the server.
    pub async fn revalidate(&mut self) {
        for key in self.cache.stale_keys() {
            match self.fetch_page(&key).await {
                Ok(page) => self.cache.insert(key, page),
                Err(_) => self.cache.remove(&key),
            }
        }
    }

    async fn settle<T>(
        &mut self,
        snapshot: CacheSnapshot,
        result: Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        match result {
            Ok(value) => {
                // Mandatory reconciliation: server-computed fields
                // (updated_at, metadata, pagination) are not knowable here.
                self.cache.mark_all_stale();
                self.revalidate().await;
                Ok(value)
            }
            Err(err) => {
                self.cache.restore(snapshot);
                Err(err)
            }
        }
    }

    // Mutations

    /// No optimistic effect: the server assigns the id. Collections are
    /// invalidated and refetched on success.
    pub async fn create_task(
        &mut self,
        title: &str,
        description: Option<&str>,
        priority: Option<TaskPriority>,
    ) -> Result<Task, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/tasks"))
            .json(&CreateTask {
                title: title.to_string(),
                description: description.map(String::from),
                priority,
            })
            .send()
            .await?;
        let task = decode::<Task>(resp).await?;
        self.cache.mark_all_stale();
        self.revalidate().await;
        Ok(task)
    }

    pub async fn update_task(
        &mut self,
        id: i64,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<Task, ClientError> {
        let new_title = title.map(String::from);
        let new_description = description.map(String::from);

        let snapshot = self.cache.snapshot();
        self.cache
            .apply(|key, page| apply_update(key, page, id, &new_title, &new_description));

        let result = async {
            let resp = self
                .http
                .put(self.url(&format!("/api/tasks/{id}")))
                .json(&UpdateTask {
                    title: new_title.clone(),
                    description: new_description.clone(),
                })
                .send()
                .await?;
            decode::<Task>(resp).await
        }
        .await;

        self.settle(snapshot, result).await
    }

    pub async fn toggle_task(&mut self, id: i64) -> Result<Task, ClientError> {
        let now = unix_now();
        let snapshot = self.cache.snapshot();
        self.cache.apply(|key, page| apply_toggle(key, page, id, now));

        let result = async {
            let resp = self
                .http
                .patch(self.url(&format!("/api/tasks/{id}/toggle")))
                .send()
                .await?;
            decode::<Task>(resp).await
        }
        .await;

        self.settle(snapshot, result).await
    }

    pub async fn bulk_set_status(
        &mut self,
        ids: &[i64],
        target: TaskStatus,
    ) -> Result<BulkToggleData, ClientError> {
        let now = unix_now();
        let snapshot = self.cache.snapshot();
        self.cache
            .apply(|key, page| apply_set_status(key, page, ids, target, now));

        let result = async {
            let resp = self
                .http
                .post(self.url("/api/tasks/bulk/toggle"))
                .json(&BulkToggle {
                    ids: ids.to_vec(),
                    status: target,
                })
                .send()
                .await?;
            decode::<BulkToggleData>(resp).await
        }
        .await;

        self.settle(snapshot, result).await
    }

    pub async fn delete_task(&mut self, id: i64) -> Result<Task, ClientError> {
        let now = unix_now();
        let removed: Vec<Task> = self.cache.find_task(id).into_iter().collect();
        let snapshot = self.cache.snapshot();
        self.cache
            .apply(|key, page| apply_delete(key, page, &[id], &removed, now));

        let result = async {
            let resp = self
                .http
                .delete(self.url(&format!("/api/tasks/{id}")))
                .send()
                .await?;
            decode::<Task>(resp).await
        }
        .await;

        self.settle(snapshot, result).await
    }

    pub async fn bulk_delete(&mut self, ids: &[i64]) -> Result<BulkDeleteData, ClientError> {
        let now = unix_now();
        let removed: Vec<Task> = ids
            .iter()
            .filter_map(|id| self.cache.find_task(*id))
            .collect();
        let snapshot = self.cache.snapshot();
        self.cache
            .apply(|key, page| apply_delete(key, page, ids, &removed, now));

        let result = async {
            let resp = self
                .http
                .post(self.url("/api/tasks/bulk/delete"))
                .json(&BulkDelete { ids: ids.to_vec() })
                .send()
                .await?;
            decode::<BulkDeleteData>(resp).await
        }
        .await;

        self.settle(snapshot, result).await
    }

    pub async fn restore_task(&mut self, id: i64) -> Result<Task, ClientError> {
        let restored = self.cache.find_task(id);
        let snapshot = self.cache.snapshot();
        self.cache
            .apply(|key, page| apply_restore(key, page, id, &restored));

        let result = async {
            let resp = self
                .http
                .post(self.url(&format!("/api/trash/{id}/restore")))
                .send()
                .await?;
            decode::<Task>(resp).await
        }
        .await;

        self.settle(snapshot, result).await
    }

    pub async fn purge_task(&mut self, id: i64) -> Result<(), ClientError> {
        let snapshot = self.cache.snapshot();
        self.cache.apply(|key, page| {
            if matches!(key, QueryKey::Trash { .. }) {
                page.tasks.retain(|t| t.id != id);
            }
        });

        let result = async {
            let resp = self
                .http
                .delete(self.url(&format!("/api/trash/{id}")))
                .send()
                .await?;
            decode::<()>(resp).await
        }
        .await;

        self.settle(snapshot, result).await
    }

    // View preferences

    pub async fn preferences(&self) -> Result<Vec<ViewPreference>, ClientError> {
        let resp = self.http.get(self.url("/api/preferences")).send().await?;
        decode(resp).await
    }

    pub async fn set_preference(
        &self,
        key: &str,
        value: &str,
    ) -> Result<ViewPreference, ClientError> {
        let resp = self
            .http
            .put(self.url(&format!("/api/preferences/{key}")))
            .json(&SetPreference {
                value: value.to_string(),
            })
            .send()
            .await?;
        decode(resp).await
    }
}

// Optimistic effects. These approximate what the server will do; the
// reconciling refetch replaces the approximation with authoritative rows.
// Metadata and pagination are left untouched on purpose.

fn apply_toggle(key: &QueryKey, page: &mut TaskPage, id: i64, now: i64) {
    let QueryKey::Active { filter, .. } = key else {
        return;
    };
    let filter = *filter;
    page.tasks.retain_mut(|task| {
        if task.id != id {
            return true;
        }
        let next = task.status.toggled();
        task.status = next;
        task.completed_at = match next {
            TaskStatus::Completed => Some(now),
            TaskStatus::Pending => None,
        };
        // A task that no longer matches this entry's filter leaves the view.
        filter.matches(next)
    });
}

fn apply_set_status(key: &QueryKey, page: &mut TaskPage, ids: &[i64], target: TaskStatus, now: i64) {
    let QueryKey::Active { filter, .. } = key else {
        return;
    };
    let filter = *filter;
    page.tasks.retain_mut(|task| {
        if !ids.contains(&task.id) {
            return true;
        }
        if task.status != target {
            task.status = target;
            task.completed_at = match target {
                TaskStatus::Completed => Some(now),
                TaskStatus::Pending => None,
            };
        }
        filter.matches(target)
    });
}

fn apply_update(
    key: &QueryKey,
    page: &mut TaskPage,
    id: i64,
    title: &Option<String>,
    description: &Option<String>,
) {
    if !matches!(key, QueryKey::Active { .. }) {
        return;
    }
    for task in page.tasks.iter_mut().filter(|t| t.id == id) {
        if let Some(t) = title {
            task.title = t.trim().to_string();
        }
        if let Some(d) = description {
            let d = d.trim();
            task.description = if d.is_empty() {
                None
            } else {
                Some(d.to_string())
            };
        }
    }
}

fn apply_delete(key: &QueryKey, page: &mut TaskPage, ids: &[i64], removed: &[Task], now: i64) {
    match key {
        QueryKey::Active { .. } => {
            page.tasks.retain(|t| !ids.contains(&t.id));
        }
        QueryKey::Trash { page: page_no, .. } => {
            // Only the first trash page gains the newly-deleted tasks.
            if *page_no != 1 {
                return;
            }
            for task in removed.iter().rev() {
                if page.tasks.iter().any(|t| t.id == task.id) {
                    continue;
                }
                let mut trashed = task.clone();
                trashed.deleted_at = Some(now);
                page.tasks.insert(0, trashed);
            }
        }
    }
}

fn apply_restore(key: &QueryKey, page: &mut TaskPage, id: i64, restored: &Option<Task>) {
    match key {
        QueryKey::Trash { .. } => {
            page.tasks.retain(|t| t.id != id);
        }
        QueryKey::Active {
            filter,
            page: page_no,
            ..
        } => {
            if *page_no != 1 {
                return;
            }
            if let Some(task) = restored {
                if filter.matches(task.status) && !page.tasks.iter().any(|t| t.id == task.id) {
                    let mut active = task.clone();
                    active.deleted_at = None;
                    page.tasks.insert(0, active);
                }
            }
        }
    }
}
