//! Client-local cache of task collections, keyed by the exact query
//! parameterization. Each key is an independent entry with its own
//! lifetime; all entries under the namespace reflect the same eventual
//! server truth, so mutations snapshot and touch every entry, not just
//! the one currently displayed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::models::{Pagination, Task, TaskFilter, TaskMetadata, TaskSort};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Active {
        filter: TaskFilter,
        sort: TaskSort,
        page: i64,
        limit: i64,
    },
    Trash {
        page: i64,
        limit: i64,
    },
}

/// One fetched collection page. Trash pages carry no metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub metadata: Option<TaskMetadata>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    page: TaskPage,
    fetched_at: Instant,
    stale: bool,
}

/// A point-in-time copy of the whole cache, taken before an optimistic
/// mutation and restored verbatim if the server rejects it.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    entries: HashMap<QueryKey, CacheEntry>,
}

#[derive(Debug)]
pub struct QueryCache {
    entries: HashMap<QueryKey, CacheEntry>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        QueryCache {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// A cached page is reused only while it is within the staleness window
    /// and has not been invalidated by a mutation.
    pub fn get_fresh(&self, key: &QueryKey) -> Option<&TaskPage> {
        let entry = self.entries.get(key)?;
        if entry.stale || entry.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        Some(&entry.page)
    }

    /// The cached page regardless of freshness.
    pub fn peek(&self, key: &QueryKey) -> Option<&TaskPage> {
        self.entries.get(key).map(|e| &e.page)
    }

    pub fn insert(&mut self, key: QueryKey, page: TaskPage) {
        self.entries.insert(
            key,
            CacheEntry {
                page,
                fetched_at: Instant::now(),
                stale: false,
            },
        );
    }

    pub fn remove(&mut self, key: &QueryKey) {
        self.entries.remove(key);
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            entries: self.entries.clone(),
        }
    }

    /// Full rollback: every entry returns to its exact pre-mutation state.
    pub fn restore(&mut self, snapshot: CacheSnapshot) {
        self.entries = snapshot.entries;
    }

    /// Apply an optimistic effect to every cached collection.
    pub fn apply<F>(&mut self, mut effect: F)
    where
        F: FnMut(&QueryKey, &mut TaskPage),
    {
        for (key, entry) in self.entries.iter_mut() {
            effect(key, &mut entry.page);
        }
    }

    pub fn mark_all_stale(&mut self) {
        for entry in self.entries.values_mut() {
            entry.stale = true;
        }
    }

    pub fn stale_keys(&self) -> Vec<QueryKey> {
        self.entries
            .iter()
            .filter(|(_, e)| e.stale)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.entries.keys().cloned().collect()
    }

    /// First cached copy of a task, searching every entry.
    pub fn find_task(&self, id: i64) -> Option<Task> {
        self.entries
            .values()
            .flat_map(|e| e.page.tasks.iter())
            .find(|t| t.id == id)
            .cloned()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
