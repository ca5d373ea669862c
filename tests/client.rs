use std::time::Duration;

use tokio::net::TcpListener;

use taskdeck::client::{ClientError, QueryCache, QueryKey, TaskClient, TaskPage};
use taskdeck::models::{
    Pagination, Task, TaskFilter, TaskPriority, TaskSort, TaskStatus,
};
use taskdeck::{create_app, db, AppState};

struct TestServer {
    addr: String,
    db: db::DbPool,
}

impl TestServer {
    async fn new() -> Self {
        let pool = db::init_db(":memory:").expect("Failed to create in-memory database");

        let state = AppState { db: pool.clone() };
        let app = create_app(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = format!("http://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer { addr, db: pool }
    }

    /// Register + log in a TaskClient, and return the user's row id so tests
    /// can seed or sabotage the store behind the client's back.
    async fn connect(&self, username: &str) -> (TaskClient, i64) {
        let client = TaskClient::with_staleness(self.addr.clone(), Duration::from_secs(60))
            .expect("Failed to create client");
        client.register(username, "testpassword").await.unwrap();
        client.login(username, "testpassword").await.unwrap();
        let user = db::get_user_by_username(&self.db, username)
            .unwrap()
            .unwrap();
        (client, user.id)
    }
}

fn active_key(filter: TaskFilter) -> QueryKey {
    QueryKey::Active {
        filter,
        sort: TaskSort::CreatedDesc,
        page: 1,
        limit: 20,
    }
}

const TRASH_KEY: QueryKey = QueryKey::Trash { page: 1, limit: 20 };

#[tokio::test]
async fn test_fresh_cache_is_reused() {
    let server = TestServer::new().await;
    let (mut client, user_id) = server.connect("alice").await;

    client.create_task("One", None, None).await.unwrap();
    client.create_task("Two", None, None).await.unwrap();

    let first = client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();
    assert_eq!(first.tasks.len(), 2);

    // A row inserted behind the client's back is invisible while the cached
    // entry is fresh.
    db::insert_task(&server.db, user_id, "Sneaky", None, TaskPriority::Medium).unwrap();

    let second = client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_zero_staleness_always_refetches() {
    let server = TestServer::new().await;
    let mut client = TaskClient::with_staleness(server.addr.clone(), Duration::ZERO).unwrap();
    client.register("alice", "testpassword").await.unwrap();
    client.login("alice", "testpassword").await.unwrap();
    let user_id = db::get_user_by_username(&server.db, "alice")
        .unwrap()
        .unwrap()
        .id;

    let first = client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();
    assert!(first.tasks.is_empty());

    db::insert_task(&server.db, user_id, "New", None, TaskPriority::Medium).unwrap();

    let second = client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();
    assert_eq!(second.tasks.len(), 1);
}

#[tokio::test]
async fn test_mutation_reconciles_against_server_state() {
    let server = TestServer::new().await;
    let (mut client, user_id) = server.connect("alice").await;

    let t1 = client.create_task("One", None, None).await.unwrap();
    client.create_task("Two", None, None).await.unwrap();

    client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();

    // Out-of-band change the optimistic update cannot know about
    db::insert_task(&server.db, user_id, "Sneaky", None, TaskPriority::Medium).unwrap();

    let toggled = client.toggle_task(t1.id).await.unwrap();
    assert_eq!(toggled.status, TaskStatus::Completed);

    // The post-mutation refetch brought authoritative state: the toggled
    // status, the out-of-band row, and recomputed metadata.
    let page = client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();
    assert_eq!(page.tasks.len(), 3);
    let cached_t1 = page.tasks.iter().find(|t| t.id == t1.id).unwrap();
    assert_eq!(cached_t1.status, TaskStatus::Completed);
    assert!(cached_t1.completed_at.is_some());
    let metadata = page.metadata.unwrap();
    assert_eq!(metadata.total_completed, 1);
    assert_eq!(metadata.total_pending, 2);
    assert_eq!(
        metadata.total_pending + metadata.total_completed,
        metadata.total_active
    );
}

#[tokio::test]
async fn test_failed_mutation_rolls_back_every_collection() {
    let server = TestServer::new().await;
    let (mut client, user_id) = server.connect("alice").await;

    let t1 = client.create_task("Shared", None, None).await.unwrap();
    client.create_task("Filler", None, None).await.unwrap();

    // Two distinct filter keys, both containing t1
    let all_before = client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();
    let pending_before = client
        .list_tasks(TaskFilter::Pending, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();
    assert!(all_before.tasks.iter().any(|t| t.id == t1.id));
    assert!(pending_before.tasks.iter().any(|t| t.id == t1.id));

    // Remove the row behind the client's back so the toggle fails server-side
    db::soft_delete_task(&server.db, user_id, t1.id).unwrap();
    db::purge_task(&server.db, user_id, t1.id).unwrap();

    let err = client.toggle_task(t1.id).await.unwrap_err();
    match err {
        ClientError::Api { status, code, .. } => {
            assert_eq!(status, 404);
            assert_eq!(code, "NOT_FOUND");
        }
        other => panic!("expected Api error, got {other:?}"),
    }

    // Both snapshotted collections are byte-for-byte back to their
    // pre-mutation state.
    assert_eq!(
        client.cache().peek(&active_key(TaskFilter::All)).unwrap(),
        &all_before
    );
    assert_eq!(
        client
            .cache()
            .peek(&active_key(TaskFilter::Pending))
            .unwrap(),
        &pending_before
    );
}

#[tokio::test]
async fn test_validation_failure_surfaces_details_and_rolls_back() {
    let server = TestServer::new().await;
    let (mut client, _) = server.connect("alice").await;

    let t1 = client.create_task("Stable title", None, None).await.unwrap();
    let before = client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();

    // No-op update: the server rejects it, the cache rolls back
    let err = client
        .update_task(t1.id, Some("Stable title"), None)
        .await
        .unwrap_err();
    match err {
        ClientError::Api { status, code, message, .. } => {
            assert_eq!(status, 400);
            assert_eq!(code, "VALIDATION_ERROR");
            assert!(!message.is_empty());
        }
        other => panic!("expected Api error, got {other:?}"),
    }
    assert_eq!(
        client.cache().peek(&active_key(TaskFilter::All)).unwrap(),
        &before
    );
}

#[tokio::test]
async fn test_delete_moves_between_cached_views() {
    let server = TestServer::new().await;
    let (mut client, _) = server.connect("alice").await;

    let t1 = client.create_task("Doomed", None, None).await.unwrap();
    client.create_task("Survivor", None, None).await.unwrap();

    client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();
    let trash = client.trash(1, 20).await.unwrap();
    assert!(trash.tasks.is_empty());

    let deleted = client.delete_task(t1.id).await.unwrap();
    assert!(deleted.deleted_at.is_some());

    // After reconciliation both views reflect the move
    let active = client.cache().peek(&active_key(TaskFilter::All)).unwrap();
    assert!(active.tasks.iter().all(|t| t.id != t1.id));
    let trash = client.cache().peek(&TRASH_KEY).unwrap();
    assert_eq!(trash.tasks.len(), 1);
    assert_eq!(trash.tasks[0].id, t1.id);
    assert_eq!(trash.pagination.total_items, 1);
}

#[tokio::test]
async fn test_restore_and_purge_flow() {
    let server = TestServer::new().await;
    let (mut client, _) = server.connect("alice").await;

    let t1 = client.create_task("Wobbly", None, None).await.unwrap();
    client.delete_task(t1.id).await.unwrap();

    client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();
    client.trash(1, 20).await.unwrap();

    let restored = client.restore_task(t1.id).await.unwrap();
    assert!(restored.deleted_at.is_none());

    let active = client.cache().peek(&active_key(TaskFilter::All)).unwrap();
    assert!(active.tasks.iter().any(|t| t.id == t1.id));
    let trash = client.cache().peek(&TRASH_KEY).unwrap();
    assert!(trash.tasks.is_empty());

    // Purging an active task fails and leaves the cache alone
    let before_active = active.clone();
    let err = client.purge_task(t1.id).await.unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 404, .. }));
    assert_eq!(
        client.cache().peek(&active_key(TaskFilter::All)).unwrap(),
        &before_active
    );

    // The two-step path works
    client.delete_task(t1.id).await.unwrap();
    client.purge_task(t1.id).await.unwrap();
    let trash = client.cache().peek(&TRASH_KEY).unwrap();
    assert!(trash.tasks.is_empty());
    let active = client.cache().peek(&active_key(TaskFilter::All)).unwrap();
    assert!(active.tasks.is_empty());
}

#[tokio::test]
async fn test_bulk_selection_flow() {
    let server = TestServer::new().await;
    let (mut client, _) = server.connect("alice").await;

    for i in 0..25 {
        client
            .create_task(&format!("Task {i}"), None, None)
            .await
            .unwrap();
    }

    let page = client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();
    assert_eq!(page.tasks.len(), 20);
    assert_eq!(page.pagination.total_pages, 2);

    // "Select all" takes only the loaded page
    client.selection.select_page(&page.tasks);
    assert_eq!(client.selection.len(), 20);

    let ids = client.selection.ids();
    let result = client
        .bulk_set_status(&ids, TaskStatus::Completed)
        .await
        .unwrap();
    assert_eq!(result.updated_count, 20);
    client.selection.clear();

    let page = client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();
    let metadata = page.metadata.unwrap();
    assert_eq!(metadata.total_completed, 20);
    assert_eq!(metadata.total_pending, 5);
}

#[tokio::test]
async fn test_bulk_failure_rolls_back() {
    let server = TestServer::new().await;
    let (mut client, _) = server.connect("alice").await;

    let t1 = client.create_task("One", None, None).await.unwrap();
    let t2 = client.create_task("Two", None, None).await.unwrap();

    let before = client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();

    let err = client
        .bulk_set_status(&[t1.id, t2.id, 999_999], TaskStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 404, .. }));
    assert_eq!(
        client.cache().peek(&active_key(TaskFilter::All)).unwrap(),
        &before
    );

    // Server state is also untouched
    let fresh = client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();
    assert!(fresh
        .tasks
        .iter()
        .all(|t| t.status == TaskStatus::Pending));
}

#[tokio::test]
async fn test_logout_tears_down_client_state() {
    let server = TestServer::new().await;
    let (mut client, _) = server.connect("alice").await;

    let t1 = client.create_task("One", None, None).await.unwrap();
    client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap();
    client.selection.select(t1.id);
    assert!(!client.cache().is_empty());

    client.logout().await.unwrap();
    assert!(client.cache().is_empty());
    assert!(client.selection.is_empty());

    let err = client
        .list_tasks(TaskFilter::All, TaskSort::CreatedDesc, 1, 20)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 401, .. }));
}

#[tokio::test]
async fn test_preference_roundtrip() {
    let server = TestServer::new().await;
    let (client, _) = server.connect("alice").await;

    client.set_preference("layout", "grid").await.unwrap();
    let pref = client.set_preference("layout", "list").await.unwrap();
    assert_eq!(pref.value, "list");

    let prefs = client.preferences().await.unwrap();
    assert_eq!(prefs.len(), 1);
    assert_eq!(prefs[0].key, "layout");
    assert_eq!(prefs[0].value, "list");
}

// QueryCache behaves as a value-semantics snapshot store even without a
// server on the other end.

fn sample_task(id: i64) -> Task {
    Task {
        id,
        user_id: 1,
        title: format!("Task {id}"),
        description: None,
        status: TaskStatus::Pending,
        priority: TaskPriority::Medium,
        manual_order: None,
        created_at: 1_700_000_000,
        updated_at: 1_700_000_000,
        completed_at: None,
        deleted_at: None,
    }
}

fn sample_page(tasks: Vec<Task>) -> TaskPage {
    let total = tasks.len() as i64;
    TaskPage {
        tasks,
        metadata: None,
        pagination: Pagination {
            page: 1,
            limit: 20,
            total_items: total,
            total_pages: if total == 0 { 0 } else { 1 },
            has_next: false,
            has_prev: false,
        },
    }
}

#[test]
fn test_query_cache_snapshot_restore() {
    let mut cache = QueryCache::new(Duration::from_secs(60));
    let key = active_key(TaskFilter::All);
    cache.insert(key.clone(), sample_page(vec![sample_task(1), sample_task(2)]));
    let original = cache.peek(&key).unwrap().clone();

    let snapshot = cache.snapshot();
    cache.apply(|_, page| {
        for task in page.tasks.iter_mut() {
            task.status = TaskStatus::Completed;
        }
    });
    assert_ne!(cache.peek(&key).unwrap(), &original);

    cache.restore(snapshot);
    assert_eq!(cache.peek(&key).unwrap(), &original);
}

#[test]
fn test_query_cache_staleness() {
    let mut cache = QueryCache::new(Duration::from_secs(60));
    let key = active_key(TaskFilter::All);
    cache.insert(key.clone(), sample_page(vec![sample_task(1)]));
    assert!(cache.get_fresh(&key).is_some());

    cache.mark_all_stale();
    assert!(cache.get_fresh(&key).is_none());
    // Still inspectable, just not reusable
    assert!(cache.peek(&key).is_some());
    assert_eq!(cache.stale_keys(), vec![key.clone()]);

    // A zero window means nothing is ever fresh
    let mut cache = QueryCache::new(Duration::ZERO);
    cache.insert(key.clone(), sample_page(vec![sample_task(1)]));
    assert!(cache.get_fresh(&key).is_none());
}

#[test]
fn test_query_cache_keys_are_independent() {
    let mut cache = QueryCache::new(Duration::from_secs(60));
    cache.insert(
        active_key(TaskFilter::All),
        sample_page(vec![sample_task(1)]),
    );
    cache.insert(
        active_key(TaskFilter::Pending),
        sample_page(vec![sample_task(1)]),
    );
    cache.insert(TRASH_KEY, sample_page(vec![]));
    assert_eq!(cache.len(), 3);

    cache.remove(&active_key(TaskFilter::Pending));
    assert_eq!(cache.len(), 2);
    assert!(cache.peek(&active_key(TaskFilter::All)).is_some());
    assert!(cache.peek(&TRASH_KEY).is_some());

    assert_eq!(cache.find_task(1).unwrap().id, 1);
    assert!(cache.find_task(42).is_none());
}
