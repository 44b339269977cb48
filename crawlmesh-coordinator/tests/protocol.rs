//! End-to-end tests of the coordinator RPC surface through the HTTP client

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crawlmesh_client::CoordinatorClient;
use crawlmesh_coordinator::{AppState, config::Config, create_router};
use crawlmesh_core::{
    BundleManifest, Dispatch, ResultCode, TaskMeta, TaskOutcome, TaskResult, TaskSpec, pack_dir,
};
use serde_json::{Map, json};
use tempfile::TempDir;

struct TestCoordinator {
    client: CoordinatorClient,
    container: TempDir,
}

async fn spawn_coordinator(max_clients: usize, max_pending_tasks: usize) -> TestCoordinator {
    let container = tempfile::tempdir().unwrap();
    let mut config = Config::new("127.0.0.1:0".to_string(), container.path().to_path_buf());
    config.max_clients = max_clients;
    config.max_pending_tasks = max_pending_tasks;

    let app = create_router(AppState::new(&config).unwrap());
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestCoordinator {
        client: CoordinatorClient::new(format!("http://{}", addr)),
        container,
    }
}

fn build_bundle(dir: &Path, client_id: &str) -> PathBuf {
    let staging = dir.join(format!("{}-staging", client_id));
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(
        staging.join("echo.lua"),
        "return { name = 'echo', max_threads = 2, request = function(meta) return meta end }",
    )
    .unwrap();

    let mut tasks = BTreeMap::new();
    tasks.insert(
        "echo".to_string(),
        TaskSpec {
            max_threads: 2,
            module: "echo.lua".to_string(),
        },
    );
    BundleManifest {
        client_id: client_id.to_string(),
        dependencies: Vec::new(),
        files: BTreeMap::new(),
        tasks,
    }
    .write(&staging)
    .unwrap();

    let archive = dir.join(format!("{}.zip", client_id));
    pack_dir(&staging, &archive).unwrap();
    archive
}

fn meta(client_id: &str, page: u64) -> TaskMeta {
    let mut params = Map::new();
    params.insert("page".to_string(), json!(page));
    TaskMeta::new(client_id, "echo", params)
}

#[tokio::test]
async fn test_health_and_stats() {
    let coordinator = spawn_coordinator(50, 1000).await;

    coordinator.client.health().await.unwrap();

    let stats = coordinator.client.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.max_pending, 1000);
    assert!(stats.clients.is_empty());
}

#[tokio::test]
async fn test_full_task_round_trip() {
    let coordinator = spawn_coordinator(50, 1000).await;
    let client = &coordinator.client;
    let work = tempfile::tempdir().unwrap();

    let archive = build_bundle(work.path(), "t1");
    let version = client.push_bundle("t1", &archive).await.unwrap();
    assert!(version > 0);

    let submitted = meta("t1", 1);
    assert_eq!(client.add_meta(&submitted).await.unwrap(), ResultCode::Success);

    // An unsynchronized worker is told to pull first
    let dispatch = client.get_meta("w1").await.unwrap();
    assert_eq!(dispatch, Dispatch::NotUpdated(vec!["t1".to_string()]));

    let pulled = work.path().join("pulled.zip");
    let written = client.pull_bundle("t1", "w1", &pulled).await.unwrap();
    assert_eq!(written, std::fs::metadata(&archive).unwrap().len());
    assert_eq!(std::fs::read(&pulled).unwrap(), std::fs::read(&archive).unwrap());

    let Dispatch::Task(dispatched) = client.get_meta("w1").await.unwrap() else {
        panic!("expected a task");
    };
    assert_eq!(dispatched.id, submitted.id);
    assert_eq!(dispatched.worker_id.as_deref(), Some("w1"));
    assert_eq!(client.get_meta("w1").await.unwrap(), Dispatch::Empty);

    let result = TaskResult::new(
        dispatched,
        "w1",
        true,
        chrono::Utc::now(),
        TaskOutcome::Items(vec![json!({"page": 1})]),
    );
    client.on_result(&result).await.unwrap();

    let received = client.get_result("t1").await.unwrap().unwrap();
    assert_eq!(received.task_id, submitted.id);
    assert_eq!(received.items().unwrap().len(), 1);
    assert!(client.get_result("t1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_teardown_notifies_synced_workers() {
    let coordinator = spawn_coordinator(50, 1000).await;
    let client = &coordinator.client;
    let work = tempfile::tempdir().unwrap();

    let archive = build_bundle(work.path(), "t1");
    client.push_bundle("t1", &archive).await.unwrap();
    client
        .pull_bundle("t1", "w1", &work.path().join("pulled.zip"))
        .await
        .unwrap();
    assert_eq!(client.get_meta("w1").await.unwrap(), Dispatch::Empty);

    client.del_client("t1").await.unwrap();
    assert!(!coordinator.container.path().join("t1.zip").exists());
    assert!(!coordinator.container.path().join("t1").exists());

    assert_eq!(
        client.get_meta("w1").await.unwrap(),
        Dispatch::Closed("t1".to_string())
    );
    assert_eq!(client.get_meta("w1").await.unwrap(), Dispatch::Empty);

    assert_eq!(
        client.add_meta(&meta("t1", 1)).await.unwrap(),
        ResultCode::ClientNotFound
    );
    let err = client.get_result("t1").await.unwrap_err();
    assert_eq!(err.rejection(), Some(ResultCode::ClientNotFound));

    // Deleting twice is harmless
    client.del_client("t1").await.unwrap();
}

#[tokio::test]
async fn test_queue_backpressure() {
    let coordinator = spawn_coordinator(50, 1).await;
    let client = &coordinator.client;
    let work = tempfile::tempdir().unwrap();

    client
        .push_bundle("t1", &build_bundle(work.path(), "t1"))
        .await
        .unwrap();

    assert_eq!(client.add_meta(&meta("t1", 1)).await.unwrap(), ResultCode::Success);
    assert_eq!(
        client.add_meta(&meta("t1", 2)).await.unwrap(),
        ResultCode::TaskQueueFull
    );
}

#[tokio::test]
async fn test_client_slots_are_bounded() {
    let coordinator = spawn_coordinator(1, 1000).await;
    let client = &coordinator.client;
    let work = tempfile::tempdir().unwrap();

    client
        .push_bundle("t1", &build_bundle(work.path(), "t1"))
        .await
        .unwrap();

    let err = client
        .push_bundle("t2", &build_bundle(work.path(), "t2"))
        .await
        .unwrap_err();
    assert_eq!(err.rejection(), Some(ResultCode::ClientIsFull));
    assert!(!coordinator.container.path().join("t2.zip").exists());

    // Re-pushing an existing client still succeeds
    let version = client
        .push_bundle("t1", &build_bundle(work.path(), "t1"))
        .await
        .unwrap();
    assert!(version > 1);
}

#[tokio::test]
async fn test_invalid_bundles_are_rejected() {
    let coordinator = spawn_coordinator(50, 1000).await;
    let client = &coordinator.client;
    let work = tempfile::tempdir().unwrap();

    // Manifest names another client
    let err = client
        .push_bundle("t1", &build_bundle(work.path(), "t2"))
        .await
        .unwrap_err();
    assert!(err.is_client_error());
    assert!(!coordinator.container.path().join("t1.zip").exists());

    let garbage = work.path().join("garbage.zip");
    std::fs::write(&garbage, b"not a zip archive").unwrap();
    let err = client.push_bundle("t1", &garbage).await.unwrap_err();
    assert!(err.is_client_error());

    let stats = client.stats().await.unwrap();
    assert!(stats.clients.is_empty());
}

#[tokio::test]
async fn test_rejected_repush_keeps_current_bundle() {
    let coordinator = spawn_coordinator(50, 1000).await;
    let client = &coordinator.client;
    let work = tempfile::tempdir().unwrap();

    let archive = build_bundle(work.path(), "t1");
    let version = client.push_bundle("t1", &archive).await.unwrap();

    let err = client
        .push_bundle("t1", &build_bundle(work.path(), "t2"))
        .await
        .unwrap_err();
    assert!(err.is_client_error());

    let garbage = work.path().join("garbage.zip");
    std::fs::write(&garbage, b"garbage").unwrap();
    assert!(client.push_bundle("t1", &garbage).await.is_err());

    let stats = client.stats().await.unwrap();
    assert_eq!(stats.clients.len(), 1);
    assert_eq!(stats.clients[0].version, version);

    let pulled = work.path().join("pulled.zip");
    client.pull_bundle("t1", "w1", &pulled).await.unwrap();
    assert_eq!(std::fs::read(pulled).unwrap(), std::fs::read(archive).unwrap());
}

#[tokio::test]
async fn test_pull_unknown_bundle_is_not_found() {
    let coordinator = spawn_coordinator(50, 1000).await;
    let work = tempfile::tempdir().unwrap();

    let err = coordinator
        .client
        .pull_bundle("ghost", "w1", &work.path().join("ghost.zip"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
