//! End-to-end tests for the manager / worker loop.
//!
//! Each test binds real worker APIs on random local ports, backed by
//! `MockRuntime`, and drives the manager against them over HTTP. The loops
//! are not spawned; tests call `send_work`, `run_task` and `update_tasks`
//! directly so every step is deterministic.

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, http::StatusCode, routing::post};
use tokio::net::TcpListener;
use tokio::sync::watch;

use cube::api::{ErrResponse, serve};
use cube::manager::{Manager, ManagerError, ManagerServer};
use cube::tasks::runtime::MockRuntime;
use cube::tasks::types::{State, Task, TaskEvent};
use cube::worker::{TaskServer, Worker, WorkerError};

const DEAD_WORKER: &str = "127.0.0.1:1";

struct TestWorker {
    addr: String,
    worker: Arc<Worker>,
    runtime: Arc<MockRuntime>,
    _shutdown: watch::Sender<bool>,
}

async fn spawn_worker(runtime: MockRuntime) -> TestWorker {
    let runtime = Arc::new(runtime);
    let worker = Arc::new(Worker::new(
        "e2e-worker",
        runtime.clone(),
        Duration::from_secs(5),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(serve(
        listener,
        TaskServer::router(Arc::clone(&worker)),
        shutdown_rx,
    ));

    TestWorker {
        addr,
        worker,
        runtime,
        _shutdown: shutdown_tx,
    }
}

/// A "worker" that refuses every task with a structured error.
async fn spawn_refusing_worker(message: &'static str) -> (String, watch::Sender<bool>) {
    let app = Router::new().route(
        "/api/tasks",
        post(move || async move {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrResponse {
                    message: message.to_string(),
                }),
            )
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(serve(listener, app, shutdown_rx));

    (addr, shutdown_tx)
}

fn manager_for(workers: &[&str]) -> Manager {
    Manager::new(
        workers.iter().map(|w| w.to_string()).collect(),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn alpine_event() -> TaskEvent {
    let task = Task {
        image: "alpine".to_string(),
        ..Default::default()
    };
    TaskEvent::new(State::Scheduled, task)
}

#[tokio::test]
async fn submitted_task_is_placed_started_and_reconciled() {
    let node = spawn_worker(MockRuntime::new()).await;
    let manager = manager_for(&[&node.addr]);
    let event = alpine_event();
    let id = event.task.id;

    manager.add_task(event.clone()).await;
    let accepted = manager.send_work().await.unwrap().unwrap();

    assert_eq!(accepted.id, id);
    assert_eq!(manager.worker_tasks(&node.addr).await, vec![id]);
    assert_eq!(manager.assigned_worker(id).await.as_deref(), Some(node.addr.as_str()));
    assert_eq!(manager.get_task(id).await.unwrap().state, State::Scheduled);
    assert_eq!(manager.get_event(event.id).await.unwrap().task.id, id);
    assert_eq!(manager.pending_len().await, 0);

    let started = node.worker.run_task().await.unwrap().unwrap();
    assert_eq!(started.state, State::Running);
    assert_eq!(node.runtime.starts(), 1);

    let observed = node.worker.get_tasks().await;
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].state, State::Running);
    assert!(observed[0].container_id.is_some());

    let report = manager.update_tasks().await;
    assert_eq!(report.updated, 1);
    assert!(report.failed_workers.is_empty());

    let merged = manager.get_task(id).await.unwrap();
    assert_eq!(merged.state, State::Running);
    assert_eq!(merged.container_id, observed[0].container_id);
    assert!(merged.start_time.is_some());
}

#[tokio::test]
async fn delete_on_worker_completes_task_even_if_stop_fails() {
    let node = spawn_worker(MockRuntime::new().failing_stops()).await;
    let event = alpine_event();
    let id = event.task.id;

    node.worker.add_task(event).await;
    node.worker.run_task().await.unwrap();

    let response = reqwest::Client::new()
        .delete(format!("http://{}/api/tasks/{}", node.addr, id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let err = node.worker.run_task().await.unwrap_err();
    assert!(matches!(err, WorkerError::Runtime { .. }));
    assert_eq!(node.runtime.stops(), 1);

    let task = node.worker.get_task(id).await.unwrap();
    assert_eq!(task.state, State::Completed);
    assert!(task.finish_time.is_some());
}

#[tokio::test]
async fn running_requested_on_pending_task_is_rejected() {
    let node = spawn_worker(MockRuntime::new()).await;
    let event = TaskEvent::new(State::Running, Task::new("jump", "alpine"));
    let id = event.task.id;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/tasks", node.addr))
        .json(&event)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let err = node.worker.run_task().await.unwrap_err();
    assert!(matches!(
        err,
        WorkerError::InvalidTransition {
            from: State::Pending,
            to: State::Running,
            ..
        }
    ));
    assert!(node.worker.get_task(id).await.is_none());
    assert_eq!(node.runtime.starts(), 0);
}

#[tokio::test]
async fn stop_through_manager_reaches_the_owning_worker() {
    let first = spawn_worker(MockRuntime::new()).await;
    let second = spawn_worker(MockRuntime::new()).await;
    let manager = manager_for(&[&first.addr, &second.addr]);
    let event = alpine_event();
    let id = event.task.id;

    manager.add_task(event).await;
    manager.send_work().await.unwrap();
    first.worker.run_task().await.unwrap();
    manager.update_tasks().await;
    assert_eq!(manager.get_task(id).await.unwrap().state, State::Running);

    manager.stop_task_request(id).await.unwrap();
    manager.send_work().await.unwrap();

    // Round robin would have picked the second worker; ownership wins.
    assert_eq!(first.worker.queue_len().await, 1);
    assert_eq!(second.worker.queue_len().await, 0);
    assert_eq!(manager.worker_tasks(&first.addr).await, vec![id]);
    assert!(manager.worker_tasks(&second.addr).await.is_empty());

    // Not yet drained, so the manager's view must not regress or jump ahead.
    assert_eq!(manager.get_task(id).await.unwrap().state, State::Running);

    let stopped = first.worker.run_task().await.unwrap().unwrap();
    assert_eq!(stopped.state, State::Completed);
    assert_eq!(first.runtime.stops(), 1);

    manager.update_tasks().await;
    let merged = manager.get_task(id).await.unwrap();
    assert_eq!(merged.state, State::Completed);
    assert!(merged.finish_time.is_some());
    assert!(second.worker.get_tasks().await.is_empty());
}

#[tokio::test]
async fn tasks_are_spread_round_robin() {
    let first = spawn_worker(MockRuntime::new()).await;
    let second = spawn_worker(MockRuntime::new()).await;
    let manager = manager_for(&[&first.addr, &second.addr]);

    let a = alpine_event();
    let b = alpine_event();
    let c = alpine_event();
    for event in [&a, &b, &c] {
        manager.add_task(event.clone()).await;
    }
    for _ in 0..3 {
        manager.send_work().await.unwrap();
    }

    assert_eq!(
        manager.worker_tasks(&first.addr).await,
        vec![a.task.id, c.task.id]
    );
    assert_eq!(manager.worker_tasks(&second.addr).await, vec![b.task.id]);
    assert_eq!(first.worker.queue_len().await, 2);
    assert_eq!(second.worker.queue_len().await, 1);
}

#[tokio::test]
async fn reconcile_ignores_tasks_the_manager_never_placed() {
    let node = spawn_worker(MockRuntime::new()).await;
    let manager = manager_for(&[&node.addr]);
    let stray = alpine_event();
    let id = stray.task.id;

    node.worker.add_task(stray).await;
    node.worker.run_task().await.unwrap();

    let report = manager.update_tasks().await;

    assert_eq!(report.unknown, 1);
    assert_eq!(report.updated, 0);
    assert!(manager.get_task(id).await.is_none());
    assert!(manager.get_tasks().await.is_empty());
}

#[tokio::test]
async fn reconcile_continues_past_an_unreachable_worker() {
    let node = spawn_worker(MockRuntime::new()).await;
    let manager = manager_for(&[&node.addr, DEAD_WORKER]);
    let event = alpine_event();
    let id = event.task.id;

    manager.add_task(event).await;
    manager.send_work().await.unwrap();
    node.worker.run_task().await.unwrap();

    let report = manager.update_tasks().await;

    assert_eq!(report.failed_workers, vec![DEAD_WORKER.to_string()]);
    assert_eq!(report.updated, 1);
    assert_eq!(manager.get_task(id).await.unwrap().state, State::Running);
}

#[tokio::test]
async fn refused_dispatch_leaves_task_scheduled() {
    let (addr, _shutdown) = spawn_refusing_worker("disk full").await;
    let manager = manager_for(&[&addr]);
    let event = alpine_event();
    let id = event.task.id;

    manager.add_task(event).await;
    let err = manager.send_work().await.unwrap_err();

    match err {
        ManagerError::WorkerRejected {
            status, message, ..
        } => {
            assert_eq!(status, 500);
            assert_eq!(message, "disk full");
        }
        other => panic!("expected WorkerRejected, got {other:?}"),
    }

    assert_eq!(manager.pending_len().await, 0);
    assert_eq!(manager.get_task(id).await.unwrap().state, State::Scheduled);
    assert_eq!(manager.assigned_worker(id).await.as_deref(), Some(addr.as_str()));
}

#[tokio::test]
async fn failed_start_is_reconciled_as_failed() {
    let node = spawn_worker(MockRuntime::new().failing_starts()).await;
    let manager = manager_for(&[&node.addr]);
    let event = alpine_event();
    let id = event.task.id;

    manager.add_task(event).await;
    manager.send_work().await.unwrap();
    assert!(node.worker.run_task().await.is_err());

    manager.update_tasks().await;
    let merged = manager.get_task(id).await.unwrap();
    assert_eq!(merged.state, State::Failed);
    assert!(merged.container_id.is_none());
}

#[tokio::test]
async fn manager_api_drives_the_full_lifecycle() {
    let node = spawn_worker(MockRuntime::new()).await;
    let manager = Arc::new(manager_for(&[&node.addr]));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let manager_addr = listener.local_addr().unwrap().to_string();
    let (_shutdown, shutdown_rx) = watch::channel(false);
    tokio::spawn(serve(
        listener,
        ManagerServer::router(Arc::clone(&manager)),
        shutdown_rx,
    ));

    let client = reqwest::Client::new();
    let event = alpine_event();
    let id = event.task.id;

    let response = client
        .post(format!("http://{}/api/tasks", manager_addr))
        .json(&event)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let echoed: Task = response.json().await.unwrap();
    assert_eq!(echoed.id, id);

    manager.send_work().await.unwrap();
    node.worker.run_task().await.unwrap();
    manager.update_tasks().await;

    let tasks: Vec<Task> = client
        .get(format!("http://{}/api/tasks", manager_addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].state, State::Running);

    let response = client
        .delete(format!("http://{}/api/tasks/{}", manager_addr, id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    manager.send_work().await.unwrap();
    node.worker.run_task().await.unwrap();
    manager.update_tasks().await;

    assert_eq!(manager.get_task(id).await.unwrap().state, State::Completed);
}

#[tokio::test]
async fn server_stops_when_shutdown_is_signalled() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(serve(listener, Router::new(), shutdown_rx));

    shutdown_tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not shut down")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn reconcile_during_slow_start_keeps_task_scheduled() {
    let node = spawn_worker(MockRuntime::new().with_delay(Duration::from_millis(800))).await;
    let manager = manager_for(&[&node.addr]);
    let event = alpine_event();
    let id = event.task.id;
    assert_eq!(event.task.state, State::Pending);

    manager.add_task(event.clone()).await;
    manager.send_work().await.unwrap();
    assert_eq!(
        manager.get_event(event.id).await.unwrap().task.state,
        State::Scheduled
    );

    let worker = Arc::clone(&node.worker);
    let start = tokio::spawn(async move { worker.run_task().await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        node.worker.get_task(id).await.map(|task| task.state),
        Some(State::Scheduled)
    );

    let report = manager.update_tasks().await;
    assert_eq!(report.updated, 1);
    assert_eq!(manager.get_task(id).await.unwrap().state, State::Scheduled);

    let started = start.await.unwrap().unwrap().unwrap();
    assert_eq!(started.state, State::Running);

    manager.update_tasks().await;
    assert_eq!(manager.get_task(id).await.unwrap().state, State::Running);
}
