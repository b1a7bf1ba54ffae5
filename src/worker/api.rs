use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, State as AxumState, rejection::JsonRejection},
    http::StatusCode,
    routing::{delete, get},
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use super::types::{SystemStats, TaskServer, Worker, WorkerError};
use crate::api::{ApiError, parse_task_id, serve};
use crate::tasks::types::{Task, TaskEvent};

impl TaskServer {
    pub fn new(worker: Arc<Worker>, address: &str) -> Self {
        Self {
            worker,
            address: address.to_string(),
        }
    }

    pub fn router(worker: Arc<Worker>) -> Router {
        Router::new()
            .route(
                "/api/tasks",
                get(TaskServer::get_tasks).post(TaskServer::start_task),
            )
            .route("/api/tasks/{task_id}", delete(TaskServer::stop_task))
            .route("/api/stats", get(TaskServer::get_stats))
            .with_state(worker)
    }

    async fn get_tasks(AxumState(worker): AxumState<Arc<Worker>>) -> Json<Vec<Task>> {
        Json(worker.get_tasks().await)
    }

    async fn start_task(
        AxumState(worker): AxumState<Arc<Worker>>,
        payload: Result<Json<TaskEvent>, JsonRejection>,
    ) -> Result<(StatusCode, Json<Task>), ApiError> {
        let Json(event) = payload?;
        let task = event.task.clone();

        worker.add_task(event).await;
        info!(worker = %worker.name, task_id = %task.id, "Task queued");

        Ok((StatusCode::CREATED, Json(task)))
    }

    async fn stop_task(
        AxumState(worker): AxumState<Arc<Worker>>,
        Path(task_id): Path<String>,
    ) -> Result<StatusCode, ApiError> {
        let id = parse_task_id(&task_id)?;

        match worker.stop_task_request(id).await {
            Ok(_) => Ok(StatusCode::NO_CONTENT),
            Err(WorkerError::UnknownTask(_)) => {
                Err(ApiError::not_found(format!("task {} not found", id)))
            }
            Err(e) => Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
        }
    }

    async fn get_stats(
        AxumState(worker): AxumState<Arc<Worker>>,
    ) -> Result<Json<SystemStats>, ApiError> {
        worker.stats().await.map(Json).ok_or_else(|| {
            ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "stats not collected yet")
        })
    }

    /// Bind and serve until `shutdown` flips. A bind failure is returned.
    pub async fn start_server(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("failed to bind worker API on {}", self.address))?;

        info!(worker = %self.worker.name, address = %self.address, "Worker API listening");
        serve(listener, TaskServer::router(self.worker), shutdown).await
    }
}
