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

use super::types::{Manager, ManagerError, ManagerServer};
use crate::api::{ApiError, parse_task_id, serve};
use crate::tasks::types::{Task, TaskEvent};

impl ManagerServer {
    pub fn new(manager: Arc<Manager>, address: &str) -> Self {
        Self {
            manager,
            address: address.to_string(),
        }
    }

    pub fn router(manager: Arc<Manager>) -> Router {
        Router::new()
            .route(
                "/api/tasks",
                get(ManagerServer::get_tasks).post(ManagerServer::start_task),
            )
            .route("/api/tasks/{task_id}", delete(ManagerServer::stop_task))
            .with_state(manager)
    }

    async fn get_tasks(AxumState(manager): AxumState<Arc<Manager>>) -> Json<Vec<Task>> {
        Json(manager.get_tasks().await)
    }

    async fn start_task(
        AxumState(manager): AxumState<Arc<Manager>>,
        payload: Result<Json<TaskEvent>, JsonRejection>,
    ) -> Result<(StatusCode, Json<Task>), ApiError> {
        let Json(event) = payload?;
        let task = event.task.clone();

        manager.add_task(event).await;
        info!(task_id = %task.id, "Added task");

        Ok((StatusCode::CREATED, Json(task)))
    }

    async fn stop_task(
        AxumState(manager): AxumState<Arc<Manager>>,
        Path(task_id): Path<String>,
    ) -> Result<StatusCode, ApiError> {
        let id = parse_task_id(&task_id)?;

        match manager.stop_task_request(id).await {
            Ok(_) => Ok(StatusCode::NO_CONTENT),
            Err(ManagerError::UnknownTask(_)) => {
                Err(ApiError::not_found(format!("task {} not found", id)))
            }
            Err(e) => Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
        }
    }

    /// Bind and serve until `shutdown` flips. A bind failure is returned.
    pub async fn start_server(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("failed to bind manager API on {}", self.address))?;

        info!(address = %self.address, workers = ?self.manager.workers, "Manager API listening");
        serve(listener, ManagerServer::router(self.manager), shutdown).await
    }
}
