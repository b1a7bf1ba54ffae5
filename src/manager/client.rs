//! HTTP client the manager uses to push commands to workers and poll them.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;

use super::types::{ManagerError, ManagerResult};
use crate::api::ErrResponse;
use crate::tasks::types::{Task, TaskEvent};

#[derive(Debug, Clone)]
pub struct WorkerClient {
    client: reqwest::Client,
}

impl WorkerClient {
    pub fn new(timeout: Duration) -> ManagerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ManagerError::HttpClient)?;

        Ok(Self { client })
    }

    /// POST an event to a worker. Returns the task the worker queued.
    pub async fn send_task(&self, worker: &str, event: &TaskEvent) -> ManagerResult<Task> {
        let url = format!("http://{}/api/tasks", worker);
        debug!(url = %url, task_id = %event.task.id, "Sending task event");

        let response = self
            .client
            .post(&url)
            .json(event)
            .send()
            .await
            .map_err(|source| ManagerError::Transport {
                worker: worker.to_string(),
                source,
            })?;

        if response.status() != StatusCode::CREATED {
            return Err(rejected(worker, response).await);
        }

        response
            .json::<Task>()
            .await
            .map_err(|source| ManagerError::Decode {
                worker: worker.to_string(),
                source,
            })
    }

    /// GET a worker's observed tasks.
    pub async fn get_tasks(&self, worker: &str) -> ManagerResult<Vec<Task>> {
        let url = format!("http://{}/api/tasks", worker);
        debug!(url = %url, "Fetching worker tasks");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ManagerError::Transport {
                worker: worker.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(rejected(worker, response).await);
        }

        response
            .json::<Vec<Task>>()
            .await
            .map_err(|source| ManagerError::Decode {
                worker: worker.to_string(),
                source,
            })
    }
}

async fn rejected(worker: &str, response: reqwest::Response) -> ManagerError {
    let status = response.status();
    let message = match response.json::<ErrResponse>().await {
        Ok(body) => body.message,
        Err(e) => format!("undecodable error body: {}", e),
    };

    ManagerError::WorkerRejected {
        worker: worker.to_string(),
        status: status.as_u16(),
        message,
    }
}
