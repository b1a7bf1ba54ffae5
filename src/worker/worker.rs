use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sysinfo::System;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::stats::get_stats;
use super::types::{SystemStats, Worker, WorkerError, WorkerResult, WorkerState};
use crate::tasks::{
    runtime::{Runtime, RuntimeError},
    state::valid_state_transition,
    types::{ContainerConfig, State, Task, TaskEvent},
};

impl Worker {
    pub fn new(name: &str, runtime: Arc<dyn Runtime>, runtime_timeout: Duration) -> Self {
        Worker {
            name: name.to_string(),
            runtime,
            runtime_timeout,
            state: Mutex::new(WorkerState::default()),
            drain: Mutex::new(()),
        }
    }

    /// Queue a command. Legality is checked when it is drained, against the
    /// state observed at that moment.
    pub async fn add_task(&self, event: TaskEvent) {
        debug!(worker = %self.name, task_id = %event.task.id, state = %event.state, "Queueing task event");
        self.state.lock().await.queue.push_back(event);
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Snapshot of every task this worker has driven. Unordered.
    pub async fn get_tasks(&self) -> Vec<Task> {
        self.state.lock().await.db.values().cloned().collect()
    }

    pub async fn get_task(&self, id: Uuid) -> Option<Task> {
        self.state.lock().await.db.get(&id).cloned()
    }

    /// Queue a `Completed` command for a task this worker knows about.
    pub async fn stop_task_request(&self, id: Uuid) -> WorkerResult<TaskEvent> {
        let mut state = self.state.lock().await;
        let mut task = state
            .db
            .get(&id)
            .cloned()
            .ok_or(WorkerError::UnknownTask(id))?;
        task.state = State::Completed;

        let event = TaskEvent::new(State::Completed, task);
        state.queue.push_back(event.clone());
        info!(worker = %self.name, task_id = %id, container_id = ?event.task.container_id, "Queued stop");

        Ok(event)
    }

    /// Drain the oldest queued command.
    ///
    /// Returns `Ok(None)` when the queue is empty. A rejected transition
    /// leaves the store untouched; a runtime failure is recorded on the task
    /// and returned.
    pub async fn run_task(&self) -> WorkerResult<Option<Task>> {
        let _drain = self.drain.lock().await;

        let (event, persisted) = {
            let mut state = self.state.lock().await;
            let Some(event) = state.queue.pop_front() else {
                return Ok(None);
            };

            let persisted = state
                .db
                .get(&event.task.id)
                .cloned()
                .unwrap_or_else(|| event.task.clone());

            if !valid_state_transition(persisted.state, event.state) {
                warn!(
                    worker = %self.name,
                    task_id = %event.task.id,
                    from = %persisted.state,
                    to = %event.state,
                    "Invalid state transition"
                );
                return Err(WorkerError::InvalidTransition {
                    task_id: event.task.id,
                    from: persisted.state,
                    to: event.state,
                });
            }

            state
                .db
                .entry(event.task.id)
                .or_insert_with(|| persisted.clone());
            (event, persisted)
        };

        match event.state {
            State::Scheduled => self.start_task(event.task).await.map(Some),
            State::Completed => self.stop_task(persisted).await.map(Some),
            other => Err(WorkerError::UnhandledState {
                task_id: event.task.id,
                state: other,
            }),
        }
    }

    async fn start_task(&self, mut task: Task) -> WorkerResult<Task> {
        let config = ContainerConfig::from(&task);
        let result = self.call_runtime(self.runtime.start(&config)).await;

        match result {
            Ok(container_id) => {
                task.container_id = Some(container_id);
                task.state = State::Running;
                task.start_time = Some(Utc::now());
                self.record(task.clone()).await;

                info!(worker = %self.name, task_id = %task.id, container_id = ?task.container_id, "Task started");
                Ok(task)
            }
            Err(source) => {
                task.state = State::Failed;
                self.record(task.clone()).await;

                error!(worker = %self.name, task_id = %task.id, error = %source, "Error starting task");
                Err(WorkerError::Runtime {
                    task_id: task.id,
                    source,
                })
            }
        }
    }

    /// A failed stop still completes the task; the error is only reported.
    async fn stop_task(&self, mut task: Task) -> WorkerResult<Task> {
        let result = match task.container_id.clone() {
            Some(container_id) => self.call_runtime(self.runtime.stop(&container_id)).await,
            None => Err(RuntimeError::MissingContainerId),
        };

        task.state = State::Completed;
        task.finish_time = Some(Utc::now());
        self.record(task.clone()).await;

        match result {
            Ok(()) => {
                info!(worker = %self.name, task_id = %task.id, container_id = ?task.container_id, "Task stopped");
                Ok(task)
            }
            Err(source) => {
                warn!(worker = %self.name, task_id = %task.id, error = %source, "Error stopping task, marked completed anyway");
                Err(WorkerError::Runtime {
                    task_id: task.id,
                    source,
                })
            }
        }
    }

    async fn record(&self, task: Task) {
        self.state.lock().await.db.insert(task.id, task);
    }

    async fn call_runtime<T, F>(&self, call: F) -> Result<T, RuntimeError>
    where
        F: Future<Output = Result<T, RuntimeError>>,
    {
        match tokio::time::timeout(self.runtime_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Timeout(self.runtime_timeout)),
        }
    }

    pub async fn running_count(&self) -> u64 {
        self.state
            .lock()
            .await
            .db
            .values()
            .filter(|task| task.state == State::Running)
            .count() as u64
    }

    pub async fn stats(&self) -> Option<SystemStats> {
        self.state.lock().await.stats.clone()
    }

    pub(crate) async fn set_stats(&self, stats: SystemStats) {
        self.state.lock().await.stats = Some(stats);
    }
}

/// Drain one command per tick until shutdown.
pub async fn run_tasks(worker: Arc<Worker>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    info!(worker = %worker.name, interval_secs = interval.as_secs(), "Starting task loop");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match worker.run_task().await {
                    Ok(Some(task)) => {
                        debug!(task_id = %task.id, state = %task.state, "Task processed");
                    }
                    Ok(None) => debug!(worker = %worker.name, "No tasks in queue"),
                    Err(e) => error!(worker = %worker.name, error = %e, "Error running task"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(worker = %worker.name, "Task loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Sample host metrics into the worker until shutdown.
pub async fn collect_stats(
    worker: Arc<Worker>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(worker = %worker.name, interval_secs = interval.as_secs(), "Starting stats loop");

    let mut sysinfo = System::new_all();
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sysinfo.refresh_all();
                let stats = get_stats(&sysinfo, worker.running_count().await);
                debug!(cpu_usage = stats.cpu_usage, used_memory_mb = stats.memory.used, task_count = stats.task_count, "Collected stats");
                worker.set_stats(stats).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(worker = %worker.name, "Stats loop shutting down");
                    break;
                }
            }
        }
    }
}
